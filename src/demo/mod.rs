//! A small interactive program that drives a [`Session`] on the terminal it is started from.
use std::{
    env, io,
    os::fd::AsRawFd,
    process::{Command, Stdio},
};

use crate::{
    common::{Config, Error},
    cutils::safe_isatty,
    log::{dev_info, user_info, user_warn, SysdepLogger},
    session::Session,
    system::{
        file,
        interface::{ProcessId, RealPlatform},
        retry::{Interruptible, PendingWork},
        signal::{consts::SIGINT, signal_name, PendingSignals},
        term::{mode::setup_child_tty, tty::TtyDevice, Pty},
        wait::WaitStatus,
    },
};

const USAGE: &str = "usage: sysdep-demo [--batch] [--flow-control] [--no-meta]";

const HELP: &[u8] = b"sysdep-demo: q quits, z suspends, ! runs a shell, p runs a command on a \
pty, w shows the window size, C-g aborts the current read\r\n";

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Config, Error> {
    let mut config = Config::default();
    for arg in args {
        config = match arg.as_str() {
            "--batch" => config.interactive(false),
            "--flow-control" => config.flow_control(true),
            "--no-meta" => config.meta_key(false),
            _ => return Err(Error::Configuration(format!("unknown argument '{arg}'"))),
        };
    }
    Ok(config)
}

fn describe(status: &WaitStatus) -> String {
    match (status.exit_status(), status.term_signal()) {
        (Some(code), _) => format!("exited with status {code}"),
        (None, Some(signal)) => Error::Signaled(signal).to_string(),
        _ => format!("{status:?}"),
    }
}

/// Run a command on a fresh pseudo-terminal set up for a subprocess and copy its output.
fn run_on_pty(session: &Session) -> Result<(), Error> {
    let pty = Pty::open()?;
    setup_child_tty(pty.follower.as_raw_fd())?;
    dev_info!("running on {:?}", pty.path);

    let mut command = Command::new("sh");
    command
        .args(["-c", "echo hello from $(tty)"])
        .stdin(Stdio::from(pty.follower.try_clone()?))
        .stdout(Stdio::from(pty.follower.try_clone()?))
        .stderr(Stdio::from(pty.follower));
    let child = command
        .spawn()
        .map_err(|err| Error::Spawn("sh".into(), err))?;
    // the leader sees end of file only once no copy of the follower is left open
    drop(command);

    let mut buf = [0; 256];
    loop {
        match file::read(&pty.leader, &mut buf, session.interruptible()) {
            Ok(0) => break,
            Ok(n) => {
                let out = io::stdout();
                file::write_all(&out, &buf[..n], session.interruptible())?;
            }
            // Linux reports a hung up pty as an I/O error
            Err(err) if err.raw_os_error() == Some(libc::EIO) => break,
            Err(err) => return Err(err),
        }
    }

    let pid = ProcessId::new(child.id() as libc::pid_t);
    let status = session.wait_for_termination(pid)?;
    user_info!("command {}", describe(&status));
    Ok(())
}

fn handle_key(session: &mut Session, key: u8) -> Result<bool, Error> {
    let out = io::stdout();
    match key {
        b'q' | 0x04 => return Ok(false),
        b'z' => session.suspend()?,
        b'!' => {
            let status = session.spawn_subshell(&env::current_dir()?)?;
            user_info!("shell {}", describe(&status));
        }
        b'p' => run_on_pty(session)?,
        b'w' => match session.tty(0) {
            Some(tty) => {
                let size = tty.window_size(session.platform())?;
                let line = format!("{} rows, {} columns\r\n", size.rows, size.cols);
                file::write_all(&out, line.as_bytes(), Interruptible::No)?;
            }
            None => user_warn!("not running on a terminal"),
        },
        b'\r' | b'\n' => {
            file::write_all(&out, b"\r\n", Interruptible::No)?;
        }
        key => {
            file::write_all(&out, &[key], Interruptible::No)?;
        }
    }
    Ok(true)
}

fn run(session: &mut Session) -> Result<(), Error> {
    let out = io::stdout();
    file::write_all(&out, HELP, Interruptible::No)?;

    let mut key = [0];
    loop {
        match file::read(io::stdin(), &mut key, session.interruptible()) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(Error::Quit) => {
                file::write_all(&out, b"Quit\r\n", Interruptible::No)?;
                continue;
            }
            Err(err) => return Err(err),
        }

        match handle_key(session, key[0]) {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(Error::Quit) => {
                file::write_all(&out, b"Quit\r\n", Interruptible::No)?;
            }
            Err(err) => return Err(err),
        }
        session.pending().process_pending_signals();
    }
}

fn process() -> Result<(), Error> {
    SysdepLogger::new("sysdep-demo: ")
        .into_global_logger()
        .map_err(|err| Error::Configuration(err.to_string()))?;
    dev_info!("development logs are enabled");

    file::init_standard_fds()?;
    let config = parse_args(env::args().skip(1))?;

    let mut session = Session::new(config, RealPlatform)?;
    session.set_pending_signals(
        PendingSignals::new()
            .on_user_signal(|signal| {
                user_info!("received {}", signal_name(signal).unwrap_or("a user signal"))
            })
            .on_danger(|| user_warn!("save your work")),
    );
    // the quit character generates SIGINT; let it abort the current read instead of killing us
    session.init_signals()?.catch_as_quit(SIGINT)?;

    let stdin = io::stdin().as_raw_fd();
    if safe_isatty(stdin) {
        session.add_tty(TtyDevice::from_fd(stdin, true));
    }
    session.init_all_sys_modes()?;

    let result = run(&mut session);
    let reset = session.reset_all_sys_modes();
    if let Some(tty) = session.tty(0) {
        if let Some(erase) = tty.erase_char() {
            dev_info!("erase character was {erase:#04x}");
        }
    }
    println_ignore_io_error!();
    result.and(reset)
}

pub fn main() {
    match process() {
        Ok(()) => (),
        Err(Error::Configuration(message)) => {
            eprintln_ignore_io_error!("sysdep-demo: {message}\n{USAGE}");
            std::process::exit(1);
        }
        Err(error) => {
            eprintln_ignore_io_error!("sysdep-demo: {error}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args<'a>(list: &'a [&'a str]) -> impl Iterator<Item = String> + 'a {
        list.iter().map(|arg| arg.to_string())
    }

    #[test]
    fn arguments() {
        let config = parse_args(args(&["--batch", "--flow-control"])).unwrap();
        assert!(!config.interactive);
        assert!(config.flow_control);
        assert!(config.meta_key);

        let config = parse_args(args(&["--no-meta"])).unwrap();
        assert!(config.interactive);
        assert!(!config.meta_key);

        assert!(matches!(
            parse_args(args(&["--frobnicate"])),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn status_descriptions() {
        // a raw status of 9 means killed by SIGKILL, 3 << 8 an exit status of 3
        assert_eq!(
            describe(&WaitStatus::from_raw(libc::SIGKILL)),
            "terminated by SIGKILL"
        );
        assert_eq!(
            describe(&WaitStatus::from_raw(3 << 8)),
            "exited with status 3"
        );
    }
}

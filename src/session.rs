//! The state of an interactive session: its terminals, its process group and its signal
//! handlers.
use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
    process::Command,
};

use crate::{
    common::{Config, Error},
    log::{dev_info, dev_warn},
    system::{
        interface::{Platform, ProcessId, RealPlatform},
        retry::Interruptible,
        signal::{consts::SIGTSTP, PendingSignals, SavedDispositions, SignalRegistry},
        term::{pgroup::ForegroundGroup, tty::TtyDevice},
        wait::{self, PendingChildStatus, WaitOptions, WaitStatus},
    },
};

const DEFAULT_SHELL: &str = "sh";

pub struct Session<P: Platform = RealPlatform> {
    config: Config,
    platform: P,
    foreground: ForegroundGroup,
    ttys: Vec<TtyDevice>,
    signals: Option<SignalRegistry>,
    pending: PendingSignals,
}

impl<P: Platform> Session<P> {
    pub fn new(config: Config, platform: P) -> Result<Self, Error> {
        let config = config.validate()?;
        let foreground = ForegroundGroup::init(&platform);

        Ok(Self {
            config,
            platform,
            foreground,
            ttys: Vec::new(),
            signals: None,
            pending: PendingSignals::new(),
        })
    }

    /// Install the process signal handlers. The calling thread becomes the main thread.
    pub fn init_signals(&mut self) -> Result<&mut SignalRegistry, Error> {
        if self.signals.is_some() {
            return Err(Error::AlreadyInitialized("signal registry"));
        }
        Ok(self.signals.insert(SignalRegistry::install(&self.config)?))
    }

    pub fn signals(&self) -> Option<&SignalRegistry> {
        self.signals.as_ref()
    }

    /// Replace the handlers for the work signal handlers defer to the main loop.
    pub fn set_pending_signals(&mut self, pending: PendingSignals) {
        self.pending = pending;
    }

    pub fn pending(&self) -> &PendingSignals {
        &self.pending
    }

    /// The policy for blocking calls made on behalf of the user: give up on a quit request.
    pub fn interruptible(&self) -> Interruptible<'_> {
        Interruptible::Quit(&self.pending)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn foreground(&self) -> &ForegroundGroup {
        &self.foreground
    }

    /// Start managing `tty`, returning its index. Flow control and the meta key default to the
    /// session configuration unless they were set on `tty`.
    pub fn add_tty(&mut self, tty: TtyDevice) -> usize {
        self.ttys.push(tty.with_defaults_from(&self.config));
        self.ttys.len() - 1
    }

    pub fn tty(&self, index: usize) -> Option<&TtyDevice> {
        self.ttys.get(index)
    }

    pub fn tty_mut(&mut self, index: usize) -> Option<&mut TtyDevice> {
        self.ttys.get_mut(index)
    }

    /// Stop managing the terminal at `index` and hand it back. Its mode is left as it is.
    pub fn remove_tty(&mut self, index: usize) -> Option<TtyDevice> {
        (index < self.ttys.len()).then(|| self.ttys.remove(index))
    }

    pub fn ttys(&self) -> impl Iterator<Item = &TtyDevice> {
        self.ttys.iter()
    }

    /// Take over the foreground of every terminal that is not suspended and put it in editing
    /// mode.
    pub fn init_all_sys_modes(&mut self) -> Result<(), Error> {
        if !self.config.interactive {
            return Ok(());
        }

        let Self {
            config,
            platform,
            foreground,
            ttys,
            ..
        } = self;
        for tty in ttys.iter_mut().filter(|tty| !tty.is_suspended()) {
            // only the controlling terminal has a foreground group that is ours to take
            if tty.is_controlling() {
                foreground.narrow(platform, tty.input_fd())?;
            }
            tty.init_editing_mode(platform, config.quit_char)?;
        }
        Ok(())
    }

    /// Put every terminal back the way we found it and return the foreground to the group we
    /// were started in.
    ///
    /// All terminals are attempted; the first failure is reported.
    pub fn reset_all_sys_modes(&mut self) -> Result<(), Error> {
        if !self.config.interactive {
            return Ok(());
        }

        let Self {
            platform,
            foreground,
            ttys,
            ..
        } = self;
        let mut first_error = None;
        for tty in ttys.iter_mut() {
            if !tty.is_initialized() || tty.is_suspended() {
                continue;
            }
            let (fd, controlling) = (tty.input_fd(), tty.is_controlling());
            let result = tty.restore_mode(platform).and_then(|()| {
                if controlling {
                    foreground.widen(platform, fd)
                } else {
                    Ok(())
                }
            });
            if let Err(err) = result {
                dev_warn!("cannot restore terminal on fd {fd}: {err}");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Throw away pending input on every terminal that is not suspended.
    pub fn discard_tty_input(&self) -> Result<(), Error> {
        if !self.config.interactive {
            return Ok(());
        }
        for tty in &self.ttys {
            tty.discard_input(&self.platform)?;
        }
        Ok(())
    }

    /// Stop the whole process group the way `C-z` in a shell does, and take the terminals back
    /// once we are continued.
    pub fn suspend(&mut self) -> Result<(), Error> {
        self.reset_all_sys_modes()?;
        dev_info!("stopping");
        self.platform.send_signal(ProcessId::new(0), SIGTSTP)?;
        self.init_all_sys_modes()
    }

    /// Run an interactive shell in `dir` with the terminals in their original modes, and wait
    /// for it to finish.
    ///
    /// The shell is `$SHELL`, or `sh` if that is not set.
    pub fn spawn_subshell(&mut self, dir: &Path) -> Result<WaitStatus, Error> {
        let shell = std::env::var_os("SHELL")
            .filter(|shell| !shell.is_empty())
            .unwrap_or_else(|| OsString::from(DEFAULT_SHELL));
        let mut command = Command::new(&shell);
        command.current_dir(dir);
        self.run_in_foreground(command)
    }

    /// Run `command` with the terminals in their original modes and wait for it to finish.
    ///
    /// Keyboard signals are ignored while it runs, since they are meant for the command. The
    /// wait is never cancelled.
    pub fn run_in_foreground(&mut self, mut command: Command) -> Result<WaitStatus, Error> {
        self.reset_all_sys_modes()?;

        let program = PathBuf::from(command.get_program());
        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                self.init_all_sys_modes()?;
                return Err(Error::Spawn(program, err));
            }
        };
        let pid = ProcessId::new(child.id() as libc::pid_t);
        dev_info!("started {} as {pid}", program.display());

        let status = wait_in_foreground(&self.platform, pid, SavedDispositions::ignore());

        self.init_all_sys_modes()?;
        status
    }

    /// Block until `child` terminates. Gives up on a quit request.
    pub fn wait_for_termination(&self, child: ProcessId) -> Result<WaitStatus, Error> {
        wait::wait_for_termination(&self.platform, child, self.interruptible())
    }

    pub fn poll_child_status(
        &self,
        child: ProcessId,
        options: WaitOptions,
    ) -> Result<PendingChildStatus, Error> {
        wait::poll_child_status(&self.platform, child, options)
    }
}

/// Wait for `child` with the keyboard signals ignored if that could be arranged. The child
/// exists either way and has to be reaped.
fn wait_in_foreground<P: Platform>(
    platform: &P,
    child: ProcessId,
    saved: io::Result<SavedDispositions>,
) -> Result<WaitStatus, Error> {
    let saved = saved
        .map_err(|err| dev_warn!("cannot ignore keyboard signals while {child} runs: {err}"))
        .ok();
    let status = wait::wait_for_termination(platform, child, Interruptible::No);
    if let Some(saved) = saved {
        saved.restore();
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{
        fake::{Call, FakePlatform},
        term::mode::TerminalMode,
    };
    use libc::{ECHO, ICANON, ISIG};
    use pretty_assertions::assert_eq;

    fn cooked() -> TerminalMode {
        let mut raw: libc::termios = unsafe { std::mem::zeroed() };
        raw.c_lflag = ISIG | ICANON | ECHO;
        raw.c_cc[libc::VINTR] = 0x03;
        TerminalMode::from_raw(raw)
    }

    fn inherited_group_session() -> Session<FakePlatform> {
        let (us, shell) = (ProcessId::new(200), ProcessId::new(150));
        let platform = FakePlatform::in_group(us, shell);
        platform.add_terminal(0, cooked(), shell);
        platform.add_terminal(7, cooked(), shell);
        let mut session = Session::new(Config::default(), platform).unwrap();
        session.add_tty(TtyDevice::from_fd(0, true));
        session.add_tty(TtyDevice::from_fd(7, false));
        session
    }

    #[test]
    fn modes_and_foreground_come_back() {
        let mut session = inherited_group_session();

        session.init_all_sys_modes().unwrap();
        let platform = session.platform();
        assert!(session.foreground().is_narrowed());
        assert_eq!(platform.foreground(0), Some(ProcessId::new(200)));
        assert_eq!(platform.mode(0).unwrap().special_char(libc::VINTR), 0x07);
        assert_eq!(platform.mode(7).unwrap().local_flags() & ECHO, 0);

        session.reset_all_sys_modes().unwrap();
        let platform = session.platform();
        assert!(!session.foreground().is_narrowed());
        assert_eq!(platform.foreground(0), Some(ProcessId::new(150)));
        assert_eq!(platform.group(), ProcessId::new(150));
        assert_eq!(platform.mode(0), Some(cooked()));
        assert_eq!(platform.mode(7), Some(cooked()));
    }

    #[test]
    fn batch_sessions_leave_terminals_alone() {
        let platform = FakePlatform::new();
        platform.add_terminal(0, cooked(), ProcessId::new(100));
        let mut session = Session::new(Config::batch(), platform).unwrap();
        session.add_tty(TtyDevice::from_fd(0, true));

        session.init_all_sys_modes().unwrap();
        session.discard_tty_input().unwrap();
        session.reset_all_sys_modes().unwrap();
        assert_eq!(session.platform().calls(), vec![]);
    }

    #[test]
    fn suspend_gives_the_terminal_back_while_stopped() {
        let mut session = inherited_group_session();
        session.init_all_sys_modes().unwrap();
        session.platform().clear_calls();

        session.suspend().unwrap();
        let calls = session.platform().calls();
        let stop = calls
            .iter()
            .position(|call| *call == Call::Signal(ProcessId::new(0), SIGTSTP))
            .unwrap();
        assert!(calls[..stop].contains(&Call::SetForeground(0, ProcessId::new(150))));
        assert!(calls[stop..].contains(&Call::SetForeground(0, ProcessId::new(200))));
        assert!(session.tty(0).unwrap().is_initialized());
        assert!(session.tty(1).unwrap().is_initialized());
    }

    #[test]
    fn reset_keeps_going_after_a_failure() {
        let mut session = inherited_group_session();
        session.add_tty(TtyDevice::from_fd(9, false));
        // fd 9 is not a terminal
        assert!(session.init_all_sys_modes().is_err());
        assert!(session.tty(0).unwrap().is_initialized());

        session.reset_all_sys_modes().unwrap();
        assert_eq!(session.platform().mode(0), Some(cooked()));
        assert_eq!(session.platform().mode(7), Some(cooked()));
    }

    #[test]
    fn discarding_input_skips_suspended_terminals() {
        let mut session = inherited_group_session();
        let mut secondary = session.remove_tty(1).unwrap();
        secondary.suspend(session.platform()).unwrap();
        session.add_tty(secondary);
        session.discard_tty_input().unwrap();
        assert!(session
            .platform()
            .calls()
            .iter()
            .all(|call| !matches!(call, Call::GetMode(7) | Call::SetMode { fd: 7, .. })));
    }

    #[test]
    fn new_terminals_follow_the_configuration() {
        let platform = FakePlatform::new();
        platform.add_terminal(0, cooked(), ProcessId::new(100));
        platform.add_terminal(7, cooked(), ProcessId::new(100));
        let config = Config::default().flow_control(true);
        let mut session = Session::new(config, platform).unwrap();
        session.add_tty(TtyDevice::from_fd(0, true));
        session.add_tty(TtyDevice::from_fd(7, false).flow_control(false));

        session.init_all_sys_modes().unwrap();
        let platform = session.platform();
        assert_ne!(platform.mode(0).unwrap().input_flags() & libc::IXON, 0);
        assert_eq!(platform.mode(7).unwrap().input_flags() & libc::IXON, 0);
        assert!(!platform.calls().contains(&Call::ResumeOutput(0)));
        assert!(platform.calls().contains(&Call::ResumeOutput(7)));
    }

    #[test]
    fn secondary_terminals_leave_the_process_group_alone() {
        let (us, shell) = (ProcessId::new(200), ProcessId::new(150));
        let platform = FakePlatform::in_group(us, shell);
        platform.add_terminal(7, cooked(), shell);
        let mut session = Session::new(Config::default(), platform).unwrap();
        session.add_tty(TtyDevice::from_fd(7, false));

        session.init_all_sys_modes().unwrap();
        assert!(!session.foreground().is_narrowed());
        assert_eq!(session.platform().group(), shell);

        session.reset_all_sys_modes().unwrap();
        assert!(session
            .platform()
            .calls()
            .iter()
            .all(|call| !matches!(call, Call::SetProcessGroup(..) | Call::SetForeground(..))));
    }

    #[test]
    fn losing_the_terminal_is_not_fatal() {
        let (us, shell) = (ProcessId::new(200), ProcessId::new(150));
        let platform = FakePlatform::in_group(us, shell);
        platform.add_terminal(0, cooked(), shell);
        let mut session = Session::new(Config::default(), platform).unwrap();
        session.add_tty(TtyDevice::from_fd(0, true));
        // the terminal cannot be handed over, but the group change still happened
        session.platform().refuse_foreground_changes(true);

        session.init_all_sys_modes().unwrap();
        assert!(session.foreground().is_narrowed());
        assert_eq!(session.platform().group(), us);

        session.reset_all_sys_modes().unwrap();
        assert!(!session.foreground().is_narrowed());
        assert_eq!(session.platform().group(), shell);
        assert_eq!(session.platform().mode(0), Some(cooked()));
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let config = Config::default().stack_heuristic_shift(0);
        assert!(matches!(
            Session::new(config, FakePlatform::new()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn tty_bookkeeping() {
        let mut session = inherited_group_session();
        assert_eq!(session.ttys().count(), 2);
        let removed = session.remove_tty(1).unwrap();
        assert_eq!(removed.input_fd(), 7);
        assert!(session.remove_tty(5).is_none());
        assert_eq!(session.ttys().count(), 1);
    }

    #[test]
    fn child_is_reaped_when_signals_cannot_be_ignored() {
        let platform = FakePlatform::new();
        let child = ProcessId::new(321);
        platform.push_wait_result(Ok(Some((child, WaitStatus::from_raw(0)))));
        let refused = Err(io::Error::from_raw_os_error(libc::EINVAL));

        let status = wait_in_foreground(&platform, child, refused).unwrap();
        assert_eq!(status.exit_status(), Some(0));
        assert_eq!(platform.calls(), vec![Call::Wait(child)]);
    }

    #[test]
    fn commands_run_with_original_modes() {
        let mut session = Session::new(Config::default(), RealPlatform).unwrap();
        let mut command = Command::new("sh");
        command.args(["-c", "exit 3"]);
        let status = session.run_in_foreground(command).unwrap();
        assert_eq!(status.exit_status(), Some(3));

        let err = session
            .run_in_foreground(Command::new("/nonexistent/shell"))
            .unwrap_err();
        assert!(matches!(err, Error::Spawn(..)));
    }
}

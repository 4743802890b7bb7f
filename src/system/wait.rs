use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
};

use libc::{
    c_int, WCONTINUED, WEXITSTATUS, WIFCONTINUED, WIFEXITED, WIFSIGNALED, WIFSTOPPED, WNOHANG,
    WSTOPSIG, WTERMSIG, WUNTRACED,
};

use crate::common::Error;
use crate::cutils::cerr;
use crate::log::dev_debug;
use crate::system::signal::signal_name;
use crate::{system::interface::ProcessId, system::signal::SignalNumber};

use super::{
    interface::Platform,
    retry::{retry_on_interrupt, Interruptible},
};

mod sealed {
    pub(crate) trait Sealed {}

    impl Sealed for crate::system::interface::ProcessId {}
}

pub(crate) trait Wait: sealed::Sealed {
    /// Wait for a process to change state.
    ///
    /// Calling this function will block until a child specified by the given process ID has
    /// changed state. This can be configured further using [`WaitOptions`].
    fn wait(self, options: WaitOptions) -> Result<(ProcessId, WaitStatus), WaitError>;
}

impl Wait for ProcessId {
    fn wait(self, options: WaitOptions) -> Result<(ProcessId, WaitStatus), WaitError> {
        let mut status: c_int = 0;

        let pid = cerr(unsafe { libc::waitpid(self.get(), &mut status, options.flags) })
            .map_err(WaitError::Io)?;

        if pid == 0 && options.flags & WNOHANG != 0 {
            return Err(WaitError::NotReady);
        }

        Ok((ProcessId::new(pid), WaitStatus { status }))
    }
}

/// Error values returned when [`Wait::wait`] fails.
#[derive(Debug)]
pub(crate) enum WaitError {
    // No children were in a waitable state.
    //
    // This is only returned if the [`WaitOptions::no_hang`] option is used.
    NotReady,
    // Regular I/O error.
    Io(io::Error),
}

/// Options to configure how [`Wait::wait`] waits for children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WaitOptions {
    flags: c_int,
}

impl WaitOptions {
    /// Only wait for terminated children.
    pub const fn new() -> Self {
        Self { flags: 0 }
    }

    /// Return immediately if no child has exited.
    pub const fn no_hang(mut self) -> Self {
        self.flags |= WNOHANG;
        self
    }

    /// Also report children that were stopped.
    pub const fn untraced(mut self) -> Self {
        self.flags |= WUNTRACED;
        self
    }

    /// Also report stopped children that were resumed by `SIGCONT`.
    pub const fn continued(mut self) -> Self {
        self.flags |= WCONTINUED;
        self
    }
}

/// The status of the waited child.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct WaitStatus {
    status: c_int,
}

impl std::fmt::Debug for WaitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = |signal| signal_name(signal).unwrap_or("unknown signal");
        if let Some(exit_status) = self.exit_status() {
            write!(f, "ExitStatus({exit_status})")
        } else if let Some(signal) = self.term_signal() {
            write!(f, "TermSignal({})", name(signal))
        } else if let Some(signal) = self.stop_signal() {
            write!(f, "StopSignal({})", name(signal))
        } else if self.did_continue() {
            write!(f, "Continued")
        } else {
            write!(f, "Unknown")
        }
    }
}

impl WaitStatus {
    /// Wrap a raw status word as filled in by `waitpid`.
    pub const fn from_raw(status: c_int) -> Self {
        Self { status }
    }

    /// Return `true` if the child terminated normally, i.e., by calling `exit`.
    pub const fn did_exit(&self) -> bool {
        WIFEXITED(self.status)
    }

    /// Return the exit status of the child if the child terminated normally.
    pub const fn exit_status(&self) -> Option<c_int> {
        if self.did_exit() {
            Some(WEXITSTATUS(self.status))
        } else {
            None
        }
    }

    /// Return `true` if the child process was terminated by a signal.
    pub const fn was_signaled(&self) -> bool {
        WIFSIGNALED(self.status)
    }

    /// Return the signal number which caused the child to terminate if the child was terminated by
    /// a signal.
    pub const fn term_signal(&self) -> Option<SignalNumber> {
        if self.was_signaled() {
            Some(WTERMSIG(self.status))
        } else {
            None
        }
    }

    /// Return `true` if the child process was stopped by a signal.
    pub const fn was_stopped(&self) -> bool {
        WIFSTOPPED(self.status)
    }

    /// Return the signal number which caused the child to stop if the child was stopped by a
    /// signal.
    pub const fn stop_signal(&self) -> Option<SignalNumber> {
        if self.was_stopped() {
            Some(WSTOPSIG(self.status))
        } else {
            None
        }
    }

    /// Return `true` if the child process was resumed by receiving `SIGCONT`.
    pub const fn did_continue(&self) -> bool {
        WIFCONTINUED(self.status)
    }
}

/// The outcome of polling a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingChildStatus {
    Available(ProcessId, WaitStatus),
    /// The child exists but has nothing to report.
    NotYet,
}

static REPOLL_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Returns `true`, once, if a child status was collected since the last call.
///
/// Whoever collects a status may have consumed the event the main loop was waiting for, so the
/// loop should look around again before going back to sleep.
pub fn take_repoll_request() -> bool {
    REPOLL_REQUESTED.swap(false, Ordering::AcqRel)
}

fn get_child_status<P: Platform>(
    platform: &P,
    child: ProcessId,
    options: WaitOptions,
    interruptible: Interruptible<'_>,
) -> Result<PendingChildStatus, Error> {
    // Never pass a wildcard to waitpid: that could reap a child someone else is waiting for.
    if !child.is_valid() {
        return Err(Error::InvalidChild(child));
    }

    let reported = retry_on_interrupt(interruptible, || platform.wait_pid(child, options))
        .map_err(|err| match err {
            Error::Io(_, source) => Error::WaitFailed { pid: child, source },
            other => other,
        })?;

    match reported {
        Some((pid, status)) => {
            dev_debug!("child {pid} reported {status:?}");
            REPOLL_REQUESTED.store(true, Ordering::Release);
            Ok(PendingChildStatus::Available(pid, status))
        }
        None => Ok(PendingChildStatus::NotYet),
    }
}

/// Block until `child` terminates and reap it.
///
/// Interruptions are retried. An error means `waitpid` misbehaved, most likely because the
/// operating system lost track of the child.
pub fn wait_for_termination<P: Platform>(
    platform: &P,
    child: ProcessId,
    interruptible: Interruptible<'_>,
) -> Result<WaitStatus, Error> {
    match get_child_status(platform, child, WaitOptions::new(), interruptible)? {
        PendingChildStatus::Available(_, status) => Ok(status),
        // waitpid without WNOHANG does not come back empty-handed
        PendingChildStatus::NotYet => Err(Error::WaitFailed {
            pid: child,
            source: io::ErrorKind::UnexpectedEof.into(),
        }),
    }
}

/// Check whether `child` changed state, without blocking.
///
/// `options` may ask for stopped or continued children to be reported as well; it is always
/// combined with [`WaitOptions::no_hang`].
pub fn poll_child_status<P: Platform>(
    platform: &P,
    child: ProcessId,
    options: WaitOptions,
) -> Result<PendingChildStatus, Error> {
    get_child_status(platform, child, options.no_hang(), Interruptible::No)
}

#[cfg(test)]
mod tests {
    use libc::{SIGKILL, SIGSTOP};

    use super::*;
    use crate::system::{fake::FakePlatform, interface::RealPlatform, kill};

    fn spawn_sh(script: &str) -> ProcessId {
        let command = std::process::Command::new("sh")
            .args(["-c", script])
            .spawn()
            .unwrap();

        ProcessId::new(command.id() as i32)
    }

    #[test]
    fn exit_status() {
        let command_pid = spawn_sh("sleep 0.1; exit 42");

        let (pid, status) = command_pid.wait(WaitOptions::new()).unwrap();
        assert_eq!(command_pid, pid);
        assert!(status.did_exit());
        assert_eq!(status.exit_status(), Some(42));

        assert!(!status.was_signaled());
        assert!(status.term_signal().is_none());
        assert!(!status.was_stopped());
        assert!(status.stop_signal().is_none());
        assert!(!status.did_continue());

        // Waiting when there are no children should fail.
        let WaitError::Io(err) = command_pid.wait(WaitOptions::new()).unwrap_err() else {
            panic!("`WaitError::NotReady` without `WaitOptions::no_hang`");
        };
        assert_eq!(err.raw_os_error(), Some(libc::ECHILD));
    }

    #[test]
    fn signals() {
        let command_pid = spawn_sh("sleep 1; exit 42");

        kill(command_pid, SIGSTOP).unwrap();

        let (pid, status) = command_pid.wait(WaitOptions::new().untraced()).unwrap();
        assert_eq!(command_pid, pid);
        assert_eq!(status.stop_signal(), Some(SIGSTOP));

        kill(command_pid, SIGKILL).unwrap();

        let status = wait_for_termination(&RealPlatform, command_pid, Interruptible::No).unwrap();
        assert!(status.was_signaled());
        assert_eq!(status.term_signal(), Some(SIGKILL));
        assert_eq!(format!("{status:?}"), "TermSignal(SIGKILL)");

        assert!(!status.did_exit());
        assert!(status.exit_status().is_none());
        assert!(!status.was_stopped());
        assert!(status.stop_signal().is_none());
        assert!(!status.did_continue());
    }

    #[test]
    fn polling_never_blocks() {
        let command_pid = spawn_sh("sleep 0.1; exit 42");

        let mut count = 0;
        let (pid, status) = loop {
            match poll_child_status(&RealPlatform, command_pid, WaitOptions::new()).unwrap() {
                PendingChildStatus::Available(pid, status) => break (pid, status),
                PendingChildStatus::NotYet => {
                    count += 1;
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
            }
        };

        assert_eq!(command_pid, pid);
        assert_eq!(status.exit_status(), Some(42));
        assert!(count > 0);
    }

    #[test]
    fn wildcard_pids_are_rejected() {
        let platform = FakePlatform::new();
        for pid in [0, -1, -42] {
            let err = poll_child_status(&platform, ProcessId::new(pid), WaitOptions::new())
                .unwrap_err();
            assert!(matches!(err, Error::InvalidChild(p) if p.get() == pid));
        }
        assert!(platform.calls().is_empty());
    }

    #[test]
    fn interrupted_waits_are_retried() {
        let platform = FakePlatform::new();
        let child = ProcessId::new(1234);
        platform.interrupt_next(3);
        platform.push_wait_result(Ok(Some((child, WaitStatus::from_raw(0)))));

        take_repoll_request();
        let status = wait_for_termination(&platform, child, Interruptible::No).unwrap();
        assert_eq!(status.exit_status(), Some(0));
        assert!(take_repoll_request());
    }

    #[test]
    fn broken_waitpid_is_reported() {
        let platform = FakePlatform::new();
        let child = ProcessId::new(77);
        platform.push_wait_result(Err(io::Error::from_raw_os_error(libc::ECHILD)));

        let err = wait_for_termination(&platform, child, Interruptible::No).unwrap_err();
        let Error::WaitFailed { pid, source } = err else {
            panic!("expected a wait failure");
        };
        assert_eq!(pid, child);
        assert_eq!(source.raw_os_error(), Some(libc::ECHILD));
    }

    #[test]
    fn without_a_report_only_blocking_waits_fail() {
        let platform = FakePlatform::new();
        let child = ProcessId::new(9);

        let options = WaitOptions::new().untraced();
        assert_eq!(
            poll_child_status(&platform, child, options).unwrap(),
            PendingChildStatus::NotYet
        );
        let err = wait_for_termination(&platform, child, Interruptible::No).unwrap_err();
        let Error::WaitFailed { source, .. } = err else {
            panic!("expected a wait failure");
        };
        assert_eq!(source.raw_os_error(), Some(libc::ECHILD));
    }

    #[test]
    fn no_report_is_not_yet() {
        let platform = FakePlatform::new();
        let child = ProcessId::new(9);
        platform.push_wait_result(Ok(None));
        assert_eq!(
            poll_child_status(&platform, child, WaitOptions::new()).unwrap(),
            PendingChildStatus::NotYet
        );
    }
}

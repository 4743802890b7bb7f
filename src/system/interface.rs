use std::{fmt::Display, io, os::fd::RawFd};

use super::{
    signal::SignalNumber,
    term::{mode::TerminalMode, EmergencyRestore, TermSize},
    wait::{Wait, WaitError, WaitOptions, WaitStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(libc::pid_t);

impl ProcessId {
    pub fn new(id: libc::pid_t) -> Self {
        Self(id)
    }

    pub fn get(&self) -> libc::pid_t {
        self.0
    }

    /// Whether this ID names one specific process, as opposed to a process group or "any child".
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

impl Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The operating system services the terminal and job-control managers are written against.
///
/// Every method performs a single system call (or the smallest group of calls that has to happen
/// together). Interruptions are reported as [`io::ErrorKind::Interrupted`]; retrying is up to the
/// caller, see [`retry_on_interrupt`](super::retry::retry_on_interrupt).
pub trait Platform {
    fn terminal_mode(&self, fd: RawFd) -> io::Result<TerminalMode>;
    /// Apply `mode` once the pending output has been written, discarding pending input if `flush`
    /// is set.
    fn set_terminal_mode(&self, fd: RawFd, mode: &TerminalMode, flush: bool) -> io::Result<()>;
    /// Restart output that was suspended with `C-s`.
    fn resume_output(&self, fd: RawFd) -> io::Result<()>;
    /// Wait until all output written to `fd` has been transmitted.
    fn drain_output(&self, fd: RawFd) -> io::Result<()>;
    /// Turn `SIGIO` on input for `fd` on or off.
    fn set_async_input(&self, fd: RawFd, enabled: bool) -> io::Result<()>;
    /// Arrange for the terminal on `fd` to be put back into `mode` if the process dies of a
    /// fatal signal. `None` if that is not possible.
    fn restore_on_fatal_signal(&self, fd: RawFd, mode: &TerminalMode) -> Option<EmergencyRestore>;
    fn window_size(&self, fd: RawFd) -> io::Result<TermSize>;
    fn set_window_size(&self, fd: RawFd, size: TermSize) -> io::Result<()>;
    fn foreground_process_group(&self, fd: RawFd) -> io::Result<ProcessId>;
    /// Change the foreground process group of the terminal without being stopped by `SIGTTOU`
    /// when we are not in the foreground ourselves.
    fn set_foreground_process_group(&self, fd: RawFd, pgrp: ProcessId) -> io::Result<()>;
    fn set_process_group(&self, pid: ProcessId, pgrp: ProcessId) -> io::Result<()>;
    fn process_id(&self) -> ProcessId;
    fn process_group(&self) -> ProcessId;
    fn send_signal(&self, pid: ProcessId, signal: SignalNumber) -> io::Result<()>;
    /// Returns `None` if `options` asked not to block and the child has nothing to report.
    fn wait_pid(
        &self,
        pid: ProcessId,
        options: WaitOptions,
    ) -> io::Result<Option<(ProcessId, WaitStatus)>>;
}

/// [`Platform`] backed by the POSIX calls of the running system.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealPlatform;

impl Platform for RealPlatform {
    fn terminal_mode(&self, fd: RawFd) -> io::Result<TerminalMode> {
        super::term::mode::tcgetattr(fd)
    }

    fn set_terminal_mode(&self, fd: RawFd, mode: &TerminalMode, flush: bool) -> io::Result<()> {
        super::term::mode::tcsetattr(fd, mode, flush)
    }

    fn resume_output(&self, fd: RawFd) -> io::Result<()> {
        crate::cutils::cerr(unsafe { libc::tcflow(fd, libc::TCOON) }).map(|_| ())
    }

    fn drain_output(&self, fd: RawFd) -> io::Result<()> {
        crate::cutils::cerr(unsafe { libc::tcdrain(fd) }).map(|_| ())
    }

    fn set_async_input(&self, fd: RawFd, enabled: bool) -> io::Result<()> {
        super::term::set_async_input(fd, enabled)
    }

    fn restore_on_fatal_signal(&self, fd: RawFd, mode: &TerminalMode) -> Option<EmergencyRestore> {
        super::term::emergency::register(fd, mode)
    }

    fn window_size(&self, fd: RawFd) -> io::Result<TermSize> {
        super::term::window_size(fd)
    }

    fn set_window_size(&self, fd: RawFd, size: TermSize) -> io::Result<()> {
        super::term::set_window_size(fd, size)
    }

    fn foreground_process_group(&self, fd: RawFd) -> io::Result<ProcessId> {
        use super::term::Terminal;
        fd.tcgetpgrp()
    }

    fn set_foreground_process_group(&self, fd: RawFd, pgrp: ProcessId) -> io::Result<()> {
        super::term::tcsetpgrp_without_stopping(fd, pgrp)
    }

    fn set_process_group(&self, pid: ProcessId, pgrp: ProcessId) -> io::Result<()> {
        super::setpgid(pid, pgrp)
    }

    fn process_id(&self) -> ProcessId {
        super::getpid()
    }

    fn process_group(&self) -> ProcessId {
        super::getpgrp()
    }

    fn send_signal(&self, pid: ProcessId, signal: SignalNumber) -> io::Result<()> {
        super::kill(pid, signal)
    }

    fn wait_pid(
        &self,
        pid: ProcessId,
        options: WaitOptions,
    ) -> io::Result<Option<(ProcessId, WaitStatus)>> {
        match pid.wait(options) {
            Ok(reported) => Ok(Some(reported)),
            Err(WaitError::NotReady) => Ok(None),
            Err(WaitError::Io(err)) => Err(err),
        }
    }
}

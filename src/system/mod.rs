use std::io;

use crate::cutils::cerr;
use interface::ProcessId;
use signal::SignalNumber;

// generalized traits for when we want to hide implementations
pub mod interface;

pub mod file;

pub mod retry;

pub mod signal;

pub mod term;

pub mod wait;

#[cfg(test)]
pub(crate) mod fake;

pub(crate) fn _exit(status: libc::c_int) -> ! {
    unsafe { libc::_exit(status) }
}

#[cfg(test)]
pub(crate) enum ForkResult {
    // Parent process branch with the child process' PID.
    Parent(ProcessId),
    // Child process branch.
    Child,
}

/// Create a new process.
///
/// # Safety
///
/// In a multithreaded program, only async-signal-safe functions are guaranteed to work in the
/// child process until a call to `execve` or a similar function is done.
#[cfg(test)]
pub(crate) unsafe fn fork() -> io::Result<ForkResult> {
    let pid = cerr(unsafe { libc::fork() })?;
    if pid == 0 {
        Ok(ForkResult::Child)
    } else {
        Ok(ForkResult::Parent(ProcessId::new(pid)))
    }
}

/// Send a signal to a process with the specified ID.
///
/// A process ID of zero addresses every process in the caller's process group.
pub fn kill(pid: ProcessId, signal: SignalNumber) -> io::Result<()> {
    // SAFETY: This function cannot cause UB even if `pid` is not a valid process ID or if
    // `signal` is not a valid signal code.
    cerr(unsafe { libc::kill(pid.get(), signal) }).map(|_| ())
}

/// Get the process ID of the current process.
pub fn getpid() -> ProcessId {
    ProcessId::new(unsafe { libc::getpid() })
}

/// Get the process group ID of the current process.
pub fn getpgrp() -> ProcessId {
    ProcessId::new(unsafe { libc::getpgrp() })
}

/// Get a process group ID.
pub fn getpgid(pid: ProcessId) -> io::Result<ProcessId> {
    // SAFETY: This function cannot cause UB even if `pid` is not a valid process ID
    cerr(unsafe { libc::getpgid(pid.get()) }).map(ProcessId::new)
}

/// Set a process group ID. A `pid` of zero means the calling process, a `pgid` of zero means
/// the process group whose ID equals `pid`.
pub fn setpgid(pid: ProcessId, pgid: ProcessId) -> io::Result<()> {
    cerr(unsafe { libc::setpgid(pid.get(), pgid.get()) }).map(|_| ())
}

/// Start a new session with the calling process as its leader and without a controlling
/// terminal.
pub fn setsid() -> io::Result<ProcessId> {
    cerr(unsafe { libc::setsid() }).map(ProcessId::new)
}

pub fn make_zeroed_sigaction() -> libc::sigaction {
    // SAFETY: since sigaction is a C struct, all-zeroes is a valid representation
    // We cannot use a "literal struct" initialization method since the exact representation
    // of libc::sigaction is not fixed.
    unsafe { std::mem::zeroed() }
}

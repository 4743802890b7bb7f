use crate::system::{interface::ProcessId, signal::signal_name};
use std::{fmt, io, path::PathBuf};

#[derive(Debug)]
pub enum Error {
    /// The user asked to quit while a retrying operation was waiting.
    Quit,
    Io(Option<PathBuf>, io::Error),
    /// A write failed after `written` bytes had already been transferred.
    Write {
        written: usize,
        source: io::Error,
    },
    /// `waitpid` failed for a reason other than an interruption, most likely because the
    /// operating system lost track of the child.
    WaitFailed {
        pid: ProcessId,
        source: io::Error,
    },
    /// Waiting was requested for something that is not a specific child.
    InvalidChild(ProcessId),
    Configuration(String),
    AlreadyInitialized(&'static str),
    /// A child could not be started.
    Spawn(PathBuf, io::Error),
    /// The child was terminated by the given signal.
    Signaled(libc::c_int),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Quit => f.write_str("Quit"),
            Error::Io(location, e) => {
                if let Some(path) = location {
                    write!(f, "{}: {e}", path.display())
                } else {
                    write!(f, "IO error: {e}")
                }
            }
            Error::Write { written, source } => {
                write!(f, "write failed after {written} bytes: {source}")
            }
            Error::WaitFailed { pid, source } => {
                write!(f, "cannot wait for process {pid}: {source}")
            }
            Error::InvalidChild(pid) => write!(f, "{pid} is not a valid child process ID"),
            Error::Configuration(e) => write!(f, "invalid configuration: {e}"),
            Error::AlreadyInitialized(what) => write!(f, "{what} has already been initialized"),
            Error::Spawn(path, e) => write!(f, "cannot execute '{}': {e}", path.display()),
            Error::Signaled(signal) => match signal_name(*signal) {
                Some(name) => write!(f, "terminated by {name}"),
                None => write!(f, "terminated by signal {signal}"),
            },
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(_, e)
            | Error::Write { source: e, .. }
            | Error::WaitFailed { source: e, .. }
            | Error::Spawn(_, e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(None, err)
    }
}

impl Error {
    /// Attach the path an I/O error is about.
    pub fn with_path(self, path: impl Into<PathBuf>) -> Self {
        match self {
            Error::Io(None, e) => Error::Io(Some(path.into()), e),
            other => other,
        }
    }

    /// Returns `true` if the error is [`Quit`].
    ///
    /// [`Quit`]: Error::Quit
    #[must_use]
    pub fn is_quit(&self) -> bool {
        matches!(self, Self::Quit)
    }

    /// The OS error code behind this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Io(_, e)
            | Error::Write { source: e, .. }
            | Error::WaitFailed { source: e, .. }
            | Error::Spawn(_, e) => e.raw_os_error(),
            _ => None,
        }
    }
}

pub(crate) mod emergency;
pub mod mode;
pub mod pgroup;
pub mod serial;
pub mod tty;

pub use emergency::EmergencyRestore;

use std::{
    ffi::{c_uchar, CString},
    fs::File,
    io,
    mem::MaybeUninit,
    os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
    ptr::null_mut,
};

use crate::cutils::cerr;

use super::{
    interface::ProcessId,
    retry::retry_io,
    signal::{consts::SIGTTOU, MaskGuard, SignalSet},
};

/// The size of a terminal window, in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSize {
    pub rows: u16,
    pub cols: u16,
}

/// Get the window size of the terminal on `fd`.
pub fn window_size(fd: RawFd) -> io::Result<TermSize> {
    let mut size = MaybeUninit::<libc::winsize>::zeroed();
    cerr(unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, size.as_mut_ptr()) })?;
    let size = unsafe { size.assume_init() };
    Ok(TermSize {
        rows: size.ws_row,
        cols: size.ws_col,
    })
}

/// Set the logical window size of the terminal on `fd`, mostly useful for the leader side of a
/// pseudo-terminal.
pub fn set_window_size(fd: RawFd, size: TermSize) -> io::Result<()> {
    let size = libc::winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    cerr(unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &size) }).map(|_| ())
}

/// Make `pgrp` the foreground process group of the terminal on `fd`.
///
/// A process in the background that changes the foreground group gets `SIGTTOU`, which would
/// stop us, so it is blocked for the duration of the call.
pub fn tcsetpgrp_without_stopping(fd: RawFd, pgrp: ProcessId) -> io::Result<()> {
    let _guard = MaskGuard::block(&SignalSet::of(&[SIGTTOU]))?;
    retry_io(|| fd.tcsetpgrp(pgrp))
}

/// Have the terminal on `fd` send `SIGIO` to this process whenever input arrives, or stop it
/// from doing so.
pub fn set_async_input(fd: RawFd, enabled: bool) -> io::Result<()> {
    let flags = cerr(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    let flags = if enabled {
        cerr(unsafe { libc::fcntl(fd, libc::F_SETOWN, libc::getpid()) })?;
        flags | libc::O_ASYNC
    } else {
        flags & !libc::O_ASYNC
    };
    cerr(unsafe { libc::fcntl(fd, libc::F_SETFL, flags) }).map(|_| ())
}

pub(crate) struct Pty {
    /// The file path of the follower side of the pty.
    pub(crate) path: CString,
    /// The leader side of the pty.
    pub(crate) leader: PtyLeader,
    /// The follower side of the pty.
    pub(crate) follower: PtyFollower,
}

impl Pty {
    pub(crate) fn open() -> io::Result<Self> {
        const PATH_MAX: usize = libc::PATH_MAX as _;
        // Allocate a buffer to hold the path to the pty.
        let mut path = vec![0 as c_uchar; PATH_MAX];
        // Create two integers to hold the file descriptors for each side of the pty.
        let (mut leader, mut follower) = (0, 0);

        cerr(unsafe {
            libc::openpty(
                &mut leader,
                &mut follower,
                path.as_mut_ptr().cast(),
                null_mut::<libc::termios>(),
                null_mut::<libc::winsize>(),
            )
        })?;

        let leader = PtyLeader {
            file: unsafe { OwnedFd::from_raw_fd(leader) }.into(),
        };
        let follower = PtyFollower {
            file: unsafe { OwnedFd::from_raw_fd(follower) }.into(),
        };

        if let Some(end) = path.iter().position(|&byte| byte == 0) {
            path.truncate(end);
        }
        let path = CString::new(path)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        Ok(Self {
            path,
            leader,
            follower,
        })
    }
}

pub(crate) struct PtyLeader {
    file: File,
}

impl io::Read for PtyLeader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl io::Write for PtyLeader {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl AsRawFd for PtyLeader {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl AsFd for PtyLeader {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

pub(crate) struct PtyFollower {
    file: File,
}

impl PtyFollower {
    pub(crate) fn try_clone(&self) -> io::Result<Self> {
        self.file.try_clone().map(|file| Self { file })
    }
}

impl AsRawFd for PtyFollower {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl From<PtyFollower> for std::process::Stdio {
    fn from(follower: PtyFollower) -> Self {
        follower.file.into()
    }
}

mod sealed {
    use std::os::fd::AsRawFd;

    pub(crate) trait Sealed {}

    impl<F: AsRawFd> Sealed for F {}
}

pub(crate) trait Terminal: sealed::Sealed {
    fn tcgetpgrp(&self) -> io::Result<ProcessId>;
    fn tcsetpgrp(&self, pgrp: ProcessId) -> io::Result<()>;
}

impl<F: AsRawFd> Terminal for F {
    /// Get the foreground process group ID associated with this terminal.
    fn tcgetpgrp(&self) -> io::Result<ProcessId> {
        cerr(unsafe { libc::tcgetpgrp(self.as_raw_fd()) }).map(ProcessId::new)
    }

    /// Set the foreground process group ID associated with this terminal to `pgrp`.
    fn tcsetpgrp(&self, pgrp: ProcessId) -> io::Result<()> {
        cerr(unsafe { libc::tcsetpgrp(self.as_raw_fd(), pgrp.get()) }).map(|_| ())
    }
}

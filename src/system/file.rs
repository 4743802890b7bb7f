//! File-descriptor level I/O that never reports `EINTR`.
//!
//! Every descriptor this module creates is close-on-exec.
use std::{
    ffi::CStr,
    io,
    mem::MaybeUninit,
    os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd},
    path::Path,
};

use crate::{
    common::Error,
    cutils::{cerr, path_to_cstring},
    log::dev_warn,
};

use super::retry::{retry_io, retry_on_interrupt, Interruptible};

/// The largest transfer a single `read` or `write` is asked to do. Some kernels misbehave for
/// counts of 2 GiB and more; this is `INT_MAX` rounded down to a multiple of a large page.
pub const MAX_RW_COUNT: usize = ((i32::MAX >> 18) << 18) as usize;

const NULL_DEVICE: &CStr = match CStr::from_bytes_with_nul(b"/dev/null\0") {
    Ok(path) => path,
    Err(_) => panic!("null device path is not nul-terminated"),
};

fn dir_fd(dir: Option<BorrowedFd<'_>>) -> RawFd {
    dir.map_or(libc::AT_FDCWD, |fd| fd.as_raw_fd())
}

/// Open `path` relative to `dir` (the working directory if `None`).
pub fn openat(
    dir: Option<BorrowedFd<'_>>,
    path: &Path,
    flags: libc::c_int,
    mode: libc::mode_t,
    interruptible: Interruptible<'_>,
) -> Result<OwnedFd, Error> {
    let c_path = path_to_cstring(path).map_err(|e| Error::Io(Some(path.into()), e))?;
    let dirfd = dir_fd(dir);
    let fd = retry_on_interrupt(interruptible, || {
        cerr(unsafe {
            libc::openat(
                dirfd,
                c_path.as_ptr(),
                flags | libc::O_CLOEXEC,
                libc::c_uint::from(mode),
            )
        })
    })
    .map_err(|e| e.with_path(path))?;

    // SAFETY: `openat` just handed us this descriptor
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

pub fn open(
    path: &Path,
    flags: libc::c_int,
    mode: libc::mode_t,
    interruptible: Interruptible<'_>,
) -> Result<OwnedFd, Error> {
    openat(None, path, flags, mode, interruptible)
}

/// Close a file descriptor.
///
/// The descriptor is gone afterwards whatever the outcome. An interrupted close is treated as a
/// successful one and never retried: the descriptor may already have been reused by then.
pub fn close(fd: OwnedFd) -> io::Result<()> {
    let raw = fd.into_raw_fd();
    match cerr(unsafe { libc::close(raw) }) {
        Ok(_) => Ok(()),
        Err(err) if matches!(err.raw_os_error(), Some(libc::EINTR | libc::EINPROGRESS)) => {
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Read at most `buf.len()` bytes, returning as soon as any data is available.
pub fn read(
    fd: impl AsFd,
    buf: &mut [u8],
    interruptible: Interruptible<'_>,
) -> Result<usize, Error> {
    let raw = fd.as_fd().as_raw_fd();
    let count = buf.len().min(MAX_RW_COUNT);
    retry_on_interrupt(interruptible, || {
        cerr(unsafe { libc::read(raw, buf.as_mut_ptr().cast(), count) }).map(|n| n as usize)
    })
}

/// Write all of `buf`, returning its length.
///
/// On failure the number of bytes that did make it out is reported in [`Error::Write`]. A quit
/// request under [`Interruptible::Quit`] is reported as [`Error::Quit`].
pub fn write_all(
    fd: impl AsFd,
    buf: &[u8],
    interruptible: Interruptible<'_>,
) -> Result<usize, Error> {
    let raw = fd.as_fd().as_raw_fd();
    let mut written = 0;

    while written < buf.len() {
        let rest = &buf[written..];
        let count = rest.len().min(MAX_RW_COUNT);
        let result = retry_on_interrupt(interruptible, || {
            cerr(unsafe { libc::write(raw, rest.as_ptr().cast(), count) }).map(|n| n as usize)
        });

        match result {
            Ok(0) => {
                return Err(Error::Write {
                    written,
                    source: io::ErrorKind::WriteZero.into(),
                })
            }
            Ok(n) => written += n,
            Err(Error::Io(_, source)) => return Err(Error::Write { written, source }),
            Err(other) => return Err(other),
        }
    }

    Ok(written)
}

/// Create a pipe, returning the read and the write end.
pub fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1; 2];

    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    cerr(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) })?;

    #[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
    {
        cerr(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
        for fd in fds {
            cerr(unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) })?;
        }
    }

    // SAFETY: `pipe` just handed us these descriptors
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

pub fn fstat(fd: impl AsFd) -> io::Result<libc::stat> {
    let raw = fd.as_fd().as_raw_fd();
    let mut stat = MaybeUninit::<libc::stat>::uninit();
    retry_io(|| cerr(unsafe { libc::fstat(raw, stat.as_mut_ptr()) }))?;
    // SAFETY: `fstat` succeeded so `stat` was filled in
    Ok(unsafe { stat.assume_init() })
}

pub fn fstatat(
    dir: Option<BorrowedFd<'_>>,
    path: &Path,
    flags: libc::c_int,
) -> io::Result<libc::stat> {
    let c_path = path_to_cstring(path)?;
    let dirfd = dir_fd(dir);
    let mut stat = MaybeUninit::<libc::stat>::uninit();
    retry_io(|| {
        cerr(unsafe { libc::fstatat(dirfd, c_path.as_ptr(), stat.as_mut_ptr(), flags) })
    })?;
    // SAFETY: `fstatat` succeeded so `stat` was filled in
    Ok(unsafe { stat.assume_init() })
}

pub fn rename(from: &Path, to: &Path) -> io::Result<()> {
    let from = path_to_cstring(from)?;
    let to = path_to_cstring(to)?;
    retry_io(|| cerr(unsafe { libc::rename(from.as_ptr(), to.as_ptr()) })).map(|_| ())
}

/// Rename without replacing an existing destination.
///
/// Fails with `EEXIST` if `to` exists, and with `ENOSYS` where the system cannot do this
/// atomically.
pub fn renameat_noreplace(
    from_dir: Option<BorrowedFd<'_>>,
    from: &Path,
    to_dir: Option<BorrowedFd<'_>>,
    to: &Path,
) -> io::Result<()> {
    let from = path_to_cstring(from)?;
    let to = path_to_cstring(to)?;
    retry_io(|| rename_noreplace(dir_fd(from_dir), &from, dir_fd(to_dir), &to))
}

#[cfg(target_os = "linux")]
fn rename_noreplace(from_dir: RawFd, from: &CStr, to_dir: RawFd, to: &CStr) -> io::Result<()> {
    cerr(unsafe {
        libc::syscall(
            libc::SYS_renameat2,
            from_dir,
            from.as_ptr(),
            to_dir,
            to.as_ptr(),
            libc::RENAME_NOREPLACE,
        )
    })
    .map(|_| ())
}

#[cfg(not(target_os = "linux"))]
fn rename_noreplace(_: RawFd, _: &CStr, _: RawFd, _: &CStr) -> io::Result<()> {
    Err(io::Error::from_raw_os_error(libc::ENOSYS))
}

pub fn unlink(path: &Path) -> io::Result<()> {
    let path = path_to_cstring(path)?;
    retry_io(|| cerr(unsafe { libc::unlink(path.as_ptr()) })).map(|_| ())
}

pub fn mkdir(path: &Path, mode: libc::mode_t) -> io::Result<()> {
    let path = path_to_cstring(path)?;
    retry_io(|| cerr(unsafe { libc::mkdir(path.as_ptr(), mode) })).map(|_| ())
}

pub fn rmdir(path: &Path) -> io::Result<()> {
    let path = path_to_cstring(path)?;
    retry_io(|| cerr(unsafe { libc::rmdir(path.as_ptr()) })).map(|_| ())
}

/// Create a symbolic link at `link` pointing to `target`.
pub fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    let target = path_to_cstring(target)?;
    let link = path_to_cstring(link)?;
    retry_io(|| cerr(unsafe { libc::symlink(target.as_ptr(), link.as_ptr()) })).map(|_| ())
}

/// Wait until all output written to `fd` has been transmitted.
pub fn tcdrain(fd: impl AsFd) -> io::Result<()> {
    let raw = fd.as_fd().as_raw_fd();
    retry_io(|| cerr(unsafe { libc::tcdrain(raw) })).map(|_| ())
}

/// Make sure `fd` is open, opening the null device with `flags` on it if it is not.
fn force_open(fd: RawFd, flags: libc::c_int) -> Result<(), Error> {
    match cerr(unsafe { libc::fcntl(fd, libc::F_GETFD) }) {
        Ok(_) => return Ok(()),
        Err(err) if err.raw_os_error() == Some(libc::EBADF) => {}
        Err(err) => return Err(err.into()),
    }

    let null_error = |err| Error::Io(Some(Path::new("/dev/null").into()), err);
    // no O_CLOEXEC: these descriptors are meant to be inherited
    let opened = retry_io(|| cerr(unsafe { libc::open(NULL_DEVICE.as_ptr(), flags) }))
        .map_err(null_error)?;
    if opened != fd {
        let dup = cerr(unsafe { libc::dup2(opened, fd) });
        // SAFETY: `opened` is ours and not used after this
        close(unsafe { OwnedFd::from_raw_fd(opened) }).map_err(null_error)?;
        dup.map_err(null_error)?;
    }
    dev_warn!("descriptor {fd} was closed, opened the null device on it");
    Ok(())
}

/// Make sure the standard descriptors are open so later `open` calls cannot land on them.
///
/// Missing ones are opened on the null device in the direction opposite to their normal use, so
/// that accidental I/O on them fails the way it would on a closed descriptor.
pub fn init_standard_fds() -> Result<(), Error> {
    force_open(libc::STDIN_FILENO, libc::O_WRONLY)?;
    force_open(libc::STDOUT_FILENO, libc::O_RDONLY)?;
    force_open(libc::STDERR_FILENO, libc::O_RDONLY)?;
    Ok(())
}

use std::{
    ffi::{CString, OsStr},
    io,
    os::unix::prelude::OsStrExt,
    path::Path,
};

pub fn cerr<Int: Copy + TryInto<libc::c_long>>(res: Int) -> std::io::Result<Int> {
    match res.try_into() {
        Ok(-1) => Err(std::io::Error::last_os_error()),
        _ => Ok(res),
    }
}

extern "C" {
    #[cfg_attr(
        any(target_os = "macos", target_os = "ios", target_os = "freebsd"),
        link_name = "__error"
    )]
    #[cfg_attr(
        any(target_os = "openbsd", target_os = "netbsd", target_os = "android"),
        link_name = "__errno"
    )]
    #[cfg_attr(target_os = "linux", link_name = "__errno_location")]
    fn errno_location() -> *mut libc::c_int;
}

pub fn set_errno(no: libc::c_int) {
    unsafe { *errno_location() = no };
}

/// Read the calling thread's `errno`. Async-signal-safe.
pub fn errno() -> libc::c_int {
    unsafe { *errno_location() }
}

/// Saves `errno` on creation and puts it back when dropped.
///
/// Signal handlers use this so the interrupted code never observes an `errno` clobbered by the
/// handler.
pub(crate) struct ErrnoGuard(libc::c_int);

impl ErrnoGuard {
    pub(crate) fn save() -> Self {
        Self(errno())
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        set_errno(self.0)
    }
}

/// Convert a path into a C string, failing with `InvalidInput` on interior NUL bytes.
pub fn path_to_cstring(path: &Path) -> io::Result<CString> {
    os_str_to_cstring(path.as_os_str())
}

pub fn os_str_to_cstring(s: &OsStr) -> io::Result<CString> {
    CString::new(s.as_bytes()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "path contains an interior nul byte",
        )
    })
}

/// Rust's standard library IsTerminal just directly calls isatty, which
/// we don't want since this performs IOCTL calls on them and file descriptors are under
/// the control of the user; so this checks if they are a character device first.
pub fn safe_isatty(fildes: libc::c_int) -> bool {
    // The Rust standard library doesn't have FileTypeExt on Std{in,out,err}, so we
    // can't just use FileTypeExt::is_char_device and have to resort to libc::fstat.
    let mut maybe_stat = std::mem::MaybeUninit::<libc::stat>::uninit();
    if unsafe { libc::fstat(fildes, maybe_stat.as_mut_ptr()) } == 0 {
        let mode = unsafe { maybe_stat.assume_init() }.st_mode;

        // To complicate matters further, the S_ISCHR macro isn't in libc as well.
        let is_char_device = (mode & libc::S_IFMT) == libc::S_IFCHR;

        if is_char_device {
            unsafe { libc::isatty(fildes) != 0 }
        } else {
            false
        }
    } else {
        false
    }
}

/// Async-signal-safe helpers for the fatal signal path, where neither the heap nor `std::io`
/// may be touched.
pub(crate) mod raw {
    /// Write all of `buf` to `fd` with plain `write` calls, retrying on `EINTR` and giving up on
    /// any other error.
    pub(crate) fn write_all(fd: libc::c_int, mut buf: &[u8]) {
        while !buf.is_empty() {
            let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
            if n < 0 {
                if super::errno() == libc::EINTR {
                    continue;
                }
                return;
            }
            buf = &buf[n as usize..];
        }
    }

    /// Format `n` in decimal into `buf`, returning the used tail of the buffer.
    pub(crate) fn format_decimal(n: i64, buf: &mut [u8; 20]) -> &[u8] {
        let negative = n < 0;
        let mut value = n.unsigned_abs();
        let mut pos = buf.len();
        loop {
            pos -= 1;
            buf[pos] = b'0' + (value % 10) as u8;
            value /= 10;
            if value == 0 {
                break;
            }
        }
        if negative {
            pos -= 1;
            buf[pos] = b'-';
        }
        &buf[pos..]
    }
}

#[cfg(test)]
mod test {
    use super::raw::format_decimal;

    #[test]
    fn errno_guard_restores() {
        super::set_errno(libc::EAGAIN);
        {
            let _guard = super::ErrnoGuard::save();
            super::set_errno(libc::EBADF);
            assert_eq!(super::errno(), libc::EBADF);
        }
        assert_eq!(super::errno(), libc::EAGAIN);
    }

    #[test]
    fn decimal_formatting() {
        let mut buf = [0; 20];
        assert_eq!(format_decimal(0, &mut buf), b"0");
        assert_eq!(format_decimal(11, &mut buf), b"11");
        assert_eq!(format_decimal(-42, &mut buf), b"-42");
        assert_eq!(
            format_decimal(i64::MIN, &mut buf),
            b"-9223372036854775808"
        );
    }

    #[test]
    fn nul_in_path_is_rejected() {
        let err = super::path_to_cstring(std::path::Path::new("a\0b")).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_tty() {
        use std::fs::File;
        use std::os::fd::AsRawFd;
        assert!(!super::safe_isatty(
            File::open("/bin/sh").unwrap().as_raw_fd()
        ));
        assert!(!super::safe_isatty(-837492));
        let (mut leader, mut follower) = Default::default();
        assert!(
            unsafe {
                libc::openpty(
                    &mut leader,
                    &mut follower,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                )
            } == 0
        );
        assert!(super::safe_isatty(leader));
        assert!(super::safe_isatty(follower));
        unsafe {
            libc::close(follower);
            libc::close(leader);
        }
    }
}

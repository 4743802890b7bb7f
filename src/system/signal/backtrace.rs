//! Async-signal-safe backtraces for fatal errors.
use std::{
    cell::UnsafeCell,
    ffi::c_void,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{common::config::BACKTRACE_LIMIT_MAX, cutils::raw};

const FRAMES: usize = BACKTRACE_LIMIT_MAX as usize + 1;

#[cfg(any(all(target_os = "linux", target_env = "gnu"), target_os = "macos"))]
mod sys {
    use std::ffi::{c_int, c_void};

    extern "C" {
        fn backtrace(buffer: *mut *mut c_void, size: c_int) -> c_int;
        fn backtrace_symbols_fd(buffer: *const *mut c_void, size: c_int, fd: c_int);
    }

    pub(super) fn capture(frames: &mut [*mut c_void]) -> usize {
        let size = frames.len().min(c_int::MAX as usize) as c_int;
        let captured = unsafe { backtrace(frames.as_mut_ptr(), size) };
        captured.max(0) as usize
    }

    pub(super) fn print(frames: &[*mut c_void], fd: c_int) {
        unsafe { backtrace_symbols_fd(frames.as_ptr(), frames.len() as c_int, fd) }
    }
}

#[cfg(not(any(all(target_os = "linux", target_env = "gnu"), target_os = "macos")))]
mod sys {
    use std::ffi::{c_int, c_void};

    pub(super) fn capture(_: &mut [*mut c_void]) -> usize {
        0
    }

    pub(super) fn print(_: &[*mut c_void], _: c_int) {}
}

/// Frames captured by a non-main thread that hit a fatal fault, printed by the main thread when
/// it terminates.
struct ThreadBacktrace {
    frames: UnsafeCell<[*mut c_void; FRAMES]>,
    len: AtomicUsize,
}

// SAFETY: `frames` is written once by the faulting thread before `len` is published and only
// read after `len` has been observed.
unsafe impl Sync for ThreadBacktrace {}

static THREAD_BACKTRACE: ThreadBacktrace = ThreadBacktrace {
    frames: UnsafeCell::new([std::ptr::null_mut(); FRAMES]),
    len: AtomicUsize::new(0),
};

/// Load whatever the unwinder needs, so that the first backtrace taken from a signal handler
/// does not have to allocate.
pub(super) fn warm_up() {
    let mut frames = [std::ptr::null_mut(); 1];
    sys::capture(&mut frames);
}

/// Record the backtrace of the calling thread for [`print`] to pick up.
pub(super) fn save_thread_backtrace(limit: usize) {
    if limit == 0 || THREAD_BACKTRACE.len.load(Ordering::Acquire) != 0 {
        return;
    }
    let frames = unsafe { &mut *THREAD_BACKTRACE.frames.get() };
    let captured = sys::capture(&mut frames[..(limit + 1).min(FRAMES)]);
    THREAD_BACKTRACE.len.store(captured, Ordering::Release);
}

/// Write at most `limit` frames to `fd`, preferring a backtrace saved by a faulting thread.
pub(super) fn print(limit: usize, fd: libc::c_int) {
    let limit = limit.min(BACKTRACE_LIMIT_MAX as usize);
    if limit == 0 {
        return;
    }

    let saved = THREAD_BACKTRACE.len.load(Ordering::Acquire);
    let mut own = [std::ptr::null_mut(); FRAMES];
    let frames: &[*mut c_void] = if saved > 0 {
        unsafe { &(&(*THREAD_BACKTRACE.frames.get()))[..saved] }
    } else {
        // one more than asked for, to know whether the output was cut short
        let captured = sys::capture(&mut own[..limit + 1]);
        &own[..captured]
    };

    if frames.is_empty() {
        return;
    }
    raw::write_all(fd, b"Backtrace:\n");
    sys::print(&frames[..frames.len().min(limit)], fd);
    if frames.len() > limit {
        raw::write_all(fd, b"...\n");
    }
}

//! Terminal modes to put back when the process dies of a signal.
//!
//! The table is fixed size and lock free, so the fatal signal path can walk it.
use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    os::fd::RawFd,
    sync::atomic::{AtomicI32, AtomicU8, Ordering},
};

use super::mode::TerminalMode;

const SLOTS: usize = 16;

const FREE: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;

struct Slot {
    state: AtomicU8,
    fd: AtomicI32,
    mode: UnsafeCell<MaybeUninit<libc::termios>>,
}

// SAFETY: `mode` is only written by whoever moved `state` from FREE to WRITING, and only read
// while `state` is READY.
unsafe impl Sync for Slot {}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY: Slot = Slot {
    state: AtomicU8::new(FREE),
    fd: AtomicI32::new(-1),
    mode: UnsafeCell::new(MaybeUninit::uninit()),
};

static TABLE: [Slot; SLOTS] = [EMPTY; SLOTS];

/// A terminal mode that is put back if the process dies of a signal, until this is dropped.
#[derive(Debug)]
pub struct EmergencyRestore(usize);

/// Remember that the terminal on `fd` has to go back to `mode` if we die. `None` when the table
/// is full.
pub(crate) fn register(fd: RawFd, mode: &TerminalMode) -> Option<EmergencyRestore> {
    let index = TABLE.iter().position(|slot| {
        slot.state
            .compare_exchange(FREE, WRITING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    })?;

    let slot = &TABLE[index];
    unsafe { (*slot.mode.get()).write(*mode.as_raw()) };
    slot.fd.store(fd, Ordering::SeqCst);
    slot.state.store(READY, Ordering::SeqCst);
    Some(EmergencyRestore(index))
}

impl Drop for EmergencyRestore {
    fn drop(&mut self) {
        let slot = &TABLE[self.0];
        slot.state.store(WRITING, Ordering::SeqCst);
        slot.fd.store(-1, Ordering::SeqCst);
        slot.state.store(FREE, Ordering::SeqCst);
    }
}

/// Apply every registered mode right away. Async-signal-safe.
pub(crate) fn restore_all() {
    for slot in &TABLE {
        if slot.state.load(Ordering::SeqCst) != READY {
            continue;
        }
        let fd = slot.fd.load(Ordering::SeqCst);
        let mode = unsafe { (*slot.mode.get()).as_ptr() };
        unsafe { libc::tcsetattr(fd, libc::TCSANOW, mode) };
    }
}

//! Telling a stack overflow apart from other invalid memory accesses.
use std::{
    cell::UnsafeCell,
    io,
    sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicUsize, Ordering},
};

use crate::{common::config::DEFAULT_STACK_HEURISTIC_SHIFT, cutils::cerr};

use super::delivery::NonLocalExit;

pub const ALT_STACK_SIZE: usize = 64 * 1024;

#[repr(C, align(16))]
struct AltStack(UnsafeCell<[u8; ALT_STACK_SIZE]>);

// SAFETY: the buffer is only ever handed to the kernel, never accessed from Rust.
unsafe impl Sync for AltStack {}

static ALT_STACK: AltStack = AltStack(UnsafeCell::new([0; ALT_STACK_SIZE]));
static ALT_STACK_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Make the static alternate stack the signal stack of the calling thread.
pub(super) fn install_alt_stack() -> io::Result<()> {
    if ALT_STACK_INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    let stack = libc::stack_t {
        ss_sp: ALT_STACK.0.get().cast(),
        ss_flags: 0,
        ss_size: ALT_STACK_SIZE,
    };
    if let Err(err) = cerr(unsafe { libc::sigaltstack(&stack, std::ptr::null_mut()) }) {
        ALT_STACK_INSTALLED.store(false, Ordering::SeqCst);
        return Err(err);
    }
    Ok(())
}

static STACK_BOTTOM: AtomicUsize = AtomicUsize::new(0);
static STACK_TOP: AtomicUsize = AtomicUsize::new(0);
static GC_IN_PROGRESS: AtomicBool = AtomicBool::new(false);
static RECOVERY_ENABLED: AtomicBool = AtomicBool::new(false);
static HEURISTIC_SHIFT: AtomicU32 = AtomicU32::new(DEFAULT_STACK_HEURISTIC_SHIFT);
static COMMAND_LOOP_HOOK: AtomicPtr<()> = AtomicPtr::new(std::ptr::null_mut());

/// Record where the main thread's stack starts and how deep it currently goes.
///
/// The bottom is where the stack began; the top is the most recent known extent. The stack may
/// grow in either direction.
pub fn set_stack_bounds(bottom: usize, top: usize) {
    STACK_BOTTOM.store(bottom, Ordering::Relaxed);
    STACK_TOP.store(top, Ordering::Relaxed);
}

pub fn update_stack_top(top: usize) {
    STACK_TOP.store(top, Ordering::Relaxed);
}

/// Tell the fault handler whether a garbage collection is running. A fault during a collection
/// is never recoverable.
pub fn set_gc_in_progress(in_progress: bool) {
    GC_IN_PROGRESS.store(in_progress, Ordering::SeqCst);
}

/// Register the function that unwinds back to the command loop after a stack overflow.
pub fn set_command_loop_recovery_hook(hook: Option<NonLocalExit>) {
    let ptr = hook.map_or(std::ptr::null_mut(), |hook| hook as *mut ());
    COMMAND_LOOP_HOOK.store(ptr, Ordering::SeqCst);
}

pub(super) fn command_loop_hook() -> Option<NonLocalExit> {
    let ptr = COMMAND_LOOP_HOOK.load(Ordering::SeqCst);
    // SAFETY: the only non-null values ever stored are `NonLocalExit` function pointers
    (!ptr.is_null()).then(|| unsafe { std::mem::transmute::<*mut (), NonLocalExit>(ptr) })
}

pub(super) fn configure(recovery: bool, shift: u32) {
    RECOVERY_ENABLED.store(recovery, Ordering::SeqCst);
    HEURISTIC_SHIFT.store(shift, Ordering::SeqCst);
}

/// Whether a fault at `addr` is just past the top of a stack spanning `bottom..top`.
///
/// Only faults closer to the top than `1 / 2^shift` of the stack's current extent count; an
/// address exactly at the top does.
pub fn is_stack_overflow(addr: usize, bottom: usize, top: usize, shift: u32) -> bool {
    if bottom < top {
        addr >= top && addr - top < (top - bottom) >> shift
    } else {
        top >= addr && top - addr < (bottom - top) >> shift
    }
}

/// What the segmentation fault handler knows about a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegvContext {
    pub gc_in_progress: bool,
    pub on_main_thread: bool,
    pub recovery_enabled: bool,
    pub has_recovery_hook: bool,
    /// `0` when the kernel did not report an address.
    pub fault_address: usize,
    pub stack_bottom: usize,
    pub stack_top: usize,
    pub shift: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Unwind to the command loop through the registered hook.
    RecoverToCommandLoop,
    /// Treat the fault as a fatal error of the faulting thread.
    Fatal,
}

impl SegvContext {
    /// The state of the running process, for a fault at `fault_address`.
    pub(super) fn current(fault_address: usize, on_main_thread: bool) -> Self {
        Self {
            gc_in_progress: GC_IN_PROGRESS.load(Ordering::SeqCst),
            on_main_thread,
            recovery_enabled: RECOVERY_ENABLED.load(Ordering::SeqCst),
            has_recovery_hook: !COMMAND_LOOP_HOOK.load(Ordering::SeqCst).is_null(),
            fault_address,
            stack_bottom: STACK_BOTTOM.load(Ordering::Relaxed),
            stack_top: STACK_TOP.load(Ordering::Relaxed),
            shift: HEURISTIC_SHIFT.load(Ordering::SeqCst),
        }
    }

    pub fn classify(&self) -> RecoveryOutcome {
        let overflow = self.recovery_enabled
            && self.fault_address != 0
            && self.stack_top != 0
            && is_stack_overflow(
                self.fault_address,
                self.stack_bottom,
                self.stack_top,
                self.shift,
            );

        if !self.gc_in_progress && self.on_main_thread && overflow && self.has_recovery_hook {
            RecoveryOutcome::RecoverToCommandLoop
        } else {
            RecoveryOutcome::Fatal
        }
    }
}

//! The signal handlers themselves.
//!
//! Everything reachable from a handler is async-signal-safe: no allocation, no locks, no
//! logging. Handlers save and restore `errno`.
use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering},
};

use crate::{
    cutils::{raw, ErrnoGuard},
    system::{make_zeroed_sigaction, term::emergency},
};

use super::{
    backtrace,
    fault::{command_loop_hook, RecoveryOutcome, SegvContext},
    info::SignalInfo,
    pending, signal_name,
    set::{SignalAction, SignalSet},
    SignalNumber,
};

/// A transfer of control that never returns to the signal handler, such as a `longjmp` back to
/// the command loop.
pub type NonLocalExit = extern "C" fn() -> !;

struct MainThread {
    id: UnsafeCell<MaybeUninit<libc::pthread_t>>,
    recorded: AtomicBool,
}

// SAFETY: `id` is written once, before `recorded` is set, and only read after `recorded` has been
// observed.
unsafe impl Sync for MainThread {}

static MAIN_THREAD: MainThread = MainThread {
    id: UnsafeCell::new(MaybeUninit::uninit()),
    recorded: AtomicBool::new(false),
};

/// Remember the calling thread as the one that handles process-wide signals.
pub(super) fn record_main_thread() {
    if MAIN_THREAD.recorded.load(Ordering::SeqCst) {
        return;
    }
    unsafe { (*MAIN_THREAD.id.get()).write(libc::pthread_self()) };
    MAIN_THREAD.recorded.store(true, Ordering::SeqCst);
}

fn main_thread() -> Option<libc::pthread_t> {
    if MAIN_THREAD.recorded.load(Ordering::SeqCst) {
        Some(unsafe { (*MAIN_THREAD.id.get()).assume_init() })
    } else {
        None
    }
}

/// Whether the calling thread is the main thread. Before the signal handlers are installed
/// every thread counts as the main thread.
pub fn is_main_thread() -> bool {
    match main_thread() {
        Some(main) => unsafe { libc::pthread_equal(main, libc::pthread_self()) != 0 },
        None => true,
    }
}

static FATAL_ERROR_IN_PROGRESS: AtomicBool = AtomicBool::new(false);
static BACKTRACE_LIMIT: AtomicUsize = AtomicUsize::new(0);
static ARITH_ERROR_HOOK: AtomicPtr<()> = AtomicPtr::new(std::ptr::null_mut());

pub(super) fn configure(backtrace_limit: usize) {
    BACKTRACE_LIMIT.store(backtrace_limit, Ordering::SeqCst);
}

/// Register the function that signals an arithmetic error to the running program. Without one,
/// an arithmetic fault is fatal.
pub fn set_arithmetic_error_hook(hook: Option<NonLocalExit>) {
    let ptr = hook.map_or(std::ptr::null_mut(), |hook| hook as *mut ());
    ARITH_ERROR_HOOK.store(ptr, Ordering::SeqCst);
}

fn arith_error_hook() -> Option<NonLocalExit> {
    let ptr = ARITH_ERROR_HOOK.load(Ordering::SeqCst);
    // SAFETY: the only non-null values ever stored are `NonLocalExit` function pointers
    (!ptr.is_null()).then(|| unsafe { std::mem::transmute::<*mut (), NonLocalExit>(ptr) })
}

/// Run `handle` if we are on the main thread. Otherwise block `signal` on this thread, so it
/// cannot come back here, and send it on to the main thread.
fn deliver_process_signal(signal: SignalNumber, handle: impl FnOnce(SignalNumber)) {
    let _errno = ErrnoGuard::save();

    match main_thread() {
        Some(main) if unsafe { libc::pthread_equal(main, libc::pthread_self()) } == 0 => {
            let _ = SignalSet::of(&[signal]).block();
            unsafe { libc::pthread_kill(main, signal) };
        }
        _ => handle(signal),
    }
}

/// Run `handle` if we are on the main thread. A fault on any other thread cannot be handled
/// where it happened: save what the thread was doing, make the signal fatal for the whole
/// process and hand it to the main thread. This thread waits for the end.
fn deliver_thread_signal(signal: SignalNumber, handle: impl FnOnce(SignalNumber)) {
    let _errno = ErrnoGuard::save();

    match main_thread() {
        Some(main) if unsafe { libc::pthread_equal(main, libc::pthread_self()) } == 0 => {
            backtrace::save_thread_backtrace(BACKTRACE_LIMIT.load(Ordering::SeqCst));
            fatal_process_action().register_raw(signal);
            unsafe { libc::pthread_kill(main, signal) };
            let nothing = SignalSet::empty();
            loop {
                nothing.suspend();
            }
        }
        _ => handle(signal),
    }
}

/// Clean up, report and die of `signal`.
fn terminate_due_to_signal(signal: SignalNumber) -> ! {
    if !FATAL_ERROR_IN_PROGRESS.swap(true, Ordering::SeqCst) {
        emergency::restore_all();

        let mut number = [0; 20];
        raw::write_all(libc::STDERR_FILENO, b"Fatal error ");
        raw::write_all(
            libc::STDERR_FILENO,
            raw::format_decimal(signal.into(), &mut number),
        );
        raw::write_all(libc::STDERR_FILENO, b": ");
        let name = signal_name(signal).unwrap_or("unknown signal");
        raw::write_all(libc::STDERR_FILENO, name.as_bytes());
        raw::write_all(libc::STDERR_FILENO, b"\n");

        backtrace::print(BACKTRACE_LIMIT.load(Ordering::SeqCst), libc::STDERR_FILENO);
    }

    let mut default = make_zeroed_sigaction();
    default.sa_sigaction = libc::SIG_DFL;
    unsafe { libc::sigaction(signal, &default, std::ptr::null_mut()) };
    let _ = SignalSet::of(&[signal]).unblock();
    unsafe { libc::raise(signal) };

    // the default action of `signal` did not end the process
    crate::system::_exit(128 + signal)
}

/// Unblock everything and leave the handler through `exit`.
fn leave_handler(exit: NonLocalExit) -> ! {
    let _ = SignalSet::full().unblock();
    exit()
}

pub(super) fn fatal_process_action() -> SignalAction {
    SignalAction::new(super::handler::SignalHandlerBehavior::Handler {
        handler: handle_fatal_process_signal,
        mask: SignalSet::full(),
        restart: false,
    })
}

pub(super) extern "C" fn handle_fatal_process_signal(signal: SignalNumber) {
    deliver_process_signal(signal, |signal| terminate_due_to_signal(signal));
}

pub(super) extern "C" fn handle_fatal_thread_signal(signal: SignalNumber) {
    deliver_thread_signal(signal, |signal| terminate_due_to_signal(signal));
}

/// An arithmetic fault belongs to the thread that caused it, so only the main thread can turn
/// it into an error of the running program.
pub(super) extern "C" fn handle_arith_signal(signal: SignalNumber) {
    deliver_thread_signal(signal, |signal| match arith_error_hook() {
        Some(hook) => leave_handler(hook),
        None => terminate_due_to_signal(signal),
    });
}

pub(super) extern "C" fn handle_user_signal(signal: SignalNumber) {
    deliver_process_signal(signal, pending::note_user_signal);
}

pub(super) extern "C" fn handle_danger_signal(signal: SignalNumber) {
    deliver_process_signal(signal, |_| pending::note_danger());
}

pub(super) extern "C" fn handle_quit_signal(signal: SignalNumber) {
    deliver_process_signal(signal, |_| pending::request_quit());
}

pub(super) extern "C" fn handle_sigsegv(
    signal: SignalNumber,
    info: *mut libc::siginfo_t,
    _context: *mut libc::c_void,
) {
    let fault_address = unsafe { SignalInfo::from_ptr(info) }.map_or(0, SignalInfo::fault_address);
    let context = SegvContext::current(fault_address, is_main_thread());

    match (context.classify(), command_loop_hook()) {
        (RecoveryOutcome::RecoverToCommandLoop, Some(hook)) => leave_handler(hook),
        _ => deliver_thread_signal(signal, |signal| terminate_due_to_signal(signal)),
    }
}

//! Utilities to handle signals.
mod backtrace;
mod delivery;
mod disposition;
mod fault;
mod handler;
mod info;
mod pending;
mod set;
mod state;

pub use delivery::{is_main_thread, set_arithmetic_error_hook, NonLocalExit};
pub use disposition::{classify, SignalDisposition, SignalRegistry, HANDLED_SIGNALS};
pub use fault::{
    is_stack_overflow, set_command_loop_recovery_hook, set_gc_in_progress, set_stack_bounds,
    update_stack_top, RecoveryOutcome, SegvContext, ALT_STACK_SIZE,
};
pub use pending::{pending_signals, request_quit, PendingSignals};
pub use set::{MaskGuard, SignalSet};
pub use state::SavedDispositions;

pub type SignalNumber = libc::c_int;

macro_rules! define_consts {
    ($($signal:ident,)*) => {
        pub mod consts {
            pub use libc::{$($signal,)*};

            #[cfg(any(
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd"
            ))]
            pub use libc::SIGEMT;
        }

        pub fn signal_name(signal: SignalNumber) -> Option<&'static str> {
            match signal {
                $(consts::$signal => Some(stringify!($signal)),)*
                #[cfg(any(
                    target_os = "macos",
                    target_os = "ios",
                    target_os = "freebsd",
                    target_os = "netbsd",
                    target_os = "openbsd"
                ))]
                consts::SIGEMT => Some("SIGEMT"),
                _ => None,
            }
        }
    };
}

define_consts! {
    SIGHUP,
    SIGINT,
    SIGQUIT,
    SIGILL,
    SIGTRAP,
    SIGABRT,
    SIGBUS,
    SIGFPE,
    SIGKILL,
    SIGUSR1,
    SIGSEGV,
    SIGUSR2,
    SIGPIPE,
    SIGALRM,
    SIGTERM,
    SIGCHLD,
    SIGCONT,
    SIGSTOP,
    SIGTSTP,
    SIGTTIN,
    SIGTTOU,
    SIGURG,
    SIGXCPU,
    SIGXFSZ,
    SIGVTALRM,
    SIGPROF,
    SIGWINCH,
    SIGIO,
    SIGSYS,
}

/// The paging-space warning signal, on systems that have one.
#[cfg(target_os = "aix")]
pub const SIGDANGER: Option<SignalNumber> = Some(libc::SIGDANGER);
#[cfg(not(target_os = "aix"))]
pub const SIGDANGER: Option<SignalNumber> = None;

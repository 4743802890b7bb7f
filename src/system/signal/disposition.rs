use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
    common::{Config, Error},
    log::dev_info,
};

use super::{
    backtrace, consts::*, delivery, fault,
    handler::{SignalHandler, SignalHandlerBehavior},
    signal_name,
    set::SignalAction,
    SignalNumber, SignalSet, SIGDANGER,
};

/// How a signal is treated once the handlers are installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalDisposition {
    Ignored,
    /// Terminates the process, from the main thread.
    FatalProcess,
    /// A fault that is fatal for the thread that caused it and therefore for the process.
    FatalThread,
    /// An arithmetic fault reported to the program as an error.
    Arithmetic,
    /// Handed to the command loop as pending work.
    UserDefined,
    /// A warning that paging space is running low.
    Danger,
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
))]
const EMT: &[SignalNumber] = &[SIGEMT];
#[cfg(not(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
const EMT: &[SignalNumber] = &[];

/// Every signal [`SignalRegistry::install`] considers, apart from the platform specific
/// `SIGEMT` and [`SIGDANGER`].
pub const HANDLED_SIGNALS: [SignalNumber; 18] = [
    SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGVTALRM, SIGXCPU, SIGXFSZ, SIGILL, SIGTRAP, SIGABRT,
    SIGBUS, SIGSEGV, SIGSYS, SIGFPE, SIGUSR1, SIGUSR2, SIGPIPE, SIGPROF,
];

fn all_handled_signals() -> impl Iterator<Item = SignalNumber> {
    HANDLED_SIGNALS
        .into_iter()
        .chain(EMT.iter().copied())
        .chain(SIGDANGER)
}

/// Decide what to do with `signal`.
///
/// `already_ignored` tells whether the signal was ignored when we were started, as `nohup` does.
/// `None` means the signal is left alone.
pub fn classify(
    signal: SignalNumber,
    config: &Config,
    already_ignored: bool,
) -> Option<SignalDisposition> {
    use SignalDisposition::*;

    if Some(signal) == SIGDANGER {
        return Some(Danger);
    }
    if EMT.contains(&signal) {
        return Some(FatalThread);
    }

    match signal {
        SIGHUP | SIGINT | SIGTERM if config.interactive || !already_ignored => Some(FatalProcess),
        SIGHUP | SIGINT | SIGTERM => None,
        SIGQUIT | SIGVTALRM | SIGXCPU | SIGXFSZ => Some(FatalProcess),
        SIGILL | SIGTRAP | SIGABRT | SIGBUS | SIGSEGV | SIGSYS => Some(FatalThread),
        SIGFPE if config.ieee_floating_point => Some(FatalThread),
        SIGFPE => Some(Arithmetic),
        SIGUSR1 | SIGUSR2 => Some(UserDefined),
        SIGPIPE if config.interactive => Some(Ignored),
        SIGPROF => Some(Ignored),
        _ => None,
    }
}

/// The mask for handlers of non-fatal signals: the signals whose handlers must not interrupt
/// each other.
fn deferred_signal_mask(interactive: bool) -> SignalSet {
    let mut mask = SignalSet::of(&[SIGALRM, SIGCHLD, SIGPROF, SIGWINCH]);
    if let Some(danger) = SIGDANGER {
        mask.add(danger);
    }
    if interactive {
        for signal in [SIGINT, SIGQUIT, SIGIO] {
            mask.add(signal);
        }
    }
    mask
}

/// `SIGSEGV` may be a stack overflow, so its handler needs the details of the fault and the
/// alternate stack.
fn fault_behavior(interactive: bool) -> SignalHandlerBehavior {
    SignalHandlerBehavior::FaultHandler {
        handler: delivery::handle_sigsegv,
        mask: SignalSet::full(),
        restart: !interactive,
    }
}

fn handler_behavior(disposition: SignalDisposition, interactive: bool) -> SignalHandlerBehavior {
    let handler = |handler: extern "C" fn(SignalNumber), mask| SignalHandlerBehavior::Handler {
        handler,
        mask,
        restart: !interactive,
    };

    match disposition {
        SignalDisposition::Ignored => SignalHandlerBehavior::Ignore,
        SignalDisposition::FatalProcess => {
            handler(delivery::handle_fatal_process_signal, SignalSet::full())
        }
        SignalDisposition::FatalThread => {
            handler(delivery::handle_fatal_thread_signal, SignalSet::full())
        }
        SignalDisposition::Arithmetic => {
            handler(delivery::handle_arith_signal, deferred_signal_mask(interactive))
        }
        SignalDisposition::UserDefined => {
            handler(delivery::handle_user_signal, deferred_signal_mask(interactive))
        }
        SignalDisposition::Danger => {
            handler(delivery::handle_danger_signal, deferred_signal_mask(interactive))
        }
    }
}

fn input_signals() -> SignalSet {
    SignalSet::of(&[SIGIO, SIGWINCH])
}

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// The signal handlers of the process.
///
/// There is one registry per process; it lives until the process exits.
#[derive(Debug)]
pub struct SignalRegistry {
    interactive: bool,
    dispositions: Vec<(SignalNumber, SignalDisposition)>,
}

impl SignalRegistry {
    /// Install the handlers for every signal [`classify`] assigns a disposition to.
    ///
    /// The calling thread becomes the main thread, so this must run before any other thread is
    /// started.
    pub fn install(config: &Config) -> Result<Self, Error> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized("signal registry"));
        }

        delivery::record_main_thread();
        delivery::configure(config.backtrace_limit.into());
        fault::configure(
            config.attempt_stack_overflow_recovery,
            config.stack_heuristic_shift,
        );
        if config.backtrace_limit > 0 {
            backtrace::warm_up();
        }
        fault::install_alt_stack()?;

        let mut dispositions = Vec::new();
        for signal in all_handled_signals() {
            let already_ignored = SignalAction::current(signal)?.is_ignore();
            let Some(disposition) = classify(signal, config, already_ignored) else {
                dev_info!(
                    "leaving {} alone",
                    signal_name(signal).unwrap_or("unknown signal")
                );
                continue;
            };

            let behavior = if signal == SIGSEGV {
                fault_behavior(config.interactive)
            } else {
                handler_behavior(disposition, config.interactive)
            };
            SignalHandler::register(signal, behavior)?.forget();
            dispositions.push((signal, disposition));
        }

        Ok(Self {
            interactive: config.interactive,
            dispositions,
        })
    }

    pub fn disposition(&self, signal: SignalNumber) -> Option<SignalDisposition> {
        self.dispositions
            .iter()
            .find_map(|&(s, disposition)| (s == signal).then_some(disposition))
    }

    /// Every signal that got a handler, in installation order.
    pub fn iter(&self) -> impl Iterator<Item = (SignalNumber, SignalDisposition)> + '_ {
        self.dispositions.iter().copied()
    }

    /// Let `SIGIO` and `SIGWINCH` reach their handlers on this thread. Batch sessions read no
    /// terminal input and keep their mask.
    pub fn request_input_signals(&self) -> Result<(), Error> {
        if self.interactive {
            input_signals().unblock()?;
        }
        Ok(())
    }

    /// Hold `SIGIO` and `SIGWINCH` back until they are requested again.
    pub fn defer_input_signals(&self) -> Result<(), Error> {
        if self.interactive {
            input_signals().block()?;
        }
        Ok(())
    }

    /// Turn `signal` into a quit request instead of its registered disposition.
    ///
    /// This is how the keyboard interrupt becomes a way to abort a blocking operation.
    pub fn catch_as_quit(&mut self, signal: SignalNumber) -> Result<(), Error> {
        SignalHandler::register(
            signal,
            SignalHandlerBehavior::Handler {
                handler: delivery::handle_quit_signal,
                mask: deferred_signal_mask(self.interactive),
                restart: !self.interactive,
            },
        )?
        .forget();
        self.dispositions.retain(|&(s, _)| s != signal);
        Ok(())
    }
}

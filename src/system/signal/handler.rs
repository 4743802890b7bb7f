use std::io;

use crate::log::dev_warn;

use super::{consts::*, set::SignalAction, signal_name, SignalNumber, SignalSet};

/// A handler for a signal.
///
/// When a value of this type is dropped, it will try to restore the action that was registered for
/// the signal prior to calling [`SignalHandler::register`].
pub(crate) struct SignalHandler {
    signal: SignalNumber,
    original_action: SignalAction,
}

impl SignalHandler {
    const FORBIDDEN: &'static [SignalNumber] = &[SIGKILL, SIGSTOP];

    /// Register a new handler for the given signal with the provided behavior.
    pub(crate) fn register(
        signal: SignalNumber,
        behavior: SignalHandlerBehavior,
    ) -> io::Result<Self> {
        if Self::FORBIDDEN.contains(&signal) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "the {} signal action cannot be overriden",
                    signal_name(signal).unwrap_or("unknown")
                ),
            ));
        }

        let action = SignalAction::new(behavior);
        let original_action = action.register(signal)?;

        Ok(Self {
            signal,
            original_action,
        })
    }

    pub(crate) fn signal(&self) -> SignalNumber {
        self.signal
    }

    /// Forget this signal handler.
    ///
    /// This can be used to avoid restoring the original action for the signal.
    pub(crate) fn forget(self) {
        std::mem::forget(self)
    }
}

impl Drop for SignalHandler {
    #[track_caller]
    fn drop(&mut self) {
        let signal = self.signal;
        if let Err(err) = self.original_action.register(signal) {
            dev_warn!(
                "cannot restore original action for {}: {err}",
                signal_name(signal).unwrap_or("unknown signal"),
            )
        }
    }
}

/// The possible behaviors for a [`SignalHandler`].
pub(crate) enum SignalHandlerBehavior {
    /// Ignore the arrival of the signal.
    Ignore,
    /// Call `handler` with the signals in `mask` blocked. Interrupted system calls are restarted
    /// only if `restart` is set.
    Handler {
        handler: extern "C" fn(SignalNumber),
        mask: SignalSet,
        restart: bool,
    },
    /// Call `handler` on the alternate signal stack, with the details of the fault.
    FaultHandler {
        handler: extern "C" fn(SignalNumber, *mut libc::siginfo_t, *mut libc::c_void),
        mask: SignalSet,
        restart: bool,
    },
}

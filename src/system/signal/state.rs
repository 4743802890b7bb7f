use std::io;

use crate::log::dev_debug;

use super::{
    consts::*,
    handler::{SignalHandler, SignalHandlerBehavior},
    signal_name, SignalNumber,
};

/// Signal actions that were temporarily replaced with `SIG_IGN`.
///
/// While a subshell owns the terminal, keyboard signals are meant for it and not for us. The
/// previous actions come back when this value is dropped.
pub struct SavedDispositions {
    handlers: Vec<SignalHandler>,
}

impl SavedDispositions {
    pub const IGNORED_SIGNALS: [SignalNumber; 4] = [SIGINT, SIGQUIT, SIGTERM, SIGIO];

    /// Ignore [`Self::IGNORED_SIGNALS`], remembering what they were set to.
    pub fn ignore() -> io::Result<Self> {
        let mut handlers = Vec::with_capacity(Self::IGNORED_SIGNALS.len());

        for signal in Self::IGNORED_SIGNALS {
            // on error the handlers registered so far are restored when `handlers` is dropped
            handlers.push(SignalHandler::register(
                signal,
                SignalHandlerBehavior::Ignore,
            )?);
        }

        Ok(Self { handlers })
    }

    /// Put the saved actions back.
    pub fn restore(self) {
        for handler in &self.handlers {
            let signal = handler.signal();
            dev_debug!("restoring action for {}", signal_name(signal).unwrap_or("?"));
        }
        drop(self)
    }
}

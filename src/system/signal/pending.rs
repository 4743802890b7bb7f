use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::{
    common::Error,
    log::{dev_info, user_warn},
    system::retry::PendingWork,
};

use super::{consts::*, SignalNumber};

const USR1: u32 = 1 << 0;
const USR2: u32 = 1 << 1;
const DANGER: u32 = 1 << 2;

static PENDING: AtomicBool = AtomicBool::new(false);
static PENDING_KINDS: AtomicU32 = AtomicU32::new(0);
static QUIT_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Called from signal handlers.
pub(super) fn note_user_signal(signal: SignalNumber) {
    let kind = if signal == SIGUSR1 { USR1 } else { USR2 };
    PENDING_KINDS.fetch_or(kind, Ordering::SeqCst);
    PENDING.store(true, Ordering::SeqCst);
}

/// Called from signal handlers.
pub(super) fn note_danger() {
    PENDING_KINDS.fetch_or(DANGER, Ordering::SeqCst);
    PENDING.store(true, Ordering::SeqCst);
}

/// Ask the code waiting in a quit-interruptible call to give up. Async-signal-safe.
pub fn request_quit() {
    QUIT_REQUESTED.store(true, Ordering::SeqCst);
    PENDING.store(true, Ordering::SeqCst);
}

/// Whether there is deferred work for [`PendingSignals::process_pending_signals`].
pub fn pending_signals() -> bool {
    PENDING.load(Ordering::SeqCst)
}

type UserSignalCallback = Box<dyn Fn(SignalNumber)>;
type DangerCallback = Box<dyn Fn()>;

/// Runs, on the main thread, the work that signal handlers could only take note of.
#[derive(Default)]
pub struct PendingSignals {
    on_user_signal: Option<UserSignalCallback>,
    on_danger: Option<DangerCallback>,
}

impl PendingSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` for every `SIGUSR1` or `SIGUSR2` that arrived.
    pub fn on_user_signal(mut self, callback: impl Fn(SignalNumber) + 'static) -> Self {
        self.on_user_signal = Some(Box::new(callback));
        self
    }

    /// Run `callback` when the system warns that paging space is running low, typically to
    /// save everything that can be saved.
    pub fn on_danger(mut self, callback: impl Fn() + 'static) -> Self {
        self.on_danger = Some(Box::new(callback));
        self
    }
}

impl PendingWork for PendingSignals {
    fn maybe_quit(&self) -> Result<(), Error> {
        if QUIT_REQUESTED.swap(false, Ordering::SeqCst) {
            Err(Error::Quit)
        } else {
            Ok(())
        }
    }

    fn process_pending_signals(&self) {
        if !PENDING.swap(false, Ordering::SeqCst) {
            return;
        }
        // keep a quit request visible to the next `maybe_quit`
        if QUIT_REQUESTED.load(Ordering::SeqCst) {
            PENDING.store(true, Ordering::SeqCst);
        }

        let kinds = PENDING_KINDS.swap(0, Ordering::SeqCst);
        for (bit, signal) in [(USR1, SIGUSR1), (USR2, SIGUSR2)] {
            if kinds & bit != 0 {
                dev_info!("handling deferred {}", super::signal_name(signal).unwrap_or("?"));
                if let Some(callback) = &self.on_user_signal {
                    callback(signal);
                }
            }
        }
        if kinds & DANGER != 0 {
            user_warn!("warning: system is running low on paging space");
            if let Some(callback) = &self.on_danger {
                callback();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    // The flags are process wide, so everything that touches them lives in one test.
    #[test]
    fn deferred_work_runs_once() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let danger = Rc::new(RefCell::new(0));
        let pending = {
            let (seen, danger) = (seen.clone(), danger.clone());
            PendingSignals::new()
                .on_user_signal(move |signal| seen.borrow_mut().push(signal))
                .on_danger(move || *danger.borrow_mut() += 1)
        };

        note_user_signal(SIGUSR2);
        note_user_signal(SIGUSR1);
        note_user_signal(SIGUSR1);
        note_danger();
        assert!(pending_signals());

        pending.process_pending_signals();
        assert_eq!(*seen.borrow(), vec![SIGUSR1, SIGUSR2]);
        assert_eq!(*danger.borrow(), 1);
        assert!(!pending_signals());

        pending.process_pending_signals();
        assert_eq!(seen.borrow().len(), 2);

        assert!(pending.maybe_quit().is_ok());
        request_quit();
        pending.process_pending_signals();
        assert!(pending.maybe_quit().unwrap_err().is_quit());
        assert!(pending.maybe_quit().is_ok());
    }
}

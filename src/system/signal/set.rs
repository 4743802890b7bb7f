use crate::{cutils::cerr, system::make_zeroed_sigaction};

use super::{handler::SignalHandlerBehavior, SignalNumber};

use std::{io, mem::MaybeUninit};

#[repr(transparent)]
pub(super) struct SignalAction {
    raw: libc::sigaction,
}

impl SignalAction {
    pub(super) fn new(behavior: SignalHandlerBehavior) -> Self {
        let mut raw: libc::sigaction = make_zeroed_sigaction();

        match behavior {
            SignalHandlerBehavior::Ignore => raw.sa_sigaction = libc::SIG_IGN,
            SignalHandlerBehavior::Handler {
                handler,
                mask,
                restart,
            } => {
                raw.sa_sigaction = handler as libc::sighandler_t;
                raw.sa_mask = mask.raw;
                if restart {
                    raw.sa_flags |= libc::SA_RESTART;
                }
            }
            SignalHandlerBehavior::FaultHandler {
                handler,
                mask,
                restart,
            } => {
                // Specify that we want to pass a signal-catching function in `sa_sigaction`, and
                // that it runs on the alternate stack.
                raw.sa_sigaction = handler as libc::sighandler_t;
                raw.sa_mask = mask.raw;
                raw.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
                if restart {
                    raw.sa_flags |= libc::SA_RESTART;
                }
            }
        }

        Self { raw }
    }

    pub(super) fn register(&self, signal: SignalNumber) -> io::Result<Self> {
        let mut original_action = MaybeUninit::<Self>::zeroed();

        cerr(unsafe { libc::sigaction(signal, &self.raw, original_action.as_mut_ptr().cast()) })?;

        Ok(unsafe { original_action.assume_init() })
    }

    /// The action currently installed for `signal`.
    pub(super) fn current(signal: SignalNumber) -> io::Result<Self> {
        let mut action = MaybeUninit::<Self>::zeroed();

        cerr(unsafe { libc::sigaction(signal, std::ptr::null(), action.as_mut_ptr().cast()) })?;

        Ok(unsafe { action.assume_init() })
    }

    #[cfg(test)]
    pub(super) fn flags(&self) -> libc::c_int {
        self.raw.sa_flags
    }

    pub(super) fn is_ignore(&self) -> bool {
        self.raw.sa_sigaction == libc::SIG_IGN
    }

    /// Install the raw action from inside a signal handler.
    pub(super) fn register_raw(&self, signal: SignalNumber) {
        unsafe { libc::sigaction(signal, &self.raw, std::ptr::null_mut()) };
    }
}

// A signal set that can be used to mask signals.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct SignalSet {
    raw: libc::sigset_t,
}

impl SignalSet {
    /// Create an empty set.
    pub fn empty() -> Self {
        let mut set = MaybeUninit::<Self>::zeroed();

        // sigemptyset cannot fail for a valid pointer
        unsafe { libc::sigemptyset(set.as_mut_ptr().cast()) };

        unsafe { set.assume_init() }
    }

    /// Create a set containing all the signals.
    pub fn full() -> Self {
        let mut set = MaybeUninit::<Self>::zeroed();

        unsafe { libc::sigfillset(set.as_mut_ptr().cast()) };

        unsafe { set.assume_init() }
    }

    /// Create a set containing exactly `signals`.
    pub fn of(signals: &[SignalNumber]) -> Self {
        let mut set = Self::empty();
        for &signal in signals {
            set.add(signal);
        }
        set
    }

    /// Add `signal` to the set. Invalid signal numbers are ignored.
    pub fn add(&mut self, signal: SignalNumber) {
        unsafe { libc::sigaddset(&mut self.raw, signal) };
    }

    pub fn contains(&self, signal: SignalNumber) -> bool {
        unsafe { libc::sigismember(&self.raw, signal) == 1 }
    }

    fn pthread_sigmask(&self, how: libc::c_int) -> io::Result<Self> {
        let mut original_set = MaybeUninit::<Self>::zeroed();

        // pthread_sigmask reports failure through its return value, not errno
        match unsafe { libc::pthread_sigmask(how, &self.raw, original_set.as_mut_ptr().cast()) } {
            0 => Ok(unsafe { original_set.assume_init() }),
            errno => Err(io::Error::from_raw_os_error(errno)),
        }
    }

    /// Block all the signals in this set for the calling thread and return the previous set of
    /// blocked signals.
    ///
    /// After calling this function successfully, the set of blocked signals will be the union of
    /// the previous set of blocked signals and this set.
    pub fn block(&self) -> io::Result<Self> {
        self.pthread_sigmask(libc::SIG_BLOCK)
    }

    /// Unblock the signals in this set for the calling thread and return the previous set of
    /// blocked signals.
    pub fn unblock(&self) -> io::Result<Self> {
        self.pthread_sigmask(libc::SIG_UNBLOCK)
    }

    /// Block only the signals that are in this set and return the previous set of blocked signals.
    ///
    /// After calling this function successfully, the set of blocked signals will be the exactly
    /// this set.
    pub fn set_mask(&self) -> io::Result<Self> {
        self.pthread_sigmask(libc::SIG_SETMASK)
    }

    /// The signals currently blocked for the calling thread.
    pub fn current_mask() -> io::Result<Self> {
        let mut current = MaybeUninit::<Self>::zeroed();
        match unsafe {
            libc::pthread_sigmask(libc::SIG_BLOCK, std::ptr::null(), current.as_mut_ptr().cast())
        } {
            0 => Ok(unsafe { current.assume_init() }),
            errno => Err(io::Error::from_raw_os_error(errno)),
        }
    }

    /// Wait for a signal with this set as the temporary mask. Never returns if the signal that
    /// arrives terminates the process.
    pub(super) fn suspend(&self) {
        unsafe { libc::sigsuspend(&self.raw) };
    }
}

/// Signals blocked until the guard is dropped, at which point the previous mask comes back.
pub struct MaskGuard {
    previous: SignalSet,
}

impl MaskGuard {
    /// Block `set` in addition to whatever is already blocked.
    pub fn block(set: &SignalSet) -> io::Result<Self> {
        Ok(Self {
            previous: set.block()?,
        })
    }

    /// Block `SIGCHLD` and `SIGINT`, so that no child status change or interrupt is handled
    /// while the guard lives.
    pub fn block_child_signal() -> io::Result<Self> {
        Self::block(&SignalSet::of(&[libc::SIGCHLD, libc::SIGINT]))
    }

    /// Block `SIGINT`.
    pub fn block_interrupt_signal() -> io::Result<Self> {
        Self::block(&SignalSet::of(&[libc::SIGINT]))
    }

    /// Put the previous mask back now.
    pub fn restore(self) {}
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        // restoring a mask we read earlier cannot fail
        let _ = self.previous.set_mask();
    }
}

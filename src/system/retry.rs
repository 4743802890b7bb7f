//! Retrying blocking system calls that were interrupted by a signal.
use std::io;

use crate::common::Error;

/// Work that the main loop defers while a signal handler runs and that has to be picked up
/// whenever a blocking call is interrupted.
pub trait PendingWork {
    /// Return [`Error::Quit`] if the user asked to abort what we are doing.
    fn maybe_quit(&self) -> Result<(), Error>;
    /// Run the handlers for signals that arrived since the last call.
    fn process_pending_signals(&self);
}

/// What may happen between two attempts of an interrupted call.
#[derive(Clone, Copy, Default)]
pub enum Interruptible<'a> {
    /// Retry right away.
    #[default]
    No,
    /// Process pending signals before retrying.
    Signals(&'a dyn PendingWork),
    /// Check for a quit request, then process pending signals before retrying.
    Quit(&'a dyn PendingWork),
}

impl Interruptible<'_> {
    fn between_attempts(&self) -> Result<(), Error> {
        match self {
            Interruptible::No => {}
            Interruptible::Signals(work) => work.process_pending_signals(),
            Interruptible::Quit(work) => {
                work.maybe_quit()?;
                work.process_pending_signals();
            }
        }
        Ok(())
    }
}

/// Call `op` until it finishes with anything other than `EINTR`.
///
/// The only way to leave the loop early is a quit request under [`Interruptible::Quit`].
pub fn retry_on_interrupt<T>(
    interruptible: Interruptible<'_>,
    mut op: impl FnMut() -> io::Result<T>,
) -> Result<T, Error> {
    loop {
        match op() {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                interruptible.between_attempts()?
            }
            result => return result.map_err(Error::from),
        }
    }
}

/// [`retry_on_interrupt`] for calls that are never cancelled, keeping the [`io::Error`].
pub(crate) fn retry_io<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match op() {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

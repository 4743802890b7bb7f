/// Information related to the arrival of a signal.
#[repr(transparent)]
pub(crate) struct SignalInfo {
    info: libc::siginfo_t,
}

impl SignalInfo {
    /// View the `siginfo_t` a three-argument handler was given.
    ///
    /// # Safety
    ///
    /// `info` must be null or point to the `siginfo_t` the kernel passed to the handler.
    pub(crate) unsafe fn from_ptr<'a>(info: *const libc::siginfo_t) -> Option<&'a Self> {
        unsafe { info.cast::<Self>().as_ref() }
    }

    /// The faulting address of a memory access signal, `0` if the kernel did not report one.
    pub(crate) fn fault_address(&self) -> usize {
        unsafe { self.info.si_addr() as usize }
    }
}

//! An in-memory [`Platform`] for exercising the managers without a terminal.
use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    io,
    os::fd::RawFd,
};

use super::{
    interface::{Platform, ProcessId},
    signal::SignalNumber,
    term::{mode::TerminalMode, EmergencyRestore, TermSize},
    wait::{WaitOptions, WaitStatus},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    GetMode(RawFd),
    SetMode { fd: RawFd, flush: bool },
    ResumeOutput(RawFd),
    DrainOutput(RawFd),
    AsyncInput(RawFd, bool),
    SetForeground(RawFd, ProcessId),
    SetProcessGroup(ProcessId, ProcessId),
    Signal(ProcessId, SignalNumber),
    Wait(ProcessId),
}

pub(crate) struct FakePlatform {
    pid: ProcessId,
    pgrp: Cell<ProcessId>,
    modes: RefCell<HashMap<RawFd, TerminalMode>>,
    foreground: RefCell<HashMap<RawFd, ProcessId>>,
    sizes: RefCell<HashMap<RawFd, TermSize>>,
    wait_results: RefCell<VecDeque<io::Result<Option<(ProcessId, WaitStatus)>>>>,
    interruptions: Cell<usize>,
    ignored_sets: Cell<usize>,
    refuse_group_changes: Cell<bool>,
    refuse_foreground_changes: Cell<bool>,
    calls: RefCell<Vec<Call>>,
}

impl FakePlatform {
    /// A process that leads its own process group.
    pub(crate) fn new() -> Self {
        Self::in_group(ProcessId::new(100), ProcessId::new(100))
    }

    pub(crate) fn in_group(pid: ProcessId, pgrp: ProcessId) -> Self {
        Self {
            pid,
            pgrp: Cell::new(pgrp),
            modes: Default::default(),
            foreground: Default::default(),
            sizes: Default::default(),
            wait_results: Default::default(),
            interruptions: Cell::new(0),
            ignored_sets: Cell::new(0),
            refuse_group_changes: Cell::new(false),
            refuse_foreground_changes: Cell::new(false),
            calls: Default::default(),
        }
    }

    /// Attach a terminal in `mode` to `fd`, with `foreground` as its foreground group.
    pub(crate) fn add_terminal(&self, fd: RawFd, mode: TerminalMode, foreground: ProcessId) {
        self.modes.borrow_mut().insert(fd, mode);
        self.foreground.borrow_mut().insert(fd, foreground);
        self.sizes.borrow_mut().insert(fd, TermSize { rows: 24, cols: 80 });
    }

    pub(crate) fn mode(&self, fd: RawFd) -> Option<TerminalMode> {
        self.modes.borrow().get(&fd).copied()
    }

    pub(crate) fn foreground(&self, fd: RawFd) -> Option<ProcessId> {
        self.foreground.borrow().get(&fd).copied()
    }

    pub(crate) fn group(&self) -> ProcessId {
        self.pgrp.get()
    }

    /// Make the next `count` calls fail with `EINTR`.
    pub(crate) fn interrupt_next(&self, count: usize) {
        self.interruptions.set(count)
    }

    /// Make the next `count` mode changes report success without taking effect.
    pub(crate) fn ignore_next_sets(&self, count: usize) {
        self.ignored_sets.set(count)
    }

    /// Make `setpgid` fail with `EPERM` until told otherwise.
    pub(crate) fn refuse_group_changes(&self, refuse: bool) {
        self.refuse_group_changes.set(refuse)
    }

    /// Make `tcsetpgrp` fail with `EPERM` until told otherwise.
    pub(crate) fn refuse_foreground_changes(&self, refuse: bool) {
        self.refuse_foreground_changes.set(refuse)
    }

    pub(crate) fn push_wait_result(&self, result: io::Result<Option<(ProcessId, WaitStatus)>>) {
        self.wait_results.borrow_mut().push_back(result)
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.borrow_mut().clear()
    }

    fn enter(&self, call: Call) -> io::Result<()> {
        self.calls.borrow_mut().push(call);
        match self.interruptions.get() {
            0 => Ok(()),
            n => {
                self.interruptions.set(n - 1);
                Err(io::Error::from_raw_os_error(libc::EINTR))
            }
        }
    }

    fn not_a_tty() -> io::Error {
        io::Error::from_raw_os_error(libc::ENOTTY)
    }
}

impl Platform for FakePlatform {
    fn terminal_mode(&self, fd: RawFd) -> io::Result<TerminalMode> {
        self.enter(Call::GetMode(fd))?;
        self.mode(fd).ok_or_else(Self::not_a_tty)
    }

    fn set_terminal_mode(&self, fd: RawFd, mode: &TerminalMode, flush: bool) -> io::Result<()> {
        self.enter(Call::SetMode { fd, flush })?;
        let mut modes = self.modes.borrow_mut();
        let current = modes.get_mut(&fd).ok_or_else(Self::not_a_tty)?;
        match self.ignored_sets.get() {
            0 => *current = *mode,
            n => self.ignored_sets.set(n - 1),
        }
        Ok(())
    }

    fn resume_output(&self, fd: RawFd) -> io::Result<()> {
        self.enter(Call::ResumeOutput(fd))
    }

    fn drain_output(&self, fd: RawFd) -> io::Result<()> {
        self.enter(Call::DrainOutput(fd))
    }

    fn set_async_input(&self, fd: RawFd, enabled: bool) -> io::Result<()> {
        self.enter(Call::AsyncInput(fd, enabled))?;
        self.mode(fd).map(|_| ()).ok_or_else(Self::not_a_tty)
    }

    fn restore_on_fatal_signal(
        &self,
        _fd: RawFd,
        _mode: &TerminalMode,
    ) -> Option<EmergencyRestore> {
        None
    }

    fn window_size(&self, fd: RawFd) -> io::Result<TermSize> {
        self.sizes.borrow().get(&fd).copied().ok_or_else(Self::not_a_tty)
    }

    fn set_window_size(&self, fd: RawFd, size: TermSize) -> io::Result<()> {
        let mut sizes = self.sizes.borrow_mut();
        let current = sizes.get_mut(&fd).ok_or_else(Self::not_a_tty)?;
        *current = size;
        Ok(())
    }

    fn foreground_process_group(&self, fd: RawFd) -> io::Result<ProcessId> {
        self.foreground(fd).ok_or_else(Self::not_a_tty)
    }

    fn set_foreground_process_group(&self, fd: RawFd, pgrp: ProcessId) -> io::Result<()> {
        self.enter(Call::SetForeground(fd, pgrp))?;
        if self.refuse_foreground_changes.get() {
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }
        let mut foreground = self.foreground.borrow_mut();
        let current = foreground.get_mut(&fd).ok_or_else(Self::not_a_tty)?;
        *current = pgrp;
        Ok(())
    }

    fn set_process_group(&self, pid: ProcessId, pgrp: ProcessId) -> io::Result<()> {
        self.enter(Call::SetProcessGroup(pid, pgrp))?;
        if self.refuse_group_changes.get() {
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }
        if pid.get() == 0 || pid == self.pid {
            self.pgrp.set(if pgrp.get() == 0 { self.pid } else { pgrp });
        }
        Ok(())
    }

    fn process_id(&self) -> ProcessId {
        self.pid
    }

    fn process_group(&self) -> ProcessId {
        self.pgrp.get()
    }

    fn send_signal(&self, pid: ProcessId, signal: SignalNumber) -> io::Result<()> {
        self.enter(Call::Signal(pid, signal))
    }

    fn wait_pid(
        &self,
        pid: ProcessId,
        options: WaitOptions,
    ) -> io::Result<Option<(ProcessId, WaitStatus)>> {
        self.enter(Call::Wait(pid))?;
        match self.wait_results.borrow_mut().pop_front() {
            Some(result) => result,
            // asking for WNOHANG again changes nothing if it was already set
            None if options.no_hang() == options => Ok(None),
            None => Err(io::Error::from_raw_os_error(libc::ECHILD)),
        }
    }
}

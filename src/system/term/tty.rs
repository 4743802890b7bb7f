use std::{
    os::fd::{AsRawFd, OwnedFd, RawFd},
    path::Path,
};

use crate::{
    common::{Config, Error},
    log::dev_debug,
    system::{
        file,
        interface::Platform,
        retry::{retry_io, Interruptible},
    },
};

use super::{
    mode::{editing_mode, get_mode, set_mode, EditingOptions, TerminalMode, CDISABLE},
    EmergencyRestore, TermSize,
};

/// One terminal an editor runs on.
///
/// The device remembers the mode it was found in, so that it can be put back when the editor
/// suspends, runs a subshell or exits. A suspended device has no output and every operation on
/// it succeeds without doing anything.
#[derive(Debug)]
pub struct TtyDevice {
    // dropped before the descriptor below is closed
    emergency: Option<EmergencyRestore>,
    input: RawFd,
    owned: Option<OwnedFd>,
    output: Option<RawFd>,
    original: Option<TerminalMode>,
    initialized: bool,
    // `None` until set explicitly or taken from the session configuration
    flow_control: Option<bool>,
    meta_key: Option<bool>,
    interrupt_input: bool,
    controlling: bool,
    erase_char: Option<u8>,
}

impl TtyDevice {
    /// A terminal on a descriptor the caller keeps open, such as standard input.
    pub fn from_fd(fd: RawFd, controlling: bool) -> Self {
        Self {
            emergency: None,
            input: fd,
            owned: None,
            output: Some(fd),
            original: None,
            initialized: false,
            flow_control: None,
            meta_key: None,
            interrupt_input: false,
            controlling,
            erase_char: None,
        }
    }

    /// Open the terminal device at `path` for reading and writing, without making it our
    /// controlling terminal.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let fd = file::open(path, libc::O_RDWR | libc::O_NOCTTY, 0, Interruptible::No)?;
        let mut device = Self::from_fd(fd.as_raw_fd(), false);
        device.owned = Some(fd);
        Ok(device)
    }

    /// Honor `C-s`/`C-q` flow control on this terminal, whatever the session default is.
    pub fn flow_control(mut self, flow_control: bool) -> Self {
        self.flow_control = Some(flow_control);
        self
    }

    /// Pass the 8th bit of input through on this terminal, whatever the session default is.
    pub fn meta_key(mut self, meta_key: bool) -> Self {
        self.meta_key = Some(meta_key);
        self
    }

    /// Take the settings that were not chosen for this terminal from `config`.
    /// Read input when `SIGIO` says it arrived instead of polling for it.
    pub fn interrupt_input(mut self, interrupt_input: bool) -> Self {
        self.interrupt_input = interrupt_input;
        self
    }

    pub fn with_defaults_from(mut self, config: &Config) -> Self {
        self.flow_control.get_or_insert(config.flow_control);
        self.meta_key.get_or_insert(config.meta_key);
        self
    }

    pub fn uses_flow_control(&self) -> bool {
        self.flow_control.unwrap_or(Config::default().flow_control)
    }

    pub fn uses_meta_key(&self) -> bool {
        self.meta_key.unwrap_or(Config::default().meta_key)
    }

    pub fn input_fd(&self) -> RawFd {
        self.input
    }

    pub fn is_controlling(&self) -> bool {
        self.controlling
    }

    pub fn is_suspended(&self) -> bool {
        self.output.is_none()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The mode the terminal was in before we changed it.
    pub fn original_mode(&self) -> Option<&TerminalMode> {
        self.original.as_ref()
    }

    /// The erase character the terminal had, `None` if it had none or was never initialized.
    pub fn erase_char(&self) -> Option<u8> {
        self.erase_char
    }

    /// Save the current mode and switch the terminal to editing mode.
    pub fn init_editing_mode<P: Platform>(
        &mut self,
        platform: &P,
        quit_char: u8,
    ) -> Result<(), Error> {
        if self.is_suspended() {
            return Ok(());
        }

        // a second initialization must not save our own mode as the original one
        let original = match self.original {
            Some(original) if self.initialized => original,
            _ => get_mode(platform, self.input)?,
        };
        self.original = Some(original);
        self.erase_char = match original.special_char(libc::VERASE) {
            CDISABLE => None,
            erase => Some(erase),
        };
        if self.emergency.is_none() {
            self.emergency = platform.restore_on_fatal_signal(self.input, &original);
        }

        let flow_control = self.uses_flow_control();
        let options = EditingOptions {
            flow_control,
            meta_key: self.uses_meta_key(),
            quit_char,
            controlling: self.controlling,
        };
        set_mode(platform, self.input, &editing_mode(&original, &options), false)?;
        if !flow_control {
            retry_io(|| platform.resume_output(self.input))?;
        }
        if self.interrupt_input {
            retry_io(|| platform.set_async_input(self.input, true))?;
        }

        dev_debug!("terminal on fd {} is in editing mode", self.input);
        self.initialized = true;
        Ok(())
    }

    /// Put the terminal back into the mode it was found in, once everything written to it has
    /// been transmitted.
    pub fn restore_mode<P: Platform>(&mut self, platform: &P) -> Result<(), Error> {
        let (Some(output), Some(original)) = (self.output, self.original) else {
            return Ok(());
        };
        if !self.initialized {
            return Ok(());
        }

        if self.interrupt_input {
            retry_io(|| platform.set_async_input(self.input, false))?;
        }
        retry_io(|| platform.drain_output(output))?;
        set_mode(platform, self.input, &original, false)?;
        self.initialized = false;
        self.emergency = None;
        Ok(())
    }

    /// Give the terminal back and stop using it until [`resume`](Self::resume).
    pub fn suspend<P: Platform>(&mut self, platform: &P) -> Result<(), Error> {
        self.restore_mode(platform)?;
        self.output = None;
        Ok(())
    }

    /// Start using a suspended terminal again.
    pub fn resume<P: Platform>(&mut self, platform: &P, quit_char: u8) -> Result<(), Error> {
        if !self.is_suspended() {
            return Ok(());
        }
        self.output = Some(self.input);
        self.init_editing_mode(platform, quit_char)
    }

    /// Throw away input that was typed but not read yet.
    pub fn discard_input<P: Platform>(&self, platform: &P) -> Result<(), Error> {
        if self.is_suspended() {
            return Ok(());
        }
        let mode = get_mode(platform, self.input)?;
        set_mode(platform, self.input, &mode, true)?;
        Ok(())
    }

    pub fn window_size<P: Platform>(&self, platform: &P) -> Result<TermSize, Error> {
        Ok(platform.window_size(self.input)?)
    }

    pub fn set_window_size<P: Platform>(&self, platform: &P, size: TermSize) -> Result<(), Error> {
        if self.is_suspended() {
            return Ok(());
        }
        Ok(platform.set_window_size(self.input, size)?)
    }

    /// Stop using the terminal, closing it if it was opened by [`open`](Self::open).
    ///
    /// The mode is not restored; use [`restore_mode`](Self::restore_mode) first.
    pub fn close(mut self) -> Result<(), Error> {
        self.emergency = None;
        match self.owned.take() {
            Some(fd) => Ok(file::close(fd)?),
            None => Ok(()),
        }
    }
}

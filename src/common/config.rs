use super::Error;

/// `C-g`, the conventional quit character.
pub const DEFAULT_QUIT_CHAR: u8 = 0x07;

/// Log base 2 of the ratio between the known stack extent and the guard margin past its top.
pub const DEFAULT_STACK_HEURISTIC_SHIFT: u32 = 8;

/// Number of frames printed by the fatal signal backtrace.
pub const DEFAULT_BACKTRACE_LIMIT: u16 = 40;

/// Upper bound for [`Config::backtrace_limit`].
pub const BACKTRACE_LIMIT_MAX: u16 = 500;

/// Settings that shape how the terminal, signal and process layers behave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Whether the process drives a terminal. Batch runs leave `SIGPIPE` alone, respect
    /// inherited `SIG_IGN` dispositions and never touch terminal modes.
    pub interactive: bool,
    /// Character bound to `VINTR` and `VQUIT` on the controlling terminal.
    pub quit_char: u8,
    /// Default for new ttys: honor `C-s`/`C-q` flow control.
    pub flow_control: bool,
    /// Default for new ttys: pass the 8th bit of input through.
    pub meta_key: bool,
    /// With IEEE floats `SIGFPE` is a thread-fatal fault; otherwise it becomes an arithmetic
    /// error raised on the main thread.
    pub ieee_floating_point: bool,
    pub attempt_stack_overflow_recovery: bool,
    pub stack_heuristic_shift: u32,
    pub backtrace_limit: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interactive: true,
            quit_char: DEFAULT_QUIT_CHAR,
            flow_control: false,
            meta_key: true,
            ieee_floating_point: true,
            attempt_stack_overflow_recovery: true,
            stack_heuristic_shift: DEFAULT_STACK_HEURISTIC_SHIFT,
            backtrace_limit: DEFAULT_BACKTRACE_LIMIT,
        }
    }
}

impl Config {
    /// Settings for a non-interactive run.
    pub fn batch() -> Self {
        Self {
            interactive: false,
            ..Default::default()
        }
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn quit_char(mut self, quit_char: u8) -> Self {
        self.quit_char = quit_char;
        self
    }

    pub fn flow_control(mut self, flow_control: bool) -> Self {
        self.flow_control = flow_control;
        self
    }

    pub fn meta_key(mut self, meta_key: bool) -> Self {
        self.meta_key = meta_key;
        self
    }

    pub fn ieee_floating_point(mut self, ieee: bool) -> Self {
        self.ieee_floating_point = ieee;
        self
    }

    pub fn stack_overflow_recovery(mut self, attempt: bool) -> Self {
        self.attempt_stack_overflow_recovery = attempt;
        self
    }

    pub fn stack_heuristic_shift(mut self, shift: u32) -> Self {
        self.stack_heuristic_shift = shift;
        self
    }

    pub fn backtrace_limit(mut self, limit: u16) -> Self {
        self.backtrace_limit = limit;
        self
    }

    /// Check that every setting is within range.
    pub fn validate(self) -> Result<Self, Error> {
        if !self.quit_char.is_ascii() {
            return Err(Error::Configuration(format!(
                "quit character {:#04x} is not an ASCII character",
                self.quit_char
            )));
        }
        if !(1..=16).contains(&self.stack_heuristic_shift) {
            return Err(Error::Configuration(format!(
                "stack heuristic shift {} is outside 1..=16",
                self.stack_heuristic_shift
            )));
        }
        if self.backtrace_limit > BACKTRACE_LIMIT_MAX {
            return Err(Error::Configuration(format!(
                "backtrace limit {} exceeds {BACKTRACE_LIMIT_MAX}",
                self.backtrace_limit
            )));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_validate() {
        let config = Config::default().validate().unwrap();
        assert_eq!(config.quit_char, 0x07);
        assert_eq!(config.stack_heuristic_shift, 8);
        assert!(config.interactive);
    }

    #[test]
    fn batch_differs_only_in_interactivity() {
        assert_eq!(Config::batch(), Config::default().interactive(false));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(Config::default().quit_char(0xc7).validate().is_err());
        assert!(Config::default().stack_heuristic_shift(0).validate().is_err());
        assert!(Config::default().stack_heuristic_shift(17).validate().is_err());
        assert!(Config::default().backtrace_limit(501).validate().is_err());
        assert!(Config::default().backtrace_limit(500).validate().is_ok());
    }
}

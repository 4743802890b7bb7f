//! Reading, building and applying terminal modes.
use std::{fmt, io, mem::MaybeUninit, os::fd::RawFd};

use libc::{
    cc_t, tcflag_t, termios, CS8, CSIZE, ECHO, ICANON, ICRNL, IEXTEN, IGNBRK, INLCR,
    ISIG, ISTRIP, IXANY, IXON, OLCUC, ONLCR, OPOST, PARENB, TCSADRAIN, TCSAFLUSH, VDISCARD, VEOF,
    VERASE, VINTR, VKILL, VLNEXT, VMIN, VQUIT, VREPRINT, VSTART, VSTOP, VSUSP, VTIME, VWERASE,
};

use crate::{
    common::Error,
    cutils::cerr,
    log::dev_warn,
    system::{
        interface::{Platform, RealPlatform},
        retry::retry_io,
    },
};

/// The value that turns a special character off.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub const CDISABLE: cc_t = 0;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub const CDISABLE: cc_t = 0xff;

#[cfg(any(target_os = "linux", target_os = "android"))]
const TAB_EXPANSION: tcflag_t = libc::TAB3;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const TAB_EXPANSION: tcflag_t = libc::OXTABS;

#[cfg(any(target_os = "linux", target_os = "android"))]
const OUTPUT_DELAYS: tcflag_t =
    libc::NLDLY | libc::CRDLY | libc::TABDLY | libc::BSDLY | libc::VTDLY | libc::FFDLY;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const OUTPUT_DELAYS: tcflag_t = 0;

/// Special characters that only get in the way of an editor reading raw keys.
#[cfg(any(target_os = "linux", target_os = "android"))]
const EDITING_DISABLED_CHARS: &[usize] =
    &[VSUSP, VLNEXT, VREPRINT, VWERASE, VDISCARD, libc::VSWTC];
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const EDITING_DISABLED_CHARS: &[usize] =
    &[VSUSP, libc::VDSUSP, VLNEXT, VREPRINT, VWERASE, VDISCARD];

const fn control(c: u8) -> cc_t {
    c & 0o37
}

/// How many times [`set_mode`] applies a mode before giving up on the terminal taking it.
const SET_ATTEMPTS: usize = 10;

/// A snapshot of the settings of one terminal: speeds, character size, echo, line editing,
/// special characters and output processing.
#[derive(Clone, Copy)]
pub struct TerminalMode {
    raw: termios,
}

impl TerminalMode {
    pub fn from_raw(raw: termios) -> Self {
        Self { raw }
    }

    pub fn as_raw(&self) -> &termios {
        &self.raw
    }

    pub fn as_raw_mut(&mut self) -> &mut termios {
        &mut self.raw
    }

    /// The special character at index `which`, e.g. `libc::VINTR`.
    pub fn special_char(&self, which: usize) -> cc_t {
        self.raw.c_cc[which]
    }

    pub fn set_special_char(&mut self, which: usize, value: cc_t) {
        self.raw.c_cc[which] = value;
    }

    pub fn input_flags(&self) -> tcflag_t {
        self.raw.c_iflag
    }

    pub fn output_flags(&self) -> tcflag_t {
        self.raw.c_oflag
    }

    pub fn control_flags(&self) -> tcflag_t {
        self.raw.c_cflag
    }

    pub fn local_flags(&self) -> tcflag_t {
        self.raw.c_lflag
    }

    /// The output speed in bits per second. A hung-up line counts as 1200 and a speed we do not
    /// know as 9600.
    pub fn baud_rate(&self) -> u32 {
        match unsafe { libc::cfgetospeed(&self.raw) } {
            libc::B0 => 1200,
            libc::B50 => 50,
            libc::B75 => 75,
            libc::B110 => 110,
            libc::B134 => 134,
            libc::B150 => 150,
            libc::B200 => 200,
            libc::B300 => 300,
            libc::B600 => 600,
            libc::B1200 => 1200,
            libc::B1800 => 1800,
            libc::B2400 => 2400,
            libc::B4800 => 4800,
            libc::B9600 => 9600,
            libc::B19200 => 19200,
            libc::B38400 => 38400,
            libc::B57600 => 57600,
            libc::B115200 => 115200,
            libc::B230400 => 230400,
            _ => 9600,
        }
    }

    /// Whether the flags and special characters equal those of `other`.
    ///
    /// Some systems keep reserved fields in `termios` that are not filled in consistently, so
    /// this is the comparison used to check that a mode change took effect.
    pub fn same_settings(&self, other: &Self) -> bool {
        self.raw.c_iflag == other.raw.c_iflag
            && self.raw.c_oflag == other.raw.c_oflag
            && self.raw.c_cflag == other.raw.c_cflag
            && self.raw.c_lflag == other.raw.c_lflag
            && self.raw.c_cc == other.raw.c_cc
    }

    fn speeds(&self) -> (libc::speed_t, libc::speed_t) {
        unsafe { (libc::cfgetispeed(&self.raw), libc::cfgetospeed(&self.raw)) }
    }
}

impl PartialEq for TerminalMode {
    fn eq(&self, other: &Self) -> bool {
        self.same_settings(other) && self.speeds() == other.speeds()
    }
}

impl Eq for TerminalMode {}

impl fmt::Debug for TerminalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalMode")
            .field("iflag", &format_args!("{:#o}", self.raw.c_iflag))
            .field("oflag", &format_args!("{:#o}", self.raw.c_oflag))
            .field("cflag", &format_args!("{:#o}", self.raw.c_cflag))
            .field("lflag", &format_args!("{:#o}", self.raw.c_lflag))
            .field("cc", &self.raw.c_cc)
            .field("speeds", &self.speeds())
            .finish()
    }
}

pub(crate) fn tcgetattr(fd: RawFd) -> io::Result<TerminalMode> {
    let mut raw = MaybeUninit::<termios>::zeroed();
    cerr(unsafe { libc::tcgetattr(fd, raw.as_mut_ptr()) })?;
    Ok(TerminalMode::from_raw(unsafe { raw.assume_init() }))
}

/// Apply `mode` after the queued output is written. Queued input is discarded if `flush` is set.
pub(crate) fn tcsetattr(fd: RawFd, mode: &TerminalMode, flush: bool) -> io::Result<()> {
    let action = if flush { TCSAFLUSH } else { TCSADRAIN };
    cerr(unsafe { libc::tcsetattr(fd, action, &mode.raw) }).map(|_| ())
}

/// Read the current mode of the terminal on `fd`.
pub fn get_mode<P: Platform>(platform: &P, fd: RawFd) -> io::Result<TerminalMode> {
    retry_io(|| platform.terminal_mode(fd))
}

/// Apply `mode` to the terminal on `fd`.
///
/// A terminal may report success while ignoring part of a change, so the mode is read back and
/// applied again until it matches, at most ten times.
pub fn set_mode<P: Platform>(
    platform: &P,
    fd: RawFd,
    mode: &TerminalMode,
    flush: bool,
) -> io::Result<()> {
    for _ in 0..SET_ATTEMPTS {
        retry_io(|| platform.set_terminal_mode(fd, mode, flush))?;
        if get_mode(platform, fd)?.same_settings(mode) {
            return Ok(());
        }
    }

    dev_warn!("terminal on fd {fd} did not take the requested mode after {SET_ATTEMPTS} attempts");
    Ok(())
}

/// What [`editing_mode`] needs to know about the terminal and the user's preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditingOptions {
    /// Let `C-s` and `C-q` stop and restart output.
    pub flow_control: bool,
    /// Pass the eighth bit of input through.
    pub meta_key: bool,
    /// The character that interrupts a running command, on the controlling terminal.
    pub quit_char: u8,
    /// Whether this is the controlling terminal of the process.
    pub controlling: bool,
}

/// The mode an editor runs a terminal in, derived from the mode it was found in.
///
/// Input is read a character at a time without echo or line editing. Signals stay enabled, but
/// on the controlling terminal both interrupt and quit are generated by the quit character, and
/// on other terminals by no character at all.
pub fn editing_mode(original: &TerminalMode, options: &EditingOptions) -> TerminalMode {
    let mut mode = *original;
    let raw = &mut mode.raw;

    raw.c_iflag |= IGNBRK;
    raw.c_iflag &= !(ICRNL | INLCR | ISTRIP);
    raw.c_lflag &= !(ECHO | ICANON | IEXTEN);
    raw.c_lflag |= ISIG;
    if options.flow_control {
        raw.c_iflag |= IXON;
        raw.c_iflag &= !IXANY;
    } else {
        raw.c_iflag &= !IXON;
    }
    raw.c_oflag &= !(ONLCR | TAB_EXPANSION);
    if options.meta_key {
        raw.c_cflag |= CS8;
        raw.c_cflag &= !PARENB;
    }

    let signal_char = if options.controlling {
        options.quit_char
    } else {
        CDISABLE
    };
    raw.c_cc[VINTR] = signal_char;
    raw.c_cc[VQUIT] = signal_char;
    raw.c_cc[VMIN] = 1;
    raw.c_cc[VTIME] = 0;
    for &which in EDITING_DISABLED_CHARS {
        raw.c_cc[which] = CDISABLE;
    }
    if options.flow_control {
        raw.c_cc[VSTART] = control(b'q');
        raw.c_cc[VSTOP] = control(b's');
    } else {
        raw.c_cc[VSTART] = CDISABLE;
        raw.c_cc[VSTOP] = CDISABLE;
    }

    mode
}

/// The mode for the terminal end of a pseudo-terminal that talks to a subprocess: line
/// editing and signals are kept, echo and every output translation except post-processing go.
pub fn child_mode(original: &TerminalMode) -> TerminalMode {
    let mut mode = *original;
    let raw = &mut mode.raw;

    raw.c_oflag |= OPOST;
    raw.c_oflag &= !(ONLCR | OUTPUT_DELAYS | OLCUC | TAB_EXPANSION);
    raw.c_lflag &= !ECHO;
    raw.c_lflag |= ISIG | ICANON;
    raw.c_iflag &= !ISTRIP;
    raw.c_cflag = (raw.c_cflag & !CSIZE) | CS8;
    raw.c_cc[VERASE] = CDISABLE;
    raw.c_cc[VKILL] = CDISABLE;
    if raw.c_cc[VQUIT] == CDISABLE {
        raw.c_cc[VQUIT] = control(b'\\');
    }
    if raw.c_cc[VINTR] == CDISABLE {
        raw.c_cc[VINTR] = control(b'c');
    }
    raw.c_cc[VEOF] = control(b'd');

    mode
}

/// Put the terminal on `fd`, the subprocess end of a pseudo-terminal, into [`child_mode`].
pub fn setup_child_tty(fd: RawFd) -> Result<(), Error> {
    let platform = RealPlatform;
    let mode = child_mode(&get_mode(&platform, fd)?);
    set_mode(&platform, fd, &mode, false)?;
    Ok(())
}

/// Turn off echo and line editing on the terminal on `fd`.
pub fn suppress_echo_on_tty(fd: RawFd) -> Result<(), Error> {
    let platform = RealPlatform;
    let mut mode = get_mode(&platform, fd)?;
    mode.raw.c_lflag &= !(ICANON | ECHO);
    set_mode(&platform, fd, &mode, false)?;
    Ok(())
}

//! Serial ports: opening them and setting their line parameters.
use std::{
    fmt,
    os::fd::{AsRawFd, OwnedFd, RawFd},
    path::Path,
};

use libc::{
    speed_t, CLOCAL, CREAD, CRTSCTS, CS7, CS8, CSIZE, CSTOPB, IGNPAR, INPCK, IXOFF, IXON,
    PARENB, PARODD,
};

use crate::{
    common::Error,
    log::dev_info,
    system::{file, interface::Platform, retry::Interruptible},
};

use super::mode::{get_mode, set_mode, TerminalMode};

/// Line speeds in bits per second and the `termios` constants that select them.
const SPEEDS: &[(u32, speed_t)] = &[
    (0, libc::B0),
    (50, libc::B50),
    (75, libc::B75),
    (110, libc::B110),
    (134, libc::B134),
    (150, libc::B150),
    (200, libc::B200),
    (300, libc::B300),
    (600, libc::B600),
    (1200, libc::B1200),
    (1800, libc::B1800),
    (2400, libc::B2400),
    (4800, libc::B4800),
    (9600, libc::B9600),
    (19200, libc::B19200),
    (38400, libc::B38400),
    (57600, libc::B57600),
    (115200, libc::B115200),
    (230400, libc::B230400),
    #[cfg(target_os = "linux")]
    (460800, libc::B460800),
    #[cfg(target_os = "linux")]
    (500000, libc::B500000),
    #[cfg(target_os = "linux")]
    (576000, libc::B576000),
    #[cfg(target_os = "linux")]
    (921600, libc::B921600),
    #[cfg(target_os = "linux")]
    (1000000, libc::B1000000),
    #[cfg(target_os = "linux")]
    (1152000, libc::B1152000),
    #[cfg(target_os = "linux")]
    (1500000, libc::B1500000),
    #[cfg(target_os = "linux")]
    (2000000, libc::B2000000),
    #[cfg(target_os = "linux")]
    (2500000, libc::B2500000),
    #[cfg(target_os = "linux")]
    (3000000, libc::B3000000),
    #[cfg(target_os = "linux")]
    (3500000, libc::B3500000),
    #[cfg(target_os = "linux")]
    (4000000, libc::B4000000),
];

fn speed_constant(bits_per_second: u32) -> Option<speed_t> {
    SPEEDS
        .iter()
        .find_map(|&(speed, constant)| (speed == bits_per_second).then_some(constant))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteSize {
    Seven,
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    /// RTS/CTS.
    Hardware,
    /// XON/XOFF.
    Software,
}

/// The line parameters of a serial port. The default is 9600 baud, 8N1, no flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    speed: u32,
    byte_size: ByteSize,
    parity: Parity,
    stop_bits: StopBits,
    flow_control: FlowControl,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            speed: 9600,
            byte_size: ByteSize::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialSettings {
    pub fn new(speed: u32) -> Self {
        Self {
            speed,
            ..Self::default()
        }
    }

    pub fn byte_size(mut self, byte_size: ByteSize) -> Self {
        self.byte_size = byte_size;
        self
    }

    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }

    pub fn speed(&self) -> u32 {
        self.speed
    }

    /// The usual short form of the framing, such as `8N1`.
    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SerialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits = match self.byte_size {
            ByteSize::Seven => 7,
            ByteSize::Eight => 8,
        };
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        let stop = match self.stop_bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        };
        write!(f, "{bits}{parity}{stop}")
    }
}

/// Open the serial port at `path` without making it our controlling terminal and without
/// waiting for a carrier. Other processes are kept from opening it as well, where the system
/// supports that.
pub fn open(path: &Path) -> Result<OwnedFd, Error> {
    let flags = libc::O_RDWR | libc::O_NOCTTY | libc::O_NONBLOCK;
    let fd = file::open(path, flags, 0, Interruptible::No)?;
    // exclusive use is a courtesy; a port that does not support it is still usable
    unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCEXCL) };
    Ok(fd)
}

/// The mode `settings` describe, starting from `current`: raw input and output, the receiver
/// enabled and modem control lines ignored.
pub fn serial_mode(
    current: &TerminalMode,
    settings: &SerialSettings,
) -> Result<TerminalMode, Error> {
    let speed = speed_constant(settings.speed).ok_or_else(|| {
        Error::Configuration(format!("unsupported serial speed {}", settings.speed))
    })?;

    let mut mode = *current;
    let raw = mode.as_raw_mut();
    unsafe {
        libc::cfmakeraw(raw);
        libc::cfsetispeed(raw, speed);
        libc::cfsetospeed(raw, speed);
    }
    raw.c_cflag |= CLOCAL | CREAD;

    raw.c_cflag &= !CSIZE;
    raw.c_cflag |= match settings.byte_size {
        ByteSize::Seven => CS7,
        ByteSize::Eight => CS8,
    };

    raw.c_cflag &= !(PARENB | PARODD);
    raw.c_iflag &= !(IGNPAR | INPCK);
    match settings.parity {
        Parity::None => {}
        Parity::Even => {
            raw.c_cflag |= PARENB;
            raw.c_iflag |= IGNPAR | INPCK;
        }
        Parity::Odd => {
            raw.c_cflag |= PARENB | PARODD;
            raw.c_iflag |= IGNPAR | INPCK;
        }
    }

    raw.c_cflag &= !CSTOPB;
    if settings.stop_bits == StopBits::Two {
        raw.c_cflag |= CSTOPB;
    }

    raw.c_cflag &= !CRTSCTS;
    raw.c_iflag &= !(IXON | IXOFF);
    match settings.flow_control {
        FlowControl::None => {}
        FlowControl::Hardware => raw.c_cflag |= CRTSCTS,
        FlowControl::Software => raw.c_iflag |= IXON | IXOFF,
    }

    Ok(mode)
}

/// Apply `settings` to the serial port on `fd`.
pub fn configure<P: Platform>(
    platform: &P,
    fd: RawFd,
    settings: &SerialSettings,
) -> Result<(), Error> {
    let current = get_mode(platform, fd)?;
    set_mode(platform, fd, &serial_mode(&current, settings)?, false)?;
    dev_info!("serial port on fd {fd} set to {} {settings}", settings.speed);
    Ok(())
}

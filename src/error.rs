//! Error types for device creation and packet I/O.

use std::{error, fmt, io, result};

/// Creates an [`io::Error`] with a custom message prefixed to the current
/// `errno` value.
///
/// [`io::Error`]: std::io::Error
#[macro_export]
macro_rules! errno {
    ($($arg:tt)+) => {{
        let errno = ::std::io::Error::last_os_error();
        let prefix = format!($($arg)+);
        let msg = format!("{prefix}: {errno}");
        ::std::io::Error::new(errno.kind(), msg)
    }};
}

/// A convenience wrapper around `Result` for [crate::Error].
pub type Result<T> = result::Result<T, Error>;

/// Represents errors that can occur while creating, driving, or tearing down a
/// TUN virtual network device.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The TUN control path could not be opened (missing kernel module,
    /// insufficient permissions, device busy).
    Open(io::Error),
    /// The kernel rejected the interface configuration request.
    Configure(io::Error),
    /// A single read from the device failed.
    Read(io::Error),
    /// A single write to the device failed.
    Write(io::Error),
    /// The provided device configuration is invalid.
    Config(ConfigError),
    /// The packet length exceeds the length of its buffer.
    InvalidPacketLength {
        /// The packet length provided.
        len: usize,
        /// The length of the buffer backing the packet.
        capacity: usize,
    },
    /// The device I/O loops have not been started.
    NotBound,
    /// The device I/O loops are already running.
    AlreadyBound,
    /// The device has been cancelled or closed.
    Stopped,
    /// Any other I/O error.
    Io(io::Error),
}

impl Error {
    /// Returns the underlying OS error code, if this error wraps one.
    pub fn raw_os_error(&self) -> Option<i32> {
        match *self {
            Error::Open(ref e)
            | Error::Configure(ref e)
            | Error::Read(ref e)
            | Error::Write(ref e)
            | Error::Io(ref e) => e.raw_os_error(),
            _ => None,
        }
    }

    /// Returns `true` if the error indicates that the device is no longer
    /// usable, rather than a single operation having failed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.raw_os_error(),
            Some(libc::EBADF | libc::EBADFD | libc::ENODEV | libc::ENXIO | libc::EFAULT)
        )
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Open(ref e)
            | Error::Configure(ref e)
            | Error::Read(ref e)
            | Error::Write(ref e)
            | Error::Io(ref e) => Some(e),
            Error::Config(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Error {
        Error::Config(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Open(ref e) => write!(f, "failed to open TUN control path: {e}"),
            Error::Configure(ref e) => write!(f, "failed to configure TUN interface: {e}"),
            Error::Read(ref e) => write!(f, "failed to read from TUN device: {e}"),
            Error::Write(ref e) => write!(f, "failed to write to TUN device: {e}"),
            Error::Config(ref e) => fmt::Display::fmt(e, f),
            Error::InvalidPacketLength { len, capacity } => {
                write!(
                    f,
                    "invalid packet length: {len} bytes (exceeds buffer length {capacity} bytes)"
                )
            }
            Error::NotBound => write!(f, "device I/O loops have not been started"),
            Error::AlreadyBound => write!(f, "device I/O loops are already running"),
            Error::Stopped => write!(f, "device has been stopped"),
            Error::Io(ref e) => fmt::Display::fmt(e, f),
        }
    }
}

/// Represents errors in a device configuration, detected before any kernel
/// resource is acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The interface name does not fit in `IFNAMSIZ` including the trailing
    /// null byte.
    NameTooLong {
        /// The length of the name provided.
        provided: usize,
        /// The maximum allowed length.
        maximum: usize,
    },
    /// The interface name contains a null (`\0`) byte.
    NameContainsNul,
    /// The queue capacity must be at least one packet.
    ZeroQueueCapacity,
    /// The packet buffer is too small to hold a minimal IP packet.
    PacketSizeTooSmall {
        /// The packet buffer size provided.
        provided: usize,
        /// The minimum allowed packet buffer size.
        minimum: usize,
    },
    /// The poll interval must be non-zero.
    ZeroPollInterval,
}

impl error::Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ConfigError::NameTooLong { provided, maximum } => {
                write!(
                    f,
                    "invalid interface name: {provided} bytes (exceeds maximum allowed {maximum} bytes)"
                )
            }
            ConfigError::NameContainsNul => {
                write!(f, "invalid interface name: contains a null byte")
            }
            ConfigError::ZeroQueueCapacity => {
                write!(f, "invalid queue capacity: 0 (must hold at least one packet)")
            }
            ConfigError::PacketSizeTooSmall { provided, minimum } => {
                write!(
                    f,
                    "invalid packet size: {provided} bytes (less than minimum required {minimum} bytes)"
                )
            }
            ConfigError::ZeroPollInterval => {
                write!(f, "invalid poll interval: 0 (must be greater than 0)")
            }
        }
    }
}

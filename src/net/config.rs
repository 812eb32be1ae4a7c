//! Configuration of a [crate::NetDevice] and its defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::tun_tap::{CONTROL_PATH, validate_name};
use crate::{ConfigError, Result};

/// Default name requested for the interface.
pub const DEFAULT_NAME: &str = "tun0";

/// Default capacity, in packets, of both the inbound and outbound queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Default size of the buffer allocated for each packet read from the device.
pub const DEFAULT_PACKET_SIZE: usize = 2048;

/// Default upper bound on how long a loop waits before re-checking for
/// cancellation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Smallest accepted packet buffer, the minimum IPv4 MTU (RFC 791).
pub const MIN_PACKET_SIZE: usize = 68;

/// How the I/O loops react to a failed device read or write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Log every failure and keep going.
    #[default]
    Continue,
    /// Log every failure, and stop both loops when the failure indicates the
    /// device is gone (see [crate::Error::is_fatal]).
    StopOnFatal,
}

/// Configuration of a [crate::NetDevice].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Name requested for the interface.
    pub name: String,
    /// Path of the TUN control device.
    pub path: PathBuf,
    /// Capacity, in packets, of the inbound and outbound queues.
    pub queue_capacity: usize,
    /// Size of the buffer allocated for each packet read.
    pub packet_size: usize,
    /// Upper bound on how long a loop waits before re-checking for
    /// cancellation.
    pub poll_interval: Duration,
    /// Reaction of the loops to failed reads and writes.
    pub error_policy: ErrorPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            path: PathBuf::from(CONTROL_PATH),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            packet_size: DEFAULT_PACKET_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            error_policy: ErrorPolicy::Continue,
        }
    }
}

impl Config {
    /// Creates a default configuration for the interface `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Sets the path of the TUN control device.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the capacity of both queues.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the size of the buffer allocated for each packet read.
    pub fn with_packet_size(mut self, size: usize) -> Self {
        self.packet_size = size;
        self
    }

    /// Sets the cancellation poll interval of the loops.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the error policy of the loops.
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Checks the configuration without touching any kernel resource.
    ///
    /// # Errors
    ///
    /// Returns [crate::Error::Config] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;

        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity.into());
        }

        if self.packet_size < MIN_PACKET_SIZE {
            return Err(ConfigError::PacketSizeTooSmall {
                provided: self.packet_size,
                minimum: MIN_PACKET_SIZE,
            }
            .into());
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval.into());
        }

        Ok(())
    }
}

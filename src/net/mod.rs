//! Packet queues on top of a TUN virtual network device.

pub mod config;
pub mod device;
pub mod packet;

#[cfg(test)]
pub(crate) mod mock;

pub use config::{Config, ErrorPolicy};
pub use device::{CancelToken, NetDevice, State, Stats};
pub use packet::Packet;

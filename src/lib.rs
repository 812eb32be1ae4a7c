//! A Linux TUN virtual network device exposed to user space as a queue of raw
//! IP packets.
//!
//! Kernel I/O runs on two background loops started by [NetDevice::bind], so
//! consumers only ever deal with [Packet]s through [NetDevice::read] and
//! [NetDevice::write].

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

#[cfg(not(target_os = "linux"))]
compile_error!("This crate is only compatible with Linux systems that support TUN/TAP devices.");

pub mod dump;
pub mod error;
pub mod log;
pub mod net;
pub mod tun_tap;

pub use error::{ConfigError, Error, Result};
pub use net::{CancelToken, Config, ErrorPolicy, NetDevice, Packet, State, Stats};
pub use tun_tap::{Device, Tun};

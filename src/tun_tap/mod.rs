//! TUN/TAP provides packet reception and transmission for user space programs.
//!
//! It can be seen as a simple Point-to-Point or Ethernet device, which, instead
//! of receiving packets from physical media, receives them from the user space
//! program and instead of sending packets via physical media writes them to the
//! user space program.

mod tun;
pub use tun::{CONTROL_PATH, MTU_SIZE, Tun};
pub(crate) use tun::validate_name;

use std::time::Duration;

use crate::Result;

/// Raw packet I/O against a kernel virtual network device.
///
/// Every call to [Device::recv] or [Device::send] transfers exactly one whole
/// packet. Implementations are shared between the ingress and egress loops of
/// a [crate::NetDevice], so all operations take `&self`.
pub trait Device: Send + Sync + 'static {
    /// Returns the name of the interface.
    fn name(&self) -> &str;

    /// Receives one packet into `buf`, returning the number of valid bytes.
    ///
    /// # Errors
    ///
    /// Returns [crate::Error::Read] if the read failed.
    fn recv(&self, buf: &mut [u8]) -> Result<usize>;

    /// Sends the packet contained in `buf`, returning the number of bytes
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [crate::Error::Write] if the write failed.
    fn send(&self, buf: &[u8]) -> Result<usize>;

    /// Waits up to `timeout` for a packet to become available for reading.
    ///
    /// Returns `true` if a following [Device::recv] will not block. The
    /// default implementation does not wait and always returns `true`, which
    /// leaves the caller blocked inside [Device::recv] instead.
    ///
    /// # Errors
    ///
    /// Returns [crate::Error::Read] if readiness could not be determined.
    fn poll_readable(&self, timeout: Duration) -> Result<bool> {
        let _ = timeout;
        Ok(true)
    }
}

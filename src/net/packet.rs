//! The unit of data exchanged with the TUN device.

use crate::{Error, Result};

/// A raw IP packet as exchanged with the TUN device.
///
/// The packet owns its buffer, but only the first [Packet::len] bytes are
/// meaningful. The contents of the remainder are unspecified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    buf: Vec<u8>,
    len: usize,
}

impl Packet {
    /// Creates a packet whose valid bytes are the first `len` bytes of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidPacketLength] if `len` exceeds `buf.len()`.
    pub fn new(buf: Vec<u8>, len: usize) -> Result<Self> {
        if len > buf.len() {
            return Err(Error::InvalidPacketLength {
                len,
                capacity: buf.len(),
            });
        }

        Ok(Self { buf, len })
    }

    /// Wraps a buffer filled by a device read of `len` bytes.
    pub(crate) fn filled(buf: Vec<u8>, len: usize) -> Self {
        debug_assert!(len <= buf.len());
        Self { buf, len }
    }

    /// Returns the number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the packet carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the length of the underlying buffer.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Returns the valid bytes of the packet.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Consumes the packet, returning its buffer truncated to the valid bytes.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.buf.truncate(self.len);
        self.buf
    }
}

impl AsRef<[u8]> for Packet {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl From<Vec<u8>> for Packet {
    fn from(buf: Vec<u8>) -> Self {
        let len = buf.len();
        Self { buf, len }
    }
}

impl From<&[u8]> for Packet {
    fn from(bytes: &[u8]) -> Self {
        Self::from(bytes.to_vec())
    }
}

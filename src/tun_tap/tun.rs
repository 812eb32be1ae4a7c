use std::ffi::CStr;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::time::Duration;
use std::{mem, ptr};

use super::Device;
use crate::{ConfigError, Error, Result, errno};

/// The Maximum Transmission Unit (MTU) for the TUN interface.
pub const MTU_SIZE: usize = 1500;

/// Path of the kernel's TUN/TAP clone device.
pub const CONTROL_PATH: &str = "/dev/net/tun";

/// Represents a TUN (network TUNnel) interface, a virtual network device that
/// acts as a software loopback for transferring IP packets between user space
/// and the kernel, operating at layer 3 of the OSI model.
///
/// The file handle is closed when the `Tun` is dropped, which also removes the
/// (non-persistent) interface from the system.
#[derive(Debug)]
pub struct Tun {
    fd: File,
    name: String,
}

impl Tun {
    /// Opens the control path at `path`, usually [CONTROL_PATH], and attaches
    /// it to the interface `dev`. Packets exchanged on the device are raw IP
    /// frames without any leading packet information.
    ///
    /// # Errors
    ///
    /// - [Error::Config] if `dev` is not a valid interface name.
    /// - [Error::Open] if `path` cannot be opened for reading and writing.
    /// - [Error::Configure] if the `TUNSETIFF` request is rejected. The handle
    ///   is closed before returning. This usually means the process lacks the
    ///   `CAP_NET_ADMIN` privilege or the name is already taken.
    pub fn open(path: impl AsRef<Path>, dev: &str) -> Result<Self> {
        validate_name(dev)?;

        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())
            .map_err(|err| {
                Error::Open(io::Error::new(
                    err.kind(),
                    format!("{}: {err}", path.as_ref().display()),
                ))
            })?;

        let mut ifr: libc::ifreq = unsafe { mem::zeroed() };

        // IFF_TUN   - TUN device (no Ethernet headers)
        //
        // IFF_NO_PI - Do not provide packet information
        let flags = libc::IFF_TUN | libc::IFF_NO_PI;

        unsafe {
            // SAFETY: `dev.len()` is less than `IFNAMSIZ`.
            ptr::copy_nonoverlapping(
                dev.as_ptr(),
                ifr.ifr_name.as_mut_ptr() as *mut u8,
                dev.len(),
            );

            ifr.ifr_ifru.ifru_flags = flags as i16;
        }

        // `fd` is dropped, and so closed, on the error path.
        if unsafe { libc::ioctl(fd.as_raw_fd(), libc::TUNSETIFF, &raw mut ifr) } == -1 {
            return Err(Error::Configure(errno!("TUNSETIFF on {dev:?} rejected")));
        }

        // SAFETY: `ifr_name` remains null-terminated after copying `dev`, and
        // the kernel writes back a null-terminated name.
        let name = unsafe {
            CStr::from_ptr(ifr.ifr_name.as_ptr())
                .to_string_lossy()
                .into_owned()
        };

        Ok(Self { fd, name })
    }

    /// Returns the assigned name of the TUN virtual network device.
    ///
    /// The name given for creating the TUN device is more of a suggestion
    /// to the kernel rather than a requirement, so the assigned name may be
    /// different than the one originally provided.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receives an IP packet from the TUN virtual network device.
    ///
    /// This call blocks until a packet is sent to the virtual network device.
    /// The buffer should be at least [MTU_SIZE] bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if data could not be read from the TUN device.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        (&self.fd).read(buf).map_err(Error::Read)
    }

    /// Sends a network packet to the TUN virtual network interface.
    ///
    /// # Notes
    ///
    /// Many errors are silently handled by the OS kernel, often resulting in
    /// dropped packets. While packets may appear to be sent successfully, they
    /// could be discarded by the kernel due to checksum validation failure,
    /// high send frequency, or unassigned destination addresses.
    ///
    /// # Errors
    ///
    /// Returns an error if data could not be written to the TUN device.
    pub fn send(&self, buf: &[u8]) -> Result<usize> {
        (&self.fd).write(buf).map_err(Error::Write)
    }

    /// Waits up to `timeout` for the TUN file handle to become readable.
    ///
    /// # Errors
    ///
    /// Returns an error if `poll` fails for any reason other than being
    /// interrupted by a signal, or if the handle reports an error condition.
    /// An interrupted wait is reported as not readable.
    ///
    /// An error or hang-up condition on the handle (the interface was deleted
    /// underneath it) is reported as `EBADFD`, the code a read on the
    /// detached handle fails with, so it classifies as [Error::is_fatal].
    pub fn poll_readable(&self, timeout: Duration) -> Result<bool> {
        let mut pfd = libc::pollfd {
            fd: self.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };

        let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

        match unsafe { libc::poll(&raw mut pfd, 1, timeout_ms) } {
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    return Ok(false);
                }
                Err(Error::Read(err))
            }
            0 => Ok(false),
            _ if pfd.revents & libc::POLLNVAL != 0 => {
                Err(Error::Read(io::Error::from_raw_os_error(libc::EBADF)))
            }
            _ if pfd.revents & (libc::POLLERR | libc::POLLHUP) != 0 => {
                Err(Error::Read(io::Error::from_raw_os_error(libc::EBADFD)))
            }
            _ => Ok(true),
        }
    }
}

impl Device for Tun {
    fn name(&self) -> &str {
        Tun::name(self)
    }

    fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        Tun::recv(self, buf)
    }

    fn send(&self, buf: &[u8]) -> Result<usize> {
        Tun::send(self, buf)
    }

    fn poll_readable(&self, timeout: Duration) -> Result<bool> {
        Tun::poll_readable(self, timeout)
    }
}

impl AsRawFd for Tun {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Checks that `dev` can be copied into `ifreq.ifr_name`.
pub(crate) fn validate_name(dev: &str) -> std::result::Result<(), ConfigError> {
    // The interface name must be less than `IFNAMSIZ` bytes to leave room
    // for the null terminator.
    if dev.len() >= libc::IFNAMSIZ {
        return Err(ConfigError::NameTooLong {
            provided: dev.len(),
            maximum: libc::IFNAMSIZ - 1,
        });
    }

    if dev.as_bytes().contains(&0) {
        return Err(ConfigError::NameContainsNul);
    }

    Ok(())
}

//! In-memory [Device] for exercising the device loops without a kernel.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::tun_tap::Device;
use crate::{Error, Result};

/// Scripted device: reads pop injected packets (or errors), writes are
/// recorded. Clones share state.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockDevice {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    pending: Mutex<VecDeque<io::Result<Vec<u8>>>>,
    readable: Condvar,
    written: Mutex<Vec<Vec<u8>>>,
    write_errors: Mutex<VecDeque<io::Error>>,
    poll_error: Mutex<Option<i32>>,
    polls: AtomicUsize,
    reads: AtomicUsize,
    writes: AtomicUsize,
    drops: AtomicUsize,
}

impl MockDevice {
    /// Makes `pkt` available to the next read.
    pub(crate) fn inject(&self, pkt: Vec<u8>) {
        self.inner.pending.lock().unwrap().push_back(Ok(pkt));
        self.inner.readable.notify_all();
    }

    /// Makes the next read fail with `err`.
    pub(crate) fn inject_error(&self, err: io::Error) {
        self.inner.pending.lock().unwrap().push_back(Err(err));
        self.inner.readable.notify_all();
    }

    /// Makes the next write fail with `err`.
    pub(crate) fn fail_next_write(&self, err: io::Error) {
        self.inner.write_errors.lock().unwrap().push_back(err);
    }

    /// Makes every readiness check from now on fail with the OS error `code`.
    pub(crate) fn fail_polls(&self, code: i32) {
        *self.inner.poll_error.lock().unwrap() = Some(code);
    }

    /// Number of `poll_readable` calls issued.
    pub(crate) fn polls(&self) -> usize {
        self.inner.polls.load(Ordering::SeqCst)
    }

    /// Packets successfully written, in order.
    pub(crate) fn written(&self) -> Vec<Vec<u8>> {
        self.inner.written.lock().unwrap().clone()
    }

    /// Number of `recv` calls issued.
    pub(crate) fn reads(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    /// Number of `send` calls issued.
    pub(crate) fn writes(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Number of `MockDevice` handles dropped so far.
    pub(crate) fn drops(&self) -> usize {
        self.inner.drops.load(Ordering::SeqCst)
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.inner.drops.fetch_add(1, Ordering::SeqCst);
    }
}

impl Device for MockDevice {
    fn name(&self) -> &str {
        "mock0"
    }

    fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);

        match self.inner.pending.lock().unwrap().pop_front() {
            Some(Ok(pkt)) => {
                buf[..pkt.len()].copy_from_slice(&pkt);
                Ok(pkt.len())
            }
            Some(Err(err)) => Err(Error::Read(err)),
            None => Err(Error::Read(io::ErrorKind::WouldBlock.into())),
        }
    }

    fn send(&self, buf: &[u8]) -> Result<usize> {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = self.inner.write_errors.lock().unwrap().pop_front() {
            return Err(Error::Write(err));
        }

        self.inner.written.lock().unwrap().push(buf.to_vec());
        Ok(buf.len())
    }

    fn poll_readable(&self, timeout: Duration) -> Result<bool> {
        self.inner.polls.fetch_add(1, Ordering::SeqCst);

        if let Some(code) = *self.inner.poll_error.lock().unwrap() {
            return Err(Error::Read(io::Error::from_raw_os_error(code)));
        }

        let pending = self.inner.pending.lock().unwrap();
        let (pending, _) = self
            .inner
            .readable
            .wait_timeout_while(pending, timeout, |pending| pending.is_empty())
            .unwrap();

        Ok(!pending.is_empty())
    }
}

/// Polls `cond` until it holds or `timeout` elapses.
pub(crate) fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }

    cond()
}

//! A TUN device exposed to user space as a pair of bounded packet queues.
//!
//! Binding a [NetDevice] starts two background threads:
//!
//! - the *ingress* loop, moving packets read from the kernel onto the inbound
//!   queue drained by [NetDevice::read], and
//! - the *egress* loop, moving packets queued by [NetDevice::write] to the
//!   kernel.
//!
//! Both loops share a [CancelToken] and stop at their next scheduling point
//! once it is triggered. A kernel call already in progress is not
//! interrupted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use std::{fmt, io};

use super::{Config, ErrorPolicy, Packet};
use crate::tun_tap::{Device, Tun};
use crate::{Error, Result, debug, error, info, warn};

/// How long [NetDevice::read_timeout] sleeps between attempts to take the
/// inbound queue from a concurrent reader.
const LOCK_RETRY: Duration = Duration::from_millis(1);

/// A shared cancellation signal.
///
/// Once triggered it stays triggered.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a new, untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers the token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` if the token has been triggered.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Lifecycle state of a [NetDevice].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The interface is configured but the loops have not been started.
    Created,
    /// The loops have been started and cancellation has not been requested.
    Running,
    /// Cancellation has been requested. The loops exit at their next
    /// scheduling point.
    Stopped,
}

/// Snapshot of the traffic counters of a [NetDevice].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Packets read from the kernel.
    pub rx_packets: u64,
    /// Bytes read from the kernel.
    pub rx_bytes: u64,
    /// Failed reads.
    pub rx_errors: u64,
    /// Packets written to the kernel.
    pub tx_packets: u64,
    /// Bytes written to the kernel.
    pub tx_bytes: u64,
    /// Failed writes.
    pub tx_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    rx_errors: AtomicU64,
    tx_packets: AtomicU64,
    tx_bytes: AtomicU64,
    tx_errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> Stats {
        Stats {
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
        }
    }
}

/// Queue endpoints and thread handles of a bound device.
#[derive(Debug)]
struct Loops {
    inbound: Mutex<Receiver<Packet>>,
    outbound: SyncSender<Packet>,
    ingress: JoinHandle<()>,
    egress: JoinHandle<()>,
}

/// A configured TUN interface exchanging raw IP packets through in-process
/// queues.
///
/// The device handle is owned exclusively by the `NetDevice` and is released
/// exactly once, by [NetDevice::close] or when the `NetDevice` is dropped,
/// after both loops have exited.
pub struct NetDevice<D: Device = Tun> {
    device: Arc<D>,
    config: Config,
    cancel: CancelToken,
    counters: Arc<Counters>,
    loops: Option<Loops>,
}

impl NetDevice<Tun> {
    /// Creates and configures the TUN interface `tun0` using the default
    /// [Config].
    ///
    /// # Errors
    ///
    /// See [NetDevice::with_config].
    pub fn create() -> Result<Self> {
        Self::with_config(Config::default())
    }

    /// Creates and configures a TUN interface as described by `config`.
    ///
    /// This creates a network interface visible to the whole system. Only one
    /// device per interface name is supported.
    ///
    /// # Errors
    ///
    /// - [Error::Config] if `config` is invalid.
    /// - [Error::Open] if the TUN control path cannot be opened.
    /// - [Error::Configure] if the kernel rejects the interface configuration.
    pub fn with_config(config: Config) -> Result<Self> {
        config.validate()?;

        let tun = Tun::open(&config.path, &config.name)?;
        info!("created TUN interface {}", tun.name());

        Ok(Self::new(tun, config))
    }
}

impl<D: Device> NetDevice<D> {
    /// Wraps an already configured `device`.
    ///
    /// # Errors
    ///
    /// Returns [Error::Config] if `config` is invalid. Only the queue, packet
    /// size, poll interval and error policy settings are used.
    pub fn from_device(device: D, config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(device, config))
    }

    fn new(device: D, config: Config) -> Self {
        Self {
            device: Arc::new(device),
            config,
            cancel: CancelToken::new(),
            counters: Default::default(),
            loops: None,
        }
    }

    /// Returns the name of the interface.
    pub fn name(&self) -> &str {
        self.device.name()
    }

    /// Returns the configuration of the device.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> State {
        if self.cancel.is_cancelled() {
            State::Stopped
        } else if self.loops.is_some() {
            State::Running
        } else {
            State::Created
        }
    }

    /// Returns `true` while both loops are alive.
    pub fn is_running(&self) -> bool {
        self.loops
            .as_ref()
            .is_some_and(|loops| !loops.ingress.is_finished() && !loops.egress.is_finished())
    }

    /// Returns a snapshot of the traffic counters.
    pub fn stats(&self) -> Stats {
        self.counters.snapshot()
    }

    /// Returns a handle to the cancellation signal shared by both loops.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Starts the ingress and egress loops and returns immediately.
    ///
    /// # Errors
    ///
    /// - [Error::AlreadyBound] if the loops are already running.
    /// - [Error::Stopped] if the device has been cancelled.
    /// - [Error::Io] if a loop thread could not be spawned.
    pub fn bind(&mut self) -> Result<()> {
        match self.state() {
            State::Created => {}
            State::Running => return Err(Error::AlreadyBound),
            State::Stopped => return Err(Error::Stopped),
        }

        let (inbound_tx, inbound_rx) = mpsc::sync_channel(self.config.queue_capacity);
        let (outbound_tx, outbound_rx) = mpsc::sync_channel(self.config.queue_capacity);

        let ingress = Ingress {
            worker: self.worker(),
            queue: inbound_tx,
            packet_size: self.config.packet_size,
        };
        let ingress = thread::Builder::new()
            .name(format!("{}-ingress", self.name()))
            .spawn(move || ingress.run())?;

        let egress = Egress {
            worker: self.worker(),
            queue: outbound_rx,
        };
        let egress = match thread::Builder::new()
            .name(format!("{}-egress", self.name()))
            .spawn(move || egress.run())
        {
            Ok(handle) => handle,
            Err(err) => {
                self.cancel.cancel();
                drop(inbound_rx);
                let _ = ingress.join();
                return Err(err.into());
            }
        };

        self.loops = Some(Loops {
            inbound: Mutex::new(inbound_rx),
            outbound: outbound_tx,
            ingress,
            egress,
        });

        info!(
            "bound {} (queue capacity: {}, packet size: {})",
            self.name(),
            self.config.queue_capacity,
            self.config.packet_size
        );

        Ok(())
    }

    /// Dequeues the next packet read from the kernel, blocking until one is
    /// available.
    ///
    /// Packets are returned in the order the kernel delivered them. Packets
    /// already queued when the device is cancelled are still returned.
    ///
    /// # Errors
    ///
    /// - [Error::NotBound] if [NetDevice::bind] has not been called.
    /// - [Error::Stopped] if the ingress loop has exited and the queue is
    ///   empty.
    pub fn read(&self) -> Result<Packet> {
        let loops = self.loops.as_ref().ok_or(Error::NotBound)?;
        let inbound = loops.inbound.lock().unwrap_or_else(PoisonError::into_inner);

        inbound.recv().map_err(|_| Error::Stopped)
    }

    /// Like [NetDevice::read], but gives up after `timeout`, returning
    /// `Ok(None)`.
    ///
    /// Time spent waiting for another thread blocked in [NetDevice::read] to
    /// release the inbound queue counts against `timeout`.
    ///
    /// # Errors
    ///
    /// See [NetDevice::read].
    pub fn read_timeout(&self, timeout: Duration) -> Result<Option<Packet>> {
        let loops = self.loops.as_ref().ok_or(Error::NotBound)?;
        let start = Instant::now();

        let inbound = loop {
            match loops.inbound.try_lock() {
                Ok(inbound) => break inbound,
                Err(TryLockError::Poisoned(err)) => break err.into_inner(),
                Err(TryLockError::WouldBlock) if start.elapsed() >= timeout => return Ok(None),
                Err(TryLockError::WouldBlock) => thread::sleep(LOCK_RETRY.min(timeout)),
            }
        };

        match inbound.recv_timeout(timeout.saturating_sub(start.elapsed())) {
            Ok(pkt) => Ok(Some(pkt)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Stopped),
        }
    }

    /// Enqueues `pkt` for the kernel, blocking while the outbound queue is
    /// full.
    ///
    /// Only the valid bytes of the packet are written. Packets are written in
    /// the order they were enqueued.
    ///
    /// # Errors
    ///
    /// - [Error::NotBound] if [NetDevice::bind] has not been called.
    /// - [Error::Stopped] if the device has been cancelled.
    pub fn write(&self, pkt: Packet) -> Result<()> {
        let loops = self.loops.as_ref().ok_or(Error::NotBound)?;

        if self.cancel.is_cancelled() {
            return Err(Error::Stopped);
        }

        loops.outbound.send(pkt).map_err(|_| Error::Stopped)
    }

    /// Enqueues `pkt` without blocking.
    ///
    /// Returns the packet back if the outbound queue is full.
    ///
    /// # Errors
    ///
    /// See [NetDevice::write].
    pub fn try_write(&self, pkt: Packet) -> Result<Option<Packet>> {
        let loops = self.loops.as_ref().ok_or(Error::NotBound)?;

        if self.cancel.is_cancelled() {
            return Err(Error::Stopped);
        }

        match loops.outbound.try_send(pkt) {
            Ok(()) => Ok(None),
            Err(TrySendError::Full(pkt)) => Ok(Some(pkt)),
            Err(TrySendError::Disconnected(_)) => Err(Error::Stopped),
        }
    }

    /// Triggers cancellation. Both loops exit at their next scheduling point,
    /// without waiting for them.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!("cancelling {}", self.name());
        }
        self.cancel.cancel();
    }

    /// Cancels the device, waits for both loops to exit, and releases the
    /// device handle.
    ///
    /// Any packets still queued in either direction are discarded.
    ///
    /// # Notes
    ///
    /// If the device does not support [Device::poll_readable], this waits for
    /// the ingress loop's in-flight read to complete.
    ///
    /// # Errors
    ///
    /// Returns [Error::Io] if a loop panicked. The handle is released anyway.
    pub fn close(mut self) -> Result<()> {
        let name = self.name().to_string();
        let result = self.teardown();

        drop(self);
        info!("closed {name}");

        result
    }

    fn worker(&self) -> Worker<D> {
        Worker {
            device: Arc::clone(&self.device),
            cancel: self.cancel.clone(),
            counters: Arc::clone(&self.counters),
            poll_interval: self.config.poll_interval,
            policy: self.config.error_policy,
        }
    }

    fn teardown(&mut self) -> Result<()> {
        self.cancel.cancel();

        let Some(loops) = self.loops.take() else {
            return Ok(());
        };

        let Loops {
            inbound,
            outbound,
            ingress,
            egress,
        } = loops;

        // Unblocks an ingress loop waiting on a full queue and an egress loop
        // waiting for work.
        drop(inbound);
        drop(outbound);

        let mut result = Ok(());
        for (role, handle) in [("ingress", ingress), ("egress", egress)] {
            if handle.join().is_err() {
                error!("{role} loop of {} panicked", self.name());
                result = Err(Error::Io(io::Error::other(format!("{role} loop panicked"))));
            }
        }

        result
    }
}

impl<D: Device> Drop for NetDevice<D> {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            error!("failed to tear down {}: {err}", self.name());
        }
    }
}

impl<D: Device> fmt::Debug for NetDevice<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetDevice")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// State shared by both loops.
struct Worker<D> {
    device: Arc<D>,
    cancel: CancelToken,
    counters: Arc<Counters>,
    poll_interval: Duration,
    policy: ErrorPolicy,
}

impl<D: Device> Worker<D> {
    /// Logs and counts a failed device operation. Returns `true` if the loop
    /// should stop.
    fn on_error(&self, err: &Error, counter: &AtomicU64) -> bool {
        counter.fetch_add(1, Ordering::Relaxed);
        error!("{err}");

        if self.policy == ErrorPolicy::StopOnFatal && err.is_fatal() {
            error!("{} is no longer usable -- stopping", self.device.name());
            self.cancel.cancel();
            return true;
        }

        false
    }
}

/// Kernel to inbound queue.
struct Ingress<D> {
    worker: Worker<D>,
    queue: SyncSender<Packet>,
    packet_size: usize,
}

impl<D: Device> Ingress<D> {
    fn run(self) {
        let w = &self.worker;
        debug!("ingress loop started");

        while !w.cancel.is_cancelled() {
            match w.device.poll_readable(w.poll_interval) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    if w.on_error(&err, &w.counters.rx_errors) {
                        break;
                    }
                    // The handle stays in the error state, so poll would
                    // return at once.
                    thread::sleep(w.poll_interval);
                    continue;
                }
            }

            if w.cancel.is_cancelled() {
                break;
            }

            let mut buf = vec![0u8; self.packet_size];

            let nbytes = match w.device.recv(&mut buf) {
                Ok(0) => continue,
                Ok(nbytes) => nbytes,
                Err(err) => {
                    if w.on_error(&err, &w.counters.rx_errors) {
                        break;
                    }
                    continue;
                }
            };

            w.counters.rx_packets.fetch_add(1, Ordering::Relaxed);
            w.counters
                .rx_bytes
                .fetch_add(nbytes as u64, Ordering::Relaxed);

            // Blocks while the queue is full. Fails once the device is closed.
            if self.queue.send(Packet::filled(buf, nbytes)).is_err() {
                break;
            }
        }

        debug!("ingress loop stopped");
    }
}

/// Outbound queue to kernel.
struct Egress<D> {
    worker: Worker<D>,
    queue: Receiver<Packet>,
}

impl<D: Device> Egress<D> {
    fn run(self) {
        let w = &self.worker;
        debug!("egress loop started");

        loop {
            let pkt = match self.queue.recv_timeout(w.poll_interval) {
                Ok(pkt) => pkt,
                Err(RecvTimeoutError::Timeout) if w.cancel.is_cancelled() => break,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            // Queued packets are still dequeued once cancelled, but never
            // written.
            if w.cancel.is_cancelled() {
                debug!("dropping {} byte packet after cancellation", pkt.len());
                break;
            }

            match w.device.send(pkt.as_bytes()) {
                Ok(nbytes) => {
                    if nbytes < pkt.len() {
                        warn!("short write: {nbytes} of {} bytes", pkt.len());
                    }

                    w.counters.tx_packets.fetch_add(1, Ordering::Relaxed);
                    w.counters
                        .tx_bytes
                        .fetch_add(nbytes as u64, Ordering::Relaxed);
                }
                Err(err) => {
                    if w.on_error(&err, &w.counters.tx_errors) {
                        break;
                    }
                }
            }
        }

        debug!("egress loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::mock::{MockDevice, wait_until};
    use proptest::prelude::*;

    const WAIT: Duration = Duration::from_secs(2);

    fn test_config() -> Config {
        Config::new("mock0")
            .with_queue_capacity(4)
            .with_poll_interval(Duration::from_millis(5))
    }

    fn bound(mock: &MockDevice, config: Config) -> NetDevice<MockDevice> {
        let dev = NetDevice::from_device(mock.clone(), config);
        assert!(dev.is_ok());
        let mut dev = dev.unwrap();

        assert!(dev.bind().is_ok());
        dev
    }

    #[test]
    fn read_and_write_before_bind_fail() {
        let dev = NetDevice::from_device(MockDevice::default(), test_config()).unwrap();

        assert_eq!(dev.state(), State::Created);
        assert!(!dev.is_running());
        assert!(matches!(dev.read(), Err(Error::NotBound)));
        assert!(matches!(
            dev.read_timeout(Duration::from_millis(1)),
            Err(Error::NotBound)
        ));
        assert!(matches!(
            dev.write(Packet::from(vec![0x45])),
            Err(Error::NotBound)
        ));
    }

    #[test]
    fn bind_twice_fails() {
        let mock = MockDevice::default();
        let mut dev = bound(&mock, test_config());

        assert_eq!(dev.state(), State::Running);
        assert!(dev.is_running());
        assert!(matches!(dev.bind(), Err(Error::AlreadyBound)));
    }

    #[test]
    fn bind_after_cancel_fails() {
        let mut dev = NetDevice::from_device(MockDevice::default(), test_config()).unwrap();
        dev.cancel();

        assert_eq!(dev.state(), State::Stopped);
        assert!(matches!(dev.bind(), Err(Error::Stopped)));
    }

    #[test]
    fn from_device_rejects_invalid_config() {
        let dev = NetDevice::from_device(MockDevice::default(), test_config().with_queue_capacity(0));
        assert!(matches!(dev, Err(Error::Config(_))));
    }

    #[test]
    fn read_returns_kernel_bytes_in_order() {
        let mock = MockDevice::default();
        mock.inject(vec![0x45, 0x00, 0x00, 0x14]);
        mock.inject(vec![0x60, 0x00]);

        let dev = bound(&mock, test_config());

        let first = dev.read();
        assert!(first.is_ok());
        let first = first.unwrap();
        assert_eq!(first.len(), 4);
        assert_eq!(first.as_bytes(), &[0x45, 0x00, 0x00, 0x14]);
        assert_eq!(first.capacity(), dev.config().packet_size);

        let second = dev.read().unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second.as_bytes(), &[0x60, 0x00]);

        let stats = dev.stats();
        assert_eq!(stats.rx_packets, 2);
        assert_eq!(stats.rx_bytes, 6);
    }

    #[test]
    fn read_timeout_returns_none_when_idle() {
        let mock = MockDevice::default();
        let dev = bound(&mock, test_config());

        let pkt = dev.read_timeout(Duration::from_millis(20));
        assert!(matches!(pkt, Ok(None)));

        mock.inject(vec![0x45, 0x01]);
        let pkt = dev.read_timeout(WAIT).unwrap();
        assert_eq!(pkt.map(Packet::into_bytes), Some(vec![0x45, 0x01]));
    }

    #[test]
    fn read_timeout_bounded_while_another_reader_waits() {
        let mock = MockDevice::default();
        let dev = bound(&mock, test_config());

        thread::scope(|s| {
            let reader = s.spawn(|| dev.read());
            // Give the reader time to take the inbound queue.
            thread::sleep(Duration::from_millis(50));

            let start = Instant::now();
            assert!(matches!(
                dev.read_timeout(Duration::from_millis(20)),
                Ok(None)
            ));
            assert!(start.elapsed() < Duration::from_millis(500));

            mock.inject(vec![0x45, 0x0D]);
            let pkt = reader.join().unwrap();
            assert_eq!(pkt.unwrap().as_bytes(), &[0x45, 0x0D]);
        });
    }

    #[test]
    fn write_sends_valid_bytes_in_order() {
        let mock = MockDevice::default();
        let dev = bound(&mock, test_config());

        // Trailing bytes past the packet length must never reach the kernel.
        let a = Packet::new(vec![0x45, 0x00, 0xAA, 0xAA], 2).unwrap();
        let b = Packet::new(vec![0x45, 0x01, 0x02, 0xBB, 0xBB], 3).unwrap();

        assert!(dev.write(a).is_ok());
        assert!(dev.write(b).is_ok());

        assert!(wait_until(WAIT, || mock.written().len() == 2));
        assert_eq!(
            mock.written(),
            vec![vec![0x45, 0x00], vec![0x45, 0x01, 0x02]]
        );

        let stats = dev.stats();
        assert_eq!(stats.tx_packets, 2);
        assert_eq!(stats.tx_bytes, 5);
    }

    #[test]
    fn try_write_enqueues_without_blocking() {
        let mock = MockDevice::default();
        let dev = bound(&mock, test_config());

        let returned = dev.try_write(Packet::from(vec![0x45, 0x02]));
        assert!(matches!(returned, Ok(None)));

        assert!(wait_until(WAIT, || mock.written().len() == 1));
        assert_eq!(mock.written(), vec![vec![0x45, 0x02]]);
    }

    #[test]
    fn full_inbound_queue_blocks_further_reads() {
        let mock = MockDevice::default();
        for i in 0..5u8 {
            mock.inject(vec![0x45, i]);
        }

        let dev = bound(&mock, test_config().with_queue_capacity(2));

        // Two packets fill the queue, the third read completes and then waits
        // for room.
        assert!(wait_until(WAIT, || mock.reads() == 3));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(mock.reads(), 3);

        let first = dev.read().unwrap();
        assert_eq!(first.as_bytes(), &[0x45, 0]);

        assert!(wait_until(WAIT, || mock.reads() == 4));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(mock.reads(), 4);

        for i in 1..5u8 {
            assert_eq!(dev.read().unwrap().as_bytes(), &[0x45, i]);
        }
    }

    #[test]
    fn read_error_skipped_and_loop_continues() {
        let mock = MockDevice::default();
        mock.inject_error(io::Error::from_raw_os_error(libc::EIO));
        mock.inject(vec![0x45, 0x03]);

        let dev = bound(&mock, test_config());

        let pkt = dev.read().unwrap();
        assert_eq!(pkt.as_bytes(), &[0x45, 0x03]);
        assert!(dev.is_running());

        let stats = dev.stats();
        assert_eq!(stats.rx_errors, 1);
        assert_eq!(stats.rx_packets, 1);
    }

    #[test]
    fn write_error_skipped_and_loop_continues() {
        let mock = MockDevice::default();
        mock.fail_next_write(io::Error::from_raw_os_error(libc::EIO));

        let dev = bound(&mock, test_config());

        assert!(dev.write(Packet::from(vec![0x45, 0x04])).is_ok());
        assert!(dev.write(Packet::from(vec![0x45, 0x05])).is_ok());

        assert!(wait_until(WAIT, || mock.writes() == 2));
        assert_eq!(mock.written(), vec![vec![0x45, 0x05]]);
        assert!(dev.is_running());

        let stats = dev.stats();
        assert_eq!(stats.tx_errors, 1);
        assert_eq!(stats.tx_packets, 1);
    }

    #[test]
    fn fatal_error_keeps_running_by_default() {
        let mock = MockDevice::default();
        mock.inject_error(io::Error::from_raw_os_error(libc::EBADF));
        mock.inject(vec![0x45, 0x06]);

        let dev = bound(&mock, test_config());

        assert_eq!(dev.read().unwrap().as_bytes(), &[0x45, 0x06]);
        assert_eq!(dev.state(), State::Running);
    }

    #[test]
    fn fatal_error_stops_loops_on_fatal_policy() {
        let mock = MockDevice::default();
        mock.inject_error(io::Error::from_raw_os_error(libc::ENODEV));
        mock.inject(vec![0x45, 0x07]);

        let dev = bound(
            &mock,
            test_config().with_error_policy(ErrorPolicy::StopOnFatal),
        );

        assert!(matches!(dev.read(), Err(Error::Stopped)));
        assert_eq!(dev.state(), State::Stopped);
        assert!(wait_until(WAIT, || !dev.is_running()));
        assert_eq!(mock.reads(), 1);
    }

    #[test]
    fn failing_poll_waits_between_attempts() {
        let mock = MockDevice::default();
        mock.fail_polls(libc::EIO);

        let dev = bound(
            &mock,
            test_config().with_poll_interval(Duration::from_millis(20)),
        );

        thread::sleep(Duration::from_millis(200));
        assert!(dev.is_running());

        // One attempt per poll interval, with room for scheduling jitter.
        let polls = mock.polls();
        assert!(polls >= 1);
        assert!(polls <= 20, "{polls} polls in 200ms");
        assert!(dev.stats().rx_errors >= 1);
        assert_eq!(mock.reads(), 0);
    }

    #[test]
    fn poll_error_stops_loops_on_fatal_policy() {
        let mock = MockDevice::default();
        mock.fail_polls(libc::EBADFD);

        let dev = bound(
            &mock,
            test_config().with_error_policy(ErrorPolicy::StopOnFatal),
        );

        assert!(matches!(dev.read(), Err(Error::Stopped)));
        assert_eq!(dev.state(), State::Stopped);
        assert!(wait_until(WAIT, || !dev.is_running()));
        assert_eq!(mock.polls(), 1);
        assert_eq!(mock.reads(), 0);
    }

    #[test]
    fn egress_drops_packet_dequeued_after_cancel() {
        let mock = MockDevice::default();
        let cancel = CancelToken::new();

        let (tx, rx) = mpsc::sync_channel(4);
        assert!(tx.send(Packet::from(vec![0x45, 0x0C])).is_ok());
        cancel.cancel();

        let egress = Egress {
            worker: Worker {
                device: Arc::new(mock.clone()),
                cancel,
                counters: Arc::default(),
                poll_interval: Duration::from_secs(5),
                policy: ErrorPolicy::Continue,
            },
            queue: rx,
        };

        // The packet is ready, so the loop dequeues it without waiting out
        // the poll interval, then drops it.
        let start = Instant::now();
        egress.run();

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(mock.writes(), 0);
        assert!(mock.written().is_empty());
    }

    #[test]
    fn cancel_stops_kernel_io() {
        let mock = MockDevice::default();
        let dev = bound(&mock, test_config());

        dev.cancel_token().cancel();
        assert_eq!(dev.state(), State::Stopped);
        assert!(wait_until(WAIT, || !dev.is_running()));

        mock.inject(vec![0x45, 0x08]);
        assert!(matches!(
            dev.write(Packet::from(vec![0x45, 0x09])),
            Err(Error::Stopped)
        ));

        thread::sleep(Duration::from_millis(50));
        assert_eq!(mock.reads(), 0);
        assert_eq!(mock.writes(), 0);
        assert!(matches!(dev.read(), Err(Error::Stopped)));
    }

    #[test]
    fn queued_packets_survive_cancel() {
        let mock = MockDevice::default();
        mock.inject(vec![0x45, 0x0A]);

        let dev = bound(&mock, test_config());
        assert!(wait_until(WAIT, || mock.reads() == 1));

        dev.cancel();

        assert_eq!(dev.read().unwrap().as_bytes(), &[0x45, 0x0A]);
        assert!(matches!(dev.read(), Err(Error::Stopped)));
    }

    #[test]
    fn close_releases_device_once() {
        let mock = MockDevice::default();
        mock.inject(vec![0x45, 0x0B]);

        let dev = bound(&mock, test_config());
        assert!(wait_until(WAIT, || mock.reads() == 1));

        assert!(dev.close().is_ok());
        assert_eq!(mock.drops(), 1);
    }

    #[test]
    fn close_unblocks_ingress_waiting_on_full_queue() {
        let mock = MockDevice::default();
        for i in 0..3u8 {
            mock.inject(vec![0x45, i]);
        }

        let dev = bound(&mock, test_config().with_queue_capacity(1));
        assert!(wait_until(WAIT, || mock.reads() == 2));

        assert!(dev.close().is_ok());
        assert_eq!(mock.drops(), 1);
        assert_eq!(mock.reads(), 2);
    }

    #[test]
    fn drop_releases_unbound_device() {
        let mock = MockDevice::default();
        let dev = NetDevice::from_device(mock.clone(), test_config()).unwrap();

        drop(dev);
        assert_eq!(mock.drops(), 1);
    }

    #[test]
    fn create_with_missing_control_path() {
        let dev = NetDevice::with_config(Config::new("tun0").with_path("/nonexistent/net/tun"));
        assert!(matches!(dev, Err(Error::Open(_))));
    }

    #[test]
    fn create_with_rejected_configuration() {
        let dev = NetDevice::with_config(Config::new("tun0").with_path("/dev/null"));
        assert!(matches!(dev, Err(Error::Configure(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn written_bytes_match_packet_length(
            buf in prop::collection::vec(any::<u8>(), 1..256),
            len in any::<prop::sample::Index>(),
        ) {
            let len = len.index(buf.len() + 1);
            let expected = buf[..len].to_vec();

            let mock = MockDevice::default();
            let dev = bound(&mock, test_config());

            prop_assert!(dev.write(Packet::new(buf, len).unwrap()).is_ok());
            prop_assert!(wait_until(WAIT, || mock.writes() == 1));
            prop_assert_eq!(mock.written(), vec![expected]);
        }
    }
}

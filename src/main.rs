use std::{env, io, mem, process, ptr, thread};

use tunq::dump::hex_dump;
use tunq::net::config::DEFAULT_NAME;
use tunq::{CancelToken, Config, Error, NetDevice, Result, errno, error, info};

fn main() {
    let name = env::args().nth(1).unwrap_or_else(|| DEFAULT_NAME.to_string());

    // Blocked before any thread is spawned so that every thread inherits the
    // mask and only the signal thread receives them.
    let mask = block_shutdown_signals().unwrap_or_else(|err| {
        error!("failed to block shutdown signals: {err}");
        process::exit(1);
    });

    let mut nic = NetDevice::with_config(Config::new(name)).unwrap_or_else(|err| {
        error!("failed to create TUN interface: {err}");
        process::exit(1);
    });

    if let Err(err) = nic.bind() {
        error!("failed to start TUN interface I/O: {err}");
        process::exit(1);
    }

    let cancel = nic.cancel_token();
    if let Err(err) = thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || wait_for_shutdown(mask, cancel))
    {
        error!("failed to spawn signal thread: {err}");
        process::exit(1);
    }

    info!("interface name: {}", nic.name());

    echo_loop(&nic);

    let stats = nic.stats();
    info!(
        "echoed {} packets ({} bytes), read errors: {}, write errors: {}",
        stats.tx_packets, stats.tx_bytes, stats.rx_errors, stats.tx_errors
    );

    if let Err(err) = nic.close() {
        error!("failed to close TUN interface: {err}");
        process::exit(1);
    }
}

/// Prints every packet received on the interface and writes it back
/// unmodified, until the interface is stopped.
fn echo_loop(nic: &NetDevice) {
    loop {
        let pkt = match nic.read() {
            Ok(pkt) => pkt,
            Err(Error::Stopped) => break,
            Err(err) => {
                error!("failed to read packet: {err}");
                break;
            }
        };

        print!("{}", hex_dump(pkt.as_bytes()));

        match nic.write(pkt) {
            Ok(()) => {}
            Err(Error::Stopped) => break,
            Err(err) => {
                error!("failed to write packet: {err}");
                break;
            }
        }
    }
}

/// Blocks `SIGINT` and `SIGTERM` for the calling thread, returning the blocked
/// set.
fn block_shutdown_signals() -> Result<libc::sigset_t> {
    let mut mask: libc::sigset_t = unsafe { mem::zeroed() };

    unsafe {
        // Initialize the signal set, excluding all signals.
        if libc::sigemptyset(&raw mut mask) == -1 {
            return Err(Error::Io(errno!("failed to initialize signal set")));
        }

        // Add both SIGINT and SIGTERM to the set.
        if libc::sigaddset(&raw mut mask, libc::SIGINT) == -1
            || libc::sigaddset(&raw mut mask, libc::SIGTERM) == -1
        {
            return Err(Error::Io(errno!("failed to add signals to signal set")));
        }

        // Returns the error number instead of setting `errno`.
        let ret = libc::pthread_sigmask(libc::SIG_BLOCK, &raw const mask, ptr::null_mut());
        if ret != 0 {
            return Err(Error::Io(io::Error::from_raw_os_error(ret)));
        }
    }

    Ok(mask)
}

/// Waits for a signal in `mask`, then cancels the interface.
fn wait_for_shutdown(mask: libc::sigset_t, cancel: CancelToken) {
    let mut sig: libc::c_int = 0;

    let ret = unsafe { libc::sigwait(&raw const mask, &raw mut sig) };
    if ret != 0 {
        error!(
            "failed to wait for shutdown signal: {}",
            io::Error::from_raw_os_error(ret)
        );
        return;
    }

    info!("signal {sig} caught -- shutting down");
    cancel.cancel();
}

//! A simple logging utility for emitting messages based on severity levels.
//!
//! The device loops run on their own threads, so each line carries the name
//! of the thread that emitted it.

use std::{mem, thread, time};

/// Source of the log message.
const SOURCE: &str = "tunq";

/// Logs a message at the [Level::Error] level.
#[macro_export]
macro_rules! error {
    ($($arg:tt)+) => {{
        $crate::log::log($crate::log::Level::Error, format!($($arg)+));
    }};
}

/// Logs a message at the [Level::Warn] level.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)+) => {{
        $crate::log::log($crate::log::Level::Warn, format!($($arg)+));
    }};
}

/// Logs a message at the [Level::Info] level.
#[macro_export]
macro_rules! info {
    ($($arg:tt)+) => {{
        $crate::log::log($crate::log::Level::Info, format!($($arg)+));
    }};
}

/// Logs a message at the [Level::Debug] level.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => {{
        $crate::log::log($crate::log::Level::Debug, format!($($arg)+));
    }};
}

/// Severity levels for log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Designates very serious errors.
    Error,
    /// Designates hazardous situations.
    Warn,
    /// Designates useful information.
    Info,
    /// Designates lower priority information.
    Debug,
}

/// Logs a message with the specified severity level.
///
/// - [Level::Info] and [Level::Debug] messages are printed to `stdout`.
/// - [Level::Warn] and [Level::Error] messages are printed to `stderr`.
///
/// The log message will include a timestamp, severity level, the source of
/// the log (`tunq`), and the emitting thread's name when it has one.
pub fn log(level: Level, msg: impl std::fmt::Display) {
    let timestamp = timestamp();

    let current = thread::current();
    let source = match current.name() {
        Some(name) if name != "main" => format!("{SOURCE}/{name}"),
        _ => SOURCE.to_string(),
    };

    match level {
        Level::Error => {
            eprintln!(
                "[\x1b[1;37m{timestamp}\x1b[0m] \x1b[1;31mERROR\x1b[0m [\x1b[1;37m{source}\x1b[0m] {msg}"
            );
        }
        Level::Warn => {
            eprintln!(
                "[\x1b[1;37m{timestamp}\x1b[0m] \x1b[1;33mWARN \x1b[0m [\x1b[1;37m{source}\x1b[0m] {msg}"
            );
        }
        Level::Info => {
            println!(
                "[\x1b[1;37m{timestamp}\x1b[0m] \x1b[1;32mINFO \x1b[0m [\x1b[1;37m{source}\x1b[0m] {msg}"
            );
        }
        Level::Debug => {
            println!(
                "[\x1b[1;37m{timestamp}\x1b[0m] \x1b[1;34mDEBUG\x1b[0m [\x1b[1;37m{source}\x1b[0m] {msg}"
            );
        }
    }
}

/// Formats the current local time as `YYYY-MM-DD HH:MM:SS`.
fn timestamp() -> String {
    let now = time::SystemTime::now()
        .duration_since(time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as libc::time_t;

    let mut tm: libc::tm = unsafe { mem::zeroed() };

    // `localtime_r` since messages are logged from multiple threads.
    if unsafe { libc::localtime_r(&now, &mut tm) }.is_null() {
        return "UNKNOWN".to_string();
    }

    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec
    )
}

//! Error types for kimup.

use std::io;
use thiserror::Error;

/// Result type for kimup operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for kimup operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A bounded wait elapsed where the protocol cannot tolerate it.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The port was not ready to accept a byte.
    #[error("Serial port not ready for writing: {0}")]
    ChannelBusy(String),

    /// The monitor never confirmed that the load completed.
    #[error("Transmit failed: monitor did not confirm the load after {attempts} attempts")]
    HandshakeFailed {
        /// Number of confirmation attempts made.
        attempts: u32,
    },

    /// A data record was requested with an invalid payload size.
    #[error("Invalid record: {len} data bytes (must be 1..={max})")]
    InvalidRecord {
        /// Requested payload length.
        len: usize,
        /// Largest payload a record can carry.
        max: usize,
    },

    /// The session would exceed the record count the end-of-load record can carry.
    #[error("Too many records: the end-of-load record can count at most {max}")]
    TooManyRecords {
        /// Largest representable record count.
        max: u16,
    },

    /// Contradictory or incomplete upload configuration.
    #[error("Usage error: {0}")]
    Usage(String),

    /// The embedding application requested an interrupt.
    #[error("Interrupted")]
    Interrupted,

    /// No serial device could be found.
    #[error("No serial port found")]
    DeviceNotFound,
}

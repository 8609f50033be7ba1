//! Port abstraction for the serial line to the KIM-1.
//!
//! The protocol code in this crate never talks to a serial device directly.
//! It is written against the [`Port`] trait, which keeps the byte-level
//! protocol I/O-agnostic and lets tests drive it with a scripted port.
//!
//! ```text
//! +---------------------------+
//! | handshake / session / ... |
//! +-------------+-------------+
//!               |
//!               v
//! +-------------+-------------+
//! |       TimedChannel        |
//! +-------------+-------------+
//!               |
//!               v
//! +-------------+-------------+
//! |        Port trait         |
//! +-------------+-------------+
//!               |
//!               v
//! +-------------+-------------+
//! |  NativePort (serialport)  |
//! +---------------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Highest baud rate the KIM-1 TTY interface handles reliably.
pub const MAX_SAFE_BAUD: u32 = 300;

/// Default character timeout for protocol waits.
pub const DEFAULT_CHAR_TIMEOUT: Duration = Duration::from_secs(1);

/// Serial port configuration.
///
/// Framing is fixed at 8 data bits, no parity, one stop bit and no flow
/// control; only the device, rate and timeout vary.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: MAX_SAFE_BAUD,
            timeout: DEFAULT_CHAR_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Product string (if available).
    pub product: Option<String>,
}

impl std::fmt::Display for PortInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            write!(f, " (USB {vid:04x}:{pid:04x}")?;
            if let Some(product) = &self.product {
                write!(f, " {product}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// Duplex byte port used by the loader.
///
/// `flush()` from [`Write`] must block until queued output has physically
/// left the port (`tcdrain` semantics on Unix). Reads must honour the
/// timeout set through [`Port::set_timeout`] and report expiry as
/// [`std::io::ErrorKind::TimedOut`]. Writes with a zero timeout must fail
/// with `TimedOut` instead of blocking when the port cannot accept data.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Discard unread input and unsent output.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// Closing twice is allowed; the second call does nothing.
    fn close(&mut self) -> Result<()>;
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};

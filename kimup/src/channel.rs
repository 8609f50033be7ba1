//! Timed byte channel over a [`Port`].
//!
//! Every wait on the KIM-1 line is bounded. The monitor can stay silent for
//! as long as the operator takes to press a key, so a timeout here is an
//! ordinary outcome reported as [`Wait::TimedOut`]; only a failing read or
//! write surfaces as an `Err`.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use log::trace;

use crate::error::{Error, Result};
use crate::port::Port;

/// Longest single blocking read; interrupt requests are checked between slices.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// What [`TimedChannel::await_byte`] is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// A specific byte; other bytes are consumed and ignored.
    Byte(u8),
    /// Whatever byte arrives first.
    Any,
}

impl Expect {
    fn matches(self, byte: u8) -> bool {
        match self {
            Self::Byte(expected) => expected == byte,
            Self::Any => true,
        }
    }
}

/// Outcome of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// The expected byte arrived.
    Matched(u8),
    /// The timeout elapsed first.
    TimedOut,
}

/// Outcome of a non-blocking single byte write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The byte was handed to the port.
    Written,
    /// The port could not take a byte right now.
    Busy,
}

/// Byte-at-a-time channel with one configurable character timeout.
pub struct TimedChannel<P: Port> {
    port: P,
    timeout: Duration,
}

impl<P: Port> TimedChannel<P> {
    /// Wrap a port, using the port's configured timeout as character timeout.
    pub fn new(port: P) -> Self {
        let timeout = port.timeout();
        Self { port, timeout }
    }

    /// Wrap a port with an explicit character timeout.
    pub fn with_timeout(port: P, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    /// Character timeout applied to every wait.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the channel and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Wait up to the character timeout for `expect`.
    pub fn await_byte(&mut self, expect: Expect) -> Result<Wait> {
        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; 1];

        loop {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Wait::TimedOut);
            }
            self.port
                .set_timeout(remaining.min(POLL_SLICE))?;

            match self
                .port
                .read(&mut buf)
            {
                Ok(0) => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "serial port returned end of stream",
                    )));
                },
                Ok(_) => {
                    let byte = buf[0];
                    trace!("rx 0x{byte:02X}");
                    if expect.matches(byte) {
                        return Ok(Wait::Matched(byte));
                    }
                },
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    /// Write one byte if the port can take it without waiting.
    pub fn try_write(&mut self, byte: u8) -> Result<WriteOutcome> {
        self.port
            .set_timeout(Duration::ZERO)?;
        let result = self
            .port
            .write(&[byte]);
        self.port
            .set_timeout(self.timeout)?;

        match result {
            Ok(0) => Ok(WriteOutcome::Busy),
            Ok(_) => {
                trace!("tx 0x{byte:02X}");
                Ok(WriteOutcome::Written)
            },
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(WriteOutcome::Busy)
            },
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Blocking write of a whole record or command.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.port
            .set_timeout(self.timeout)?;
        self.port
            .write_all(bytes)?;
        Ok(())
    }

    /// Block until queued output has left the port.
    pub fn drain(&mut self) -> Result<()> {
        self.port
            .flush()?;
        Ok(())
    }

    /// Discard unread input and unsent output.
    pub fn flush_both_directions(&mut self) -> Result<()> {
        self.port
            .clear_buffers()
    }

    /// Read back and drop up to `count` echoed bytes.
    ///
    /// Echoes are not compared with what was sent. A timeout ends the
    /// discard early and is not an error; the number of bytes actually read
    /// is returned.
    pub fn discard_echo(&mut self, count: usize) -> Result<usize> {
        for received in 0..count {
            if self.await_byte(Expect::Any)? == Wait::TimedOut {
                trace!("Echo ended after {received}/{count} bytes");
                return Ok(received);
            }
        }
        Ok(count)
    }
}

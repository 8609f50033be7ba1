//! Scripted in-memory port for protocol tests.
//!
//! Incoming traffic is a script of byte bursts and silences. A burst is only
//! released into the receive buffer once the receive buffer runs dry, so a
//! `clear_buffers` call discards what already arrived but not what the
//! device "sends later". A silence (or an exhausted script) sleeps for the
//! current timeout and reports `TimedOut`, like a real port would.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;

/// One step of scripted device output.
#[derive(Debug, Clone)]
pub(crate) enum Incoming {
    /// Bytes the device sends.
    Bytes(Vec<u8>),
    /// One full timeout with nothing on the line.
    Silence,
}

#[derive(Debug)]
pub(crate) struct MockPort {
    rx: VecDeque<u8>,
    script: VecDeque<Incoming>,
    echo: bool,
    busy_writes: usize,
    busy_skip: usize,
    fail_reads: bool,
    timeout: Duration,
    closed: bool,
    /// Every `write` call, in order.
    pub writes: Vec<Vec<u8>>,
    /// Bytes handed out by `read`.
    pub bytes_read: usize,
    /// Number of `clear_buffers` calls.
    pub clears: usize,
    /// Number of `flush` (drain) calls.
    pub drains: usize,
    /// Number of `close` calls.
    pub closes: usize,
}

impl MockPort {
    pub(crate) fn new() -> Self {
        Self {
            rx: VecDeque::new(),
            script: VecDeque::new(),
            echo: false,
            busy_writes: 0,
            busy_skip: 0,
            fail_reads: false,
            timeout: Duration::from_millis(5),
            closed: false,
            writes: Vec::new(),
            bytes_read: 0,
            clears: 0,
            drains: 0,
            closes: 0,
        }
    }

    /// Port that echoes every written byte back.
    pub(crate) fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::new()
        }
    }

    pub(crate) fn with_script(mut self, script: impl IntoIterator<Item = Incoming>) -> Self {
        self.script
            .extend(script);
        self
    }

    /// Refuse the next `count` zero-timeout writes.
    pub(crate) fn with_busy_writes(mut self, count: usize) -> Self {
        self.busy_writes = count;
        self
    }

    /// Accept `accepted` zero-timeout writes, then refuse the next `count`.
    pub(crate) fn with_busy_writes_after(mut self, accepted: usize, count: usize) -> Self {
        self.busy_skip = accepted;
        self.busy_writes = count;
        self
    }

    pub(crate) fn with_failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub(crate) fn push(&mut self, incoming: Incoming) {
        self.script
            .push_back(incoming);
    }

    /// All written bytes concatenated.
    pub(crate) fn written(&self) -> Vec<u8> {
        self.writes
            .concat()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.fail_reads {
            return Err(io::Error::other("device unplugged"));
        }
        if buf.is_empty() {
            return Ok(0);
        }
        while self
            .rx
            .is_empty()
        {
            match self
                .script
                .pop_front()
            {
                Some(Incoming::Bytes(bytes)) => self
                    .rx
                    .extend(bytes),
                Some(Incoming::Silence) | None => {
                    std::thread::sleep(self.timeout);
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
                },
            }
        }
        let n = buf
            .len()
            .min(self.rx.len());
        for slot in buf
            .iter_mut()
            .take(n)
        {
            *slot = self
                .rx
                .pop_front()
                .unwrap_or_default();
        }
        self.bytes_read += n;
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if self.timeout.is_zero() && self.busy_writes > 0 {
            if self.busy_skip > 0 {
                self.busy_skip -= 1;
            } else {
                self.busy_writes -= 1;
                return Err(io::Error::new(io::ErrorKind::TimedOut, "not writable"));
            }
        }
        self.writes
            .push(buf.to_vec());
        if self.echo {
            self.rx
                .extend(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.drains += 1;
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn baud_rate(&self) -> u32 {
        crate::port::MAX_SAFE_BAUD
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.rx
            .clear();
        self.clears += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.closes += 1;
        Ok(())
    }
}

//! Load session controller.
//!
//! Sends the body of a load once the monitor has accepted the `L` command,
//! either as hex records or as a raw tape relay. The monitor echoes every
//! byte it receives; that echo is the only flow control, so nothing is sent
//! before the previous record's echo has been read back.

use std::io::{self, BufReader, Read};

use log::{debug, info, trace};

use crate::channel::{Expect, TimedChannel, Wait, WriteOutcome};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::plan::{LoadMode, TapeImage, UploadTask};
use crate::port::Port;
use crate::protocol::record::{MAX_RECORD_DATA, Record, encode_end_of_load_record};

#[allow(clippy::cast_possible_truncation)]
const CHUNK_STEP: u16 = MAX_RECORD_DATA as u16;

/// What a load transmitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LoadSummary {
    /// Data records sent (always 0 for a tape relay).
    pub records_sent: u16,
    /// Payload bytes sent.
    pub bytes_sent: usize,
}

/// Fill `buf` from `source`, stopping early only at end of input.
fn read_chunk(source: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Drives one load over a borrowed channel.
pub struct LoadSession<'a, P: Port> {
    channel: &'a mut TimedChannel<P>,
    records_sent: u16,
    bytes_sent: usize,
}

impl<'a, P: Port> LoadSession<'a, P> {
    /// Create a session with a zero record count.
    pub fn new(channel: &'a mut TimedChannel<P>) -> Self {
        Self {
            channel,
            records_sent: 0,
            bytes_sent: 0,
        }
    }

    /// Data records sent so far.
    pub fn records_sent(&self) -> u16 {
        self.records_sent
    }

    /// Send the load in the given mode.
    pub fn run(&mut self, mode: LoadMode, on_event: &mut dyn FnMut(Event)) -> Result<LoadSummary> {
        match mode {
            LoadMode::Chunked(tasks) => self.send_tasks(tasks, on_event),
            LoadMode::RawRelay(tape) => self.relay_tape(tape, on_event),
        }
    }

    /// Send every task as hex records, then the end-of-load record.
    pub fn send_tasks(
        &mut self,
        tasks: Vec<UploadTask>,
        on_event: &mut dyn FnMut(Event),
    ) -> Result<LoadSummary> {
        for task in tasks {
            self.send_task(task, on_event)?;
        }
        if self.records_sent > 0 {
            self.send_end_of_load(on_event)?;
        }
        Ok(self.summary())
    }

    fn send_task(&mut self, task: UploadTask, on_event: &mut dyn FnMut(Event)) -> Result<usize> {
        let (mut address, name, mut source) = task.into_parts();
        info!("Uploading {name} to address ${address:04X}");
        on_event(Event::TaskStarted {
            name: name.clone(),
            address,
        });

        let mut chunk = [0u8; MAX_RECORD_DATA];
        let mut bytes = 0usize;
        loop {
            let n = read_chunk(&mut source, &mut chunk)?;
            if n == 0 {
                break;
            }
            self.send_record(address, &chunk[..n], on_event)?;
            bytes += n;
            if n < MAX_RECORD_DATA {
                break;
            }
            address = address.wrapping_add(CHUNK_STEP);
        }

        debug!("{name}: {bytes} bytes sent");
        on_event(Event::TaskFinished { name, bytes });
        Ok(bytes)
    }

    /// Send one data record and consume its echo.
    pub fn send_record(
        &mut self,
        address: u16,
        data: &[u8],
        on_event: &mut dyn FnMut(Event),
    ) -> Result<()> {
        let total_records = self
            .records_sent
            .checked_add(1)
            .ok_or(Error::TooManyRecords { max: u16::MAX })?;
        let wire = Record::new(address, data)?.encode();

        trace!("Record: {}", String::from_utf8_lossy(&wire).trim_end());
        self.channel
            .write_all(&wire)?;
        self.channel
            .drain()?;
        let echoed = self
            .channel
            .discard_echo(wire.len())?;
        if echoed < wire.len() {
            debug!(
                "Record at ${address:04X}: only {echoed} of {} echo bytes seen",
                wire.len()
            );
        }

        self.records_sent = total_records;
        self.bytes_sent += data.len();
        on_event(Event::RecordSent {
            address,
            len: data.len(),
            total_records,
        });
        Ok(())
    }

    fn send_end_of_load(&mut self, on_event: &mut dyn FnMut(Event)) -> Result<()> {
        let total_records = self.records_sent;
        let wire = encode_end_of_load_record(total_records);
        debug!("End of load: {total_records} records");

        self.channel
            .write_all(&wire)?;
        self.channel
            .drain()?;
        self.channel
            .discard_echo(wire.len())?;

        on_event(Event::EndOfLoadSent { total_records });
        Ok(())
    }

    /// Relay a tape image byte by byte, waiting for each echo.
    pub fn relay_tape(
        &mut self,
        tape: TapeImage,
        on_event: &mut dyn FnMut(Event),
    ) -> Result<LoadSummary> {
        let (name, source) = tape.into_parts();
        info!("Transmitting raw paper tape {name}");
        on_event(Event::TapeStarted { name });

        let mut lines = 0usize;
        let mut total = 0usize;
        for byte in BufReader::new(source).bytes() {
            let byte = byte?;
            if self
                .channel
                .try_write(byte)?
                == WriteOutcome::Busy
            {
                return Err(Error::ChannelBusy(format!(
                    "tape byte {} could not be sent",
                    total + 1
                )));
            }
            if self
                .channel
                .await_byte(Expect::Any)?
                == Wait::TimedOut
            {
                return Err(Error::Timeout(format!("no echo for tape byte {}", total + 1)));
            }

            total += 1;
            on_event(Event::ByteRelayed { byte, total });
            if byte == b'\n' {
                lines += 1;
                self.channel
                    .drain()?;
                on_event(Event::TapeLine { lines });
            }
        }
        self.channel
            .drain()?;

        self.bytes_sent += total;
        debug!("Tape relay done: {total} bytes, {lines} lines");
        on_event(Event::TapeFinished { bytes: total });
        Ok(self.summary())
    }

    fn summary(&self) -> LoadSummary {
        LoadSummary {
            records_sent: self.records_sent,
            bytes_sent: self.bytes_sent,
        }
    }
}

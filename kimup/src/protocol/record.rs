//! KIM-1 paper tape hex records.
//!
//! The TTY monitor's `L` command reads records of the form:
//!
//! ```text
//! +---+-------+---------+------------------+----------+----+
//! | ; | count | address |       data       | checksum | LF |
//! +---+-------+---------+------------------+----------+----+
//! | 1 |   2   |    4    |   2 x count      |    4     | 1  |
//! +---+-------+---------+------------------+----------+----+
//! ```
//!
//! All fields are uppercase ASCII hex. The checksum is the 16-bit sum of the
//! count byte, both address bytes and every data byte.
//!
//! The load ends with a record whose count is `00`; its address and checksum
//! fields both carry the number of data records sent, which the monitor
//! prints back to the operator.

use crate::error::{Error, Result};

/// Record start character.
pub const RECORD_MARK: u8 = b';';

/// Record terminator.
pub const RECORD_END: u8 = b'\n';

/// Largest payload carried by a single record.
pub const MAX_RECORD_DATA: usize = 24;

/// Wire length of a record without data (`;` + count + address + checksum + LF).
pub const RECORD_OVERHEAD: usize = 12;

/// Wire length of the execute command.
pub const EXECUTE_COMMAND_LEN: usize = 5;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

fn push_hex_byte(out: &mut Vec<u8>, value: u8) {
    out.push(HEX_DIGITS[usize::from(value >> 4)]);
    out.push(HEX_DIGITS[usize::from(value & 0x0F)]);
}

fn push_hex_word(out: &mut Vec<u8>, value: u16) {
    let [high, low] = value.to_be_bytes();
    push_hex_byte(out, high);
    push_hex_byte(out, low);
}

/// A data record: up to 24 bytes destined for `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RecordFields"))]
pub struct Record {
    address: u16,
    data: Vec<u8>,
}

/// Unchecked record fields, as read from a serialized form.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct RecordFields {
    /// Load address of the first data byte.
    pub address: u16,
    /// Payload bytes.
    pub data: Vec<u8>,
}

impl TryFrom<RecordFields> for Record {
    type Error = Error;

    fn try_from(fields: RecordFields) -> Result<Self> {
        Self::new(fields.address, &fields.data)
    }
}

impl Record {
    /// Build a record, checking the payload size.
    pub fn new(address: u16, data: &[u8]) -> Result<Self> {
        if data.is_empty() || data.len() > MAX_RECORD_DATA {
            return Err(Error::InvalidRecord {
                len: data.len(),
                max: MAX_RECORD_DATA,
            });
        }
        Ok(Self {
            address,
            data: data.to_vec(),
        })
    }

    /// Load address of the first data byte.
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of payload bytes (the count field).
    #[allow(clippy::cast_possible_truncation)] // bounded by MAX_RECORD_DATA
    pub fn count(&self) -> u8 {
        self.data.len() as u8
    }

    /// 16-bit sum of count, address bytes and data.
    pub fn checksum(&self) -> u16 {
        let [high, low] = self.address.to_be_bytes();
        self.data
            .iter()
            .chain([self.count(), high, low].iter())
            .fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)))
    }

    /// Number of bytes [`Record::encode`] produces.
    pub fn wire_len(&self) -> usize {
        RECORD_OVERHEAD + 2 * self.data.len()
    }

    /// Render the record in wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        out.push(RECORD_MARK);
        push_hex_byte(&mut out, self.count());
        push_hex_word(&mut out, self.address);
        for &b in &self.data {
            push_hex_byte(&mut out, b);
        }
        push_hex_word(&mut out, self.checksum());
        out.push(RECORD_END);
        out
    }
}

/// Encode `data` (1..=24 bytes) as a record for `address`.
pub fn encode_data_record(address: u16, data: &[u8]) -> Result<Vec<u8>> {
    Ok(Record::new(address, data)?.encode())
}

/// Encode the end-of-load record for a session that sent `total_records`.
pub fn encode_end_of_load_record(total_records: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(RECORD_OVERHEAD);
    out.push(RECORD_MARK);
    push_hex_byte(&mut out, 0);
    push_hex_word(&mut out, total_records);
    push_hex_word(&mut out, total_records);
    out.push(RECORD_END);
    out
}

/// Encode the monitor command that selects `address` (`AAAA ` with no newline).
pub fn encode_execute_command(address: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(EXECUTE_COMMAND_LEN);
    push_hex_word(&mut out, address);
    out.push(b' ');
    out
}

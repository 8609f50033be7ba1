//! Progress notifications.
//!
//! Events are advisory: they let a caller drive a spinner or a log, and
//! have no effect on the protocol.

use crate::handshake::HandshakeMode;

/// Something observable happened during a load session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Event {
    /// A handshake began.
    HandshakeStarted(HandshakeMode),
    /// One more byte of the monitor banner matched.
    BannerProgress(HandshakeMode),
    /// A handshake attempt failed and is starting over.
    HandshakeRetry {
        /// Which handshake.
        mode: HandshakeMode,
        /// Attempt number that just failed (1-based).
        attempt: u32,
    },
    /// The monitor is idle at its prompt.
    HandshakeComplete(HandshakeMode),
    /// A chunked upload task began.
    TaskStarted {
        /// Display name of the source.
        name: String,
        /// First load address.
        address: u16,
    },
    /// A data record was sent and its echo consumed.
    RecordSent {
        /// Load address of the record.
        address: u16,
        /// Data bytes in the record.
        len: usize,
        /// Records sent so far in the session.
        total_records: u16,
    },
    /// A chunked upload task finished.
    TaskFinished {
        /// Display name of the source.
        name: String,
        /// Data bytes uploaded from this task.
        bytes: usize,
    },
    /// The end-of-load record was sent.
    EndOfLoadSent {
        /// Record total carried in the record.
        total_records: u16,
    },
    /// A raw tape relay began.
    TapeStarted {
        /// Display name of the tape image.
        name: String,
    },
    /// One tape byte was written and echoed.
    ByteRelayed {
        /// The byte.
        byte: u8,
        /// Bytes relayed so far.
        total: usize,
    },
    /// A newline was relayed; one tape line is complete.
    TapeLine {
        /// Lines relayed so far.
        lines: usize,
    },
    /// The raw tape relay finished.
    TapeFinished {
        /// Bytes relayed.
        bytes: usize,
    },
    /// The execute sequence is being sent.
    Executing {
        /// Start address.
        address: u16,
    },
}

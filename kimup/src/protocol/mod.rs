//! KIM-1 TTY monitor protocol.

pub mod record;

/// Rubout; sent to get the monitor's attention before it prints its banner.
pub const ATTENTION: u8 = 0x7F;

/// Banner the monitor prints when it is ready for a command: `KIM`, LF, two spaces.
pub const BANNER: &[u8] = b"KIM\n  ";

/// Monitor command that starts a paper tape load.
pub const LOAD_COMMAND: u8 = b'L';

/// Monitor command that runs from the selected address.
pub const GO_COMMAND: u8 = b'G';

// Re-export common items
pub use record::{
    MAX_RECORD_DATA, Record, RecordFields, encode_data_record, encode_end_of_load_record, encode_execute_command,
};

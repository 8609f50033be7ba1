//! # kimup
//!
//! A library for uploading programs to a KIM-1 over its TTY serial port.
//!
//! The KIM-1 monitor accepts paper tape records typed at it over a
//! 300 baud current loop or RS-232 adapter. This crate drives that
//! conversation:
//!
//! - Monitor handshake (rubout, `KIM` banner, quiet line)
//! - Hex record encoding with 16-bit checksums
//! - Chunked uploads of binary images, or raw relay of tape files
//! - Load confirmation and optional execution from an address
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: Serialization support for events and reports
//!
//! ## Example
//!
//! ```rust,no_run
//! use kimup::{Loader, UploadPlan, UploadTask};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let plan = UploadPlan::builder()
//!         .task(UploadTask::from_file(0x0200, "hello.bin")?)
//!         .build()?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let port = kimup::NativePort::open_simple("/dev/ttyUSB0")?;
//!         Loader::new(port).run(plan, &mut |_| {})?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod channel;
pub mod error;
pub mod event;
pub mod execute;
pub mod handshake;
pub mod host;
pub mod loader;
pub mod plan;
pub mod port;
pub mod protocol;
pub mod session;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by the blocking waits.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Native-specific re-exports
#[cfg(feature = "native")]
pub use host::open_first_available;
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    channel::{Expect, TimedChannel, Wait, WriteOutcome},
    error::{Error, Result},
    event::Event,
    execute::ExecuteTrigger,
    handshake::{HandshakeConfig, HandshakeMode, MonitorHandshake},
    host::{FALLBACK_PORTS, candidate_ports, discover_ports},
    loader::{Loader, LoaderConfig, SessionReport},
    plan::{LoadMode, TapeImage, UploadPlan, UploadPlanBuilder, UploadTask},
    port::{MAX_SAFE_BAUD, Port, PortEnumerator, PortInfo, SerialConfig},
    session::{LoadSession, LoadSummary},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        assert!(!is_interrupted_requested());
    }
}

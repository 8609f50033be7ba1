//! KIM-1 loader session.
//!
//! [`Loader`] owns the serial channel for the whole session and runs the
//! complete sequence:
//!
//! 1. initial-contact handshake, then the `L` command
//! 2. the load itself (hex records or raw tape relay)
//! 3. post-load handshake confirming the monitor is back at its prompt
//! 4. optionally, the execute sequence
//!
//! Teardown goes through [`Loader::close`], which also runs on drop, so an
//! error, an interrupt or a normal return all leave the port flushed and
//! closed.
//!
//! ## Example
//!
//! ```rust,no_run
//! use kimup::{Loader, Port, UploadPlan, UploadTask};
//!
//! fn upload<P: Port>(port: P) -> kimup::Result<()> {
//!     let plan = UploadPlan::builder()
//!         .task(UploadTask::from_file(0x0200, "hello.bin")?)
//!         .execute(0x0200)
//!         .build()?;
//!
//!     let mut loader = Loader::new(port);
//!     let report = loader.run(plan, &mut |event| println!("{event:?}"))?;
//!     println!("{} records", report.load.records_sent);
//!     Ok(())
//! }
//! ```

use log::{debug, info, warn};

use crate::channel::{TimedChannel, WriteOutcome};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::execute::ExecuteTrigger;
use crate::handshake::{HandshakeConfig, HandshakeMode, MonitorHandshake};
use crate::plan::{LoadMode, UploadPlan};
use crate::port::Port;
use crate::protocol::LOAD_COMMAND;
use crate::session::{LoadSession, LoadSummary};

/// Loader configuration options.
#[derive(Debug, Clone, Default)]
pub struct LoaderConfig {
    /// Handshake options.
    pub handshake: HandshakeConfig,
}

/// Outcome of a complete session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SessionReport {
    /// What the load transmitted.
    pub load: LoadSummary,
    /// Address execution was started from, if requested.
    pub executed: Option<u16>,
}

/// A load session owning its port.
pub struct Loader<P: Port> {
    channel: TimedChannel<P>,
    config: LoaderConfig,
    closed: bool,
}

impl<P: Port> Loader<P> {
    /// Create a loader using the port's timeout as character timeout.
    pub fn new(port: P) -> Self {
        Self::with_config(port, LoaderConfig::default())
    }

    /// Create a loader with custom configuration.
    pub fn with_config(port: P, config: LoaderConfig) -> Self {
        Self {
            channel: TimedChannel::new(port),
            config,
            closed: false,
        }
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        self.channel
            .port()
    }

    /// Run the whole session: contact, load, confirm and optional execute.
    pub fn run(&mut self, plan: UploadPlan, on_event: &mut dyn FnMut(Event)) -> Result<SessionReport> {
        if self.closed {
            return Err(Error::Usage("loader already closed".into()));
        }
        let (mode, execute) = plan.into_parts();

        self.connect(on_event)?;
        let load = self.load(mode, on_event)?;
        self.confirm(on_event)?;
        if let Some(address) = execute {
            self.execute(address, on_event)?;
        }
        self.channel
            .drain()?;

        Ok(SessionReport {
            load,
            executed: execute,
        })
    }

    /// Wait for the operator to wake the monitor, then start a load.
    pub fn connect(&mut self, on_event: &mut dyn FnMut(Event)) -> Result<()> {
        let port = self
            .channel
            .port();
        info!(
            "Getting the monitor's attention on {} at {} baud",
            port.name(),
            port.baud_rate()
        );
        MonitorHandshake::with_config(&mut self.channel, self.config.handshake.clone())
            .run(HandshakeMode::InitialContact, on_event)?;

        if self
            .channel
            .try_write(LOAD_COMMAND)?
            == WriteOutcome::Busy
        {
            return Err(Error::ChannelBusy("load command could not be sent".into()));
        }
        self.channel
            .drain()
    }

    /// Send the load body.
    pub fn load(&mut self, mode: LoadMode, on_event: &mut dyn FnMut(Event)) -> Result<LoadSummary> {
        LoadSession::new(&mut self.channel).run(mode, on_event)
    }

    /// Wait for the monitor to come back to its prompt after a load.
    pub fn confirm(&mut self, on_event: &mut dyn FnMut(Event)) -> Result<()> {
        info!("Waiting for completion");
        MonitorHandshake::with_config(&mut self.channel, self.config.handshake.clone())
            .run(HandshakeMode::PostLoad, on_event)
    }

    /// Run from `address`.
    pub fn execute(&mut self, address: u16, on_event: &mut dyn FnMut(Event)) -> Result<()> {
        ExecuteTrigger::new(&mut self.channel).run(address, on_event)
    }

    /// Flush and close the port. Safe to call more than once.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self
            .channel
            .flush_both_directions()
        {
            warn!("Failed to flush port on close: {e}");
        }
        if let Err(e) = self
            .channel
            .port_mut()
            .close()
        {
            warn!("Failed to close port: {e}");
        }
        debug!("Session closed");
    }
}

impl<P: Port> Drop for Loader<P> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{TapeImage, UploadTask};
    use crate::port::mock::{Incoming, MockPort};
    use crate::protocol::{ATTENTION, BANNER};
    use std::time::Duration;

    fn mock() -> MockPort {
        let _ = env_logger::builder()
            .is_test(true)
            .try_init();
        let mut port = MockPort::echoing();
        port.set_timeout(Duration::from_millis(5))
            .unwrap();
        port
    }

    /// Banner followed by a quiet line.
    fn push_banner(port: &mut MockPort) {
        port.push(Incoming::Bytes(BANNER.to_vec()));
        port.push(Incoming::Silence);
    }

    fn plan_30_bytes(execute: Option<u16>) -> UploadPlan {
        let mut builder =
            UploadPlan::builder().task(UploadTask::from_bytes(0x0200, "prog", vec![0xEA; 30]));
        if let Some(address) = execute {
            builder = builder.execute(address);
        }
        builder
            .build()
            .unwrap()
    }

    #[test]
    fn test_full_session_with_execute() {
        let mut port = mock();
        // Initial contact, post-load confirmation, then the monitor's answer to "0200 "
        push_banner(&mut port);
        push_banner(&mut port);
        port.push(Incoming::Bytes(b" EA ".to_vec()));
        let mut loader = Loader::new(port);
        let mut events = Vec::new();

        let report = loader
            .run(plan_30_bytes(Some(0x0200)), &mut |e| events.push(e))
            .unwrap();

        assert_eq!(report.load.records_sent, 2);
        assert_eq!(report.executed, Some(0x0200));

        let writes = &loader.port().writes;
        assert_eq!(writes[0], vec![ATTENTION]);
        assert_eq!(writes[1], vec![b'L']);
        assert!(writes[2].starts_with(b";180200"));
        assert!(writes[3].starts_with(b";060218"));
        assert_eq!(writes[4], b";0000020002\n".to_vec());
        assert_eq!(writes[5], b"0200 ".to_vec());
        assert_eq!(writes[6], b"G".to_vec());
        assert_eq!(writes.len(), 7);

        let completes: Vec<&Event> = events
            .iter()
            .filter(|e| matches!(e, Event::HandshakeComplete(_)))
            .collect();
        assert_eq!(
            completes,
            [
                &Event::HandshakeComplete(HandshakeMode::InitialContact),
                &Event::HandshakeComplete(HandshakeMode::PostLoad)
            ]
        );
    }

    #[test]
    fn test_session_without_execute_stops_after_confirmation() {
        let mut port = mock();
        push_banner(&mut port);
        push_banner(&mut port);
        let mut loader = Loader::new(port);

        let report = loader
            .run(plan_30_bytes(None), &mut |_| {})
            .unwrap();

        assert_eq!(report.executed, None);
        assert_eq!(
            loader
                .port()
                .writes
                .last(),
            Some(&b";0000020002\n".to_vec())
        );
    }

    #[test]
    fn test_tape_session() {
        let mut port = mock();
        push_banner(&mut port);
        push_banner(&mut port);
        let mut loader = Loader::new(port);
        let plan = UploadPlan::builder()
            .tape(TapeImage::from_bytes("tape", b";0102000000\n".to_vec()))
            .build()
            .unwrap();

        let report = loader
            .run(plan, &mut |_| {})
            .unwrap();

        assert_eq!(report.load.records_sent, 0);
        assert_eq!(report.load.bytes_sent, 12);
    }

    #[test]
    fn test_unconfirmed_load_fails() {
        let mut port = mock();
        push_banner(&mut port);
        let mut loader = Loader::new(port);

        let result = loader.run(plan_30_bytes(Some(0x0200)), &mut |_| {});

        assert!(matches!(result, Err(Error::HandshakeFailed { attempts: 10 })));
        // Nothing after the end-of-load record
        assert_eq!(
            loader
                .port()
                .writes
                .last(),
            Some(&b";0000020002\n".to_vec())
        );
    }

    #[test]
    fn test_confirm_attempts_follow_config() {
        let port = mock();
        let config = LoaderConfig {
            handshake: HandshakeConfig {
                max_confirm_attempts: 2,
            },
        };
        let mut loader = Loader::with_config(port, config);

        let result = loader.confirm(&mut |_| {});

        assert!(matches!(result, Err(Error::HandshakeFailed { attempts: 2 })));
    }

    #[test]
    fn test_busy_load_command_is_fatal() {
        // The attention byte goes out, the `L` does not
        let mut port = mock().with_busy_writes_after(1, 1);
        push_banner(&mut port);
        let mut loader = Loader::new(port);

        let result = loader.connect(&mut |_| {});

        assert!(matches!(result, Err(Error::ChannelBusy(_))));
        assert_eq!(loader.port().written(), vec![ATTENTION]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut loader = Loader::new(mock());

        loader.close();
        loader.close();

        assert!(loader.port().is_closed());
        assert_eq!(loader.port().closes, 1);
        assert!(matches!(
            loader.run(plan_30_bytes(None), &mut |_| {}),
            Err(Error::Usage(_))
        ));
    }

    #[test]
    fn test_close_flushes_before_closing() {
        let mut loader = Loader::new(mock());
        loader.close();

        assert_eq!(loader.port().clears, 1);
    }
}

//! Monitor banner handshake.
//!
//! The monitor announces that it is waiting for a command by printing
//! `KIM`, a line feed and two spaces. The banner may be preceded by line
//! noise or a half-sent byte, so it is matched one byte at a time; any miss
//! starts the attempt over from a clean line. Once the banner matched, one
//! more byte is awaited: if something still arrives the monitor is not done
//! printing and the attempt starts over, if the line stays quiet the
//! monitor is idle at its prompt.
//!
//! A refused attention byte ends the handshake with
//! [`Error::ChannelBusy`](crate::Error::ChannelBusy).
//!
//! ```text
//!        +-------+    +-------------+    +---------+    +---------+
//! ----> | flush | -> | [0x7F send] | -> | K I M \n | -> | silence | -> ready
//!        +-------+    +-------------+    | ' ' ' '  |    +---------+
//!            ^                           +---------+         |
//!            |              miss / timeout   |     byte seen |
//!            +-------------------------------+---------------+
//! ```

use log::{debug, info, trace, warn};

use crate::channel::{Expect, TimedChannel, Wait, WriteOutcome};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::port::Port;
use crate::protocol::{ATTENTION, BANNER};

/// Default number of post-load confirmation attempts.
pub const DEFAULT_CONFIRM_ATTEMPTS: u32 = 10;

/// Which handshake is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum HandshakeMode {
    /// Before loading: send rubouts until the operator wakes the monitor.
    /// Never gives up.
    InitialContact,
    /// After loading: listen for the monitor to return to its prompt.
    /// Gives up after the configured number of attempts.
    PostLoad,
}

/// Handshake configuration options.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Attempts allowed in [`HandshakeMode::PostLoad`].
    pub max_confirm_attempts: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            max_confirm_attempts: DEFAULT_CONFIRM_ATTEMPTS,
        }
    }
}

enum Attempt {
    Ready,
    Missed(u8),
    StillTalking(u8),
}

/// Banner handshake driver over a borrowed channel.
pub struct MonitorHandshake<'a, P: Port> {
    channel: &'a mut TimedChannel<P>,
    config: HandshakeConfig,
}

impl<'a, P: Port> MonitorHandshake<'a, P> {
    /// Create a handshake driver with default configuration.
    pub fn new(channel: &'a mut TimedChannel<P>) -> Self {
        Self {
            channel,
            config: HandshakeConfig::default(),
        }
    }

    /// Create a handshake driver with custom configuration.
    pub fn with_config(channel: &'a mut TimedChannel<P>, config: HandshakeConfig) -> Self {
        Self { channel, config }
    }

    /// Run the handshake until the monitor is idle at its prompt.
    pub fn run(&mut self, mode: HandshakeMode, on_event: &mut dyn FnMut(Event)) -> Result<()> {
        debug!("Starting {mode:?} handshake");
        on_event(Event::HandshakeStarted(mode));

        let mut attempt = 0u32;
        loop {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            attempt = attempt.saturating_add(1);

            match self.attempt(mode, on_event)? {
                Attempt::Ready => break,
                Attempt::Missed(expected) => {
                    trace!("Attempt {attempt}: no 0x{expected:02X} before timeout");
                },
                Attempt::StillTalking(byte) => {
                    trace!("Attempt {attempt}: monitor still sending (0x{byte:02X})");
                },
            }

            if mode == HandshakeMode::PostLoad && attempt >= self.config.max_confirm_attempts {
                warn!("Monitor did not return to its prompt after {attempt} attempts");
                return Err(Error::HandshakeFailed { attempts: attempt });
            }
            on_event(Event::HandshakeRetry { mode, attempt });
        }

        self.channel
            .flush_both_directions()?;
        info!("Monitor ready ({mode:?}, attempt {attempt})");
        on_event(Event::HandshakeComplete(mode));
        Ok(())
    }

    fn attempt(&mut self, mode: HandshakeMode, on_event: &mut dyn FnMut(Event)) -> Result<Attempt> {
        self.channel
            .flush_both_directions()?;

        if mode == HandshakeMode::InitialContact
            && self
                .channel
                .try_write(ATTENTION)?
                == WriteOutcome::Busy
        {
            return Err(Error::ChannelBusy("attention byte could not be sent".into()));
        }

        for &expected in BANNER {
            match self
                .channel
                .await_byte(Expect::Byte(expected))?
            {
                Wait::Matched(_) => on_event(Event::BannerProgress(mode)),
                Wait::TimedOut => return Ok(Attempt::Missed(expected)),
            }
        }

        // The banner is complete; a quiet line means the prompt is idle.
        match self
            .channel
            .await_byte(Expect::Any)?
        {
            Wait::Matched(byte) => Ok(Attempt::StillTalking(byte)),
            Wait::TimedOut => Ok(Attempt::Ready),
        }
    }
}

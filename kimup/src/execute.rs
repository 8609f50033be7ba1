//! Post-load execute trigger.
//!
//! Typing `AAAA ` at the monitor prompt selects an address; the monitor
//! echoes the digits and answers with spaces around the byte it displays.
//! Once three spaces came back, `G` starts the program.

use log::{debug, info, warn};

use crate::channel::{Expect, TimedChannel, Wait, WriteOutcome};
use crate::error::Result;
use crate::event::Event;
use crate::port::Port;
use crate::protocol::{GO_COMMAND, encode_execute_command};

/// Number of spaces the monitor sends back before it accepts `G`.
const SPACES_BEFORE_GO: usize = 3;

/// Execute trigger over a borrowed channel.
pub struct ExecuteTrigger<'a, P: Port> {
    channel: &'a mut TimedChannel<P>,
}

impl<'a, P: Port> ExecuteTrigger<'a, P> {
    /// Create a trigger for a monitor that is idle at its prompt.
    pub fn new(channel: &'a mut TimedChannel<P>) -> Self {
        Self { channel }
    }

    /// Select `address` and run from it.
    pub fn run(&mut self, address: u16, on_event: &mut dyn FnMut(Event)) -> Result<()> {
        info!("Executing from ${address:04X}");
        on_event(Event::Executing { address });

        self.channel
            .flush_both_directions()?;
        self.channel
            .write_all(&encode_execute_command(address))?;
        self.channel
            .drain()?;

        for seen in 1..=SPACES_BEFORE_GO {
            if self
                .channel
                .await_byte(Expect::Byte(b' '))?
                == Wait::TimedOut
            {
                debug!("Space {seen}/{SPACES_BEFORE_GO} not seen, continuing");
            }
        }

        if self
            .channel
            .try_write(GO_COMMAND)?
            == WriteOutcome::Busy
        {
            warn!("Port busy, run command was not sent");
        }
        self.channel
            .drain()
    }
}

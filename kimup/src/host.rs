//! Host-side serial port discovery.

use log::{debug, warn};

use crate::port::PortInfo;

/// Device paths tried when nothing more specific is configured.
pub const FALLBACK_PORTS: &[&str] = &["/dev/ttyUSB0", "/dev/cu.usbserial"];

/// Discover all available serial ports.
#[must_use]
pub fn discover_ports() -> Vec<PortInfo> {
    #[cfg(feature = "native")]
    {
        use crate::port::{NativePortEnumerator, PortEnumerator};

        match NativePortEnumerator::list_ports() {
            Ok(ports) => {
                for port in &ports {
                    debug!("Found serial port {port}");
                }
                ports
            },
            Err(e) => {
                warn!("Failed to enumerate serial ports: {e}");
                Vec::new()
            },
        }
    }
    #[cfg(not(feature = "native"))]
    {
        Vec::new()
    }
}

/// Ordered, de-duplicated list of devices to try.
///
/// Preferred names come first in the order given, then the fixed fallback
/// paths, then whatever the system enumerates.
pub fn candidate_ports<I, S>(preferred: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut candidates: Vec<String> = Vec::new();
    let discovered = discover_ports()
        .into_iter()
        .map(|p| p.name);
    let all = preferred
        .into_iter()
        .map(Into::into)
        .chain(
            FALLBACK_PORTS
                .iter()
                .map(|p| (*p).to_string()),
        )
        .chain(discovered);

    for name in all {
        if !name.is_empty() && !candidates.contains(&name) {
            candidates.push(name);
        }
    }
    debug!("Port candidates: {candidates:?}");
    candidates
}

/// Open the first candidate that opens successfully.
#[cfg(feature = "native")]
pub fn open_first_available(
    candidates: &[String],
    template: &crate::port::SerialConfig,
) -> crate::Result<crate::port::NativePort> {
    use crate::error::Error;
    use crate::port::{NativePort, SerialConfig};

    let mut last_error = None;
    for name in candidates {
        debug!("Trying {name}");
        let config = SerialConfig {
            port_name: name.clone(),
            ..template.clone()
        };
        match NativePort::open(&config) {
            Ok(port) => return Ok(port),
            Err(e @ Error::Usage(_)) => return Err(e),
            Err(e) => {
                debug!("Could not open {name}: {e}");
                last_error = Some(e);
            },
        }
    }
    Err(last_error.unwrap_or(Error::DeviceNotFound))
}

//! Serial port resolution.
//!
//! An explicitly named port (flag, `KIMUP_PORT`, `SERIALPORT` or config
//! file) is used as-is. Otherwise the well-known USB adapter paths are tried
//! first, then every port the system reports.

use {
    crate::config::Config,
    anyhow::{Context, Result},
    kimup::{NativePort, SerialConfig, candidate_ports, open_first_available},
    log::{debug, info},
    std::time::Duration,
};

/// Environment variable honoured as a port name when no flag is given.
pub const SERIALPORT_ENV: &str = "SERIALPORT";

/// Options for opening the serial port.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI or `KIMUP_PORT`.
    pub port: Option<String>,
    /// Port from the `SERIALPORT` environment variable.
    pub env_port: Option<String>,
    /// Baud rate.
    pub baud: u32,
    /// Per-character timeout.
    pub timeout: Duration,
}

impl SerialOptions {
    /// The port the user named, if any, by priority.
    pub fn explicit_port<'a>(&'a self, config: &'a Config) -> Option<&'a str> {
        self.port
            .as_deref()
            .or(self.env_port.as_deref())
            .or(config
                .connection
                .port
                .as_deref())
            .filter(|p| !p.is_empty())
    }
}

/// Ports to try, in order.
pub fn resolve_candidates(options: &SerialOptions, config: &Config) -> Vec<String> {
    match options.explicit_port(config) {
        Some(port) => vec![port.to_string()],
        None => candidate_ports(std::iter::empty::<String>()),
    }
}

/// Open the serial port to the KIM-1.
pub fn open_port(options: &SerialOptions, config: &Config) -> Result<NativePort> {
    let candidates = resolve_candidates(options, config);
    debug!("Opening one of {candidates:?} at {} baud", options.baud);

    let template = SerialConfig::new("", options.baud).with_timeout(options.timeout);
    let port = open_first_available(&candidates, &template).with_context(|| {
        if candidates.len() == 1 {
            format!("cannot open serial port {}", candidates[0])
        } else {
            "no usable serial port found".to_string()
        }
    })?;
    info!("Using {}", kimup::Port::name(&port));
    Ok(port)
}

//! Native serial port implementation using the `serialport` crate.

use {
    crate::{
        error::{Error, Result},
        port::{MAX_SAFE_BAUD, Port, PortEnumerator, PortInfo, SerialConfig},
    },
    log::{debug, trace},
    serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits},
    std::{
        io::{Read, Write},
        time::Duration,
    },
};

#[cfg(unix)]
mod termios {
    #![allow(unsafe_code)]

    use std::{
        fs::{File, OpenOptions},
        io,
        mem::MaybeUninit,
        os::unix::{fs::OpenOptionsExt, io::AsRawFd, io::RawFd},
    };

    /// Line settings a device had before we opened it.
    pub(super) struct SavedTermios(libc::termios);

    impl SavedTermios {
        /// Read the current settings of the device at `path`.
        ///
        /// The returned file keeps the device open; drop it only once the
        /// port itself is open, so the line is not hung up in between.
        pub(super) fn capture(path: &str) -> io::Result<(Self, File)> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
                .open(path)?;
            let saved = Self::read(file.as_raw_fd())?;
            Ok((saved, file))
        }

        pub(super) fn read(fd: RawFd) -> io::Result<Self> {
            let mut raw = MaybeUninit::<libc::termios>::uninit();
            // SAFETY: `raw` is valid for writes and only read after success.
            if unsafe { libc::tcgetattr(fd, raw.as_mut_ptr()) } != 0 {
                return Err(io::Error::last_os_error());
            }
            // SAFETY: tcgetattr filled the struct.
            Ok(Self(unsafe { raw.assume_init() }))
        }

        /// Put the settings back once pending output has drained.
        pub(super) fn restore(&self, fd: RawFd) -> io::Result<()> {
            // SAFETY: `self.0` is a termios previously returned by tcgetattr.
            if unsafe { libc::tcsetattr(fd, libc::TCSAFLUSH, &self.0) } != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        #[cfg(test)]
        pub(super) fn local_flags(&self) -> libc::tcflag_t {
            self.0
                .c_lflag
        }
    }
}

/// Native serial port implementation.
///
/// On Unix the device's line settings are saved before it is configured
/// and put back when the port is closed or dropped.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    timeout: Duration,
    baud_rate: u32,
    #[cfg(unix)]
    fd: Option<std::os::unix::io::RawFd>,
    #[cfg(unix)]
    saved: Option<termios::SavedTermios>,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    ///
    /// Rates above [`MAX_SAFE_BAUD`] are refused before the device is touched.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        if config.baud_rate == 0 || config.baud_rate > MAX_SAFE_BAUD {
            return Err(Error::Usage(format!(
                "baud rate {} is not supported (maximum {MAX_SAFE_BAUD})",
                config.baud_rate
            )));
        }

        debug!(
            "Opening {} at {} bps, 8N1",
            config.port_name, config.baud_rate
        );
        let builder = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None);

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;

            let (saved, holder) = match termios::SavedTermios::capture(&config.port_name) {
                Ok((saved, holder)) => (Some(saved), Some(holder)),
                Err(e) => {
                    debug!("Could not save line settings of {}: {e}", config.port_name);
                    (None, None)
                },
            };
            let native = builder.open_native()?;
            let fd = native.as_raw_fd();
            drop(holder);

            Ok(Self {
                port: Some(Box::new(native)),
                name: config
                    .port_name
                    .clone(),
                timeout: config.timeout,
                baud_rate: config.baud_rate,
                fd: Some(fd),
                saved,
            })
        }

        #[cfg(not(unix))]
        {
            let port = builder.open()?;

            Ok(Self {
                port: Some(port),
                name: config
                    .port_name
                    .clone(),
                timeout: config.timeout,
                baud_rate: config.baud_rate,
            })
        }
    }

    /// Open a serial port at the safe rate with the default timeout.
    pub fn open_simple(port_name: &str) -> Result<Self> {
        Self::open(&SerialConfig::new(port_name, MAX_SAFE_BAUD))
    }

    fn closed() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed")
    }
}

impl std::fmt::Debug for NativePort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativePort")
            .field("name", &self.name)
            .field("baud_rate", &self.baud_rate)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl Port for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.set_timeout(timeout)?;
        }
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn clear_buffers(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.clear(ClearBuffer::All)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        let Some(port) = self
            .port
            .take()
        else {
            return Ok(());
        };

        #[cfg(unix)]
        let restored = match (self.fd.take(), self.saved.take()) {
            (Some(fd), Some(saved)) => saved.restore(fd),
            _ => Ok(()),
        };
        #[cfg(not(unix))]
        let restored: std::io::Result<()> = Ok(());

        drop(port);
        trace!("Closed {}", self.name);
        restored.map_err(Error::Io)
    }
}

impl Drop for NativePort {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("Failed to restore line settings of {}: {e}", self.name);
        }
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed)
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed)
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed)
            .and_then(std::io::Write::flush)
    }
}

/// Native port enumerator.
pub struct NativePortEnumerator;

impl PortEnumerator for NativePortEnumerator {
    fn list_ports() -> Result<Vec<PortInfo>> {
        let ports = serialport::available_ports().map_err(Error::Serial)?;

        Ok(ports
            .into_iter()
            .map(|p| {
                let (vid, pid, product) = match &p.port_type {
                    serialport::SerialPortType::UsbPort(info) => {
                        (Some(info.vid), Some(info.pid), info.product.clone())
                    },
                    _ => (None, None, None),
                };

                PortInfo {
                    name: p.port_name,
                    vid,
                    pid,
                    product,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // Only checks that enumeration does not panic without hardware
        let _ = NativePortEnumerator::list_ports();
    }

    #[test]
    fn test_open_rejects_fast_baud() {
        let config = SerialConfig::new("/dev/null", 9600);
        let err = NativePort::open(&config).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn test_open_rejects_zero_baud() {
        let config = SerialConfig::new("/dev/null", 0);
        assert!(matches!(NativePort::open(&config), Err(Error::Usage(_))));
    }

    /// A pseudo-terminal pair.
    #[cfg(target_os = "linux")]
    struct Pty {
        _master: std::fs::File,
        slave: std::fs::File,
        path: String,
    }

    #[cfg(target_os = "linux")]
    #[allow(unsafe_code)]
    impl Pty {
        fn open() -> Option<Self> {
            use std::os::unix::{fs::OpenOptionsExt, io::FromRawFd};

            // SAFETY: plain libc calls on a descriptor we own.
            let master = unsafe { libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY) };
            if master < 0 {
                return None;
            }
            // SAFETY: `master` is a fresh descriptor owned by nothing else.
            let master_file = unsafe { std::fs::File::from_raw_fd(master) };
            // SAFETY: `master` stays open for both calls.
            if unsafe { libc::grantpt(master) } != 0 || unsafe { libc::unlockpt(master) } != 0 {
                return None;
            }

            let mut name = [0 as libc::c_char; 64];
            // SAFETY: `name` is writable for its full length.
            if unsafe { libc::ptsname_r(master, name.as_mut_ptr(), name.len()) } != 0 {
                return None;
            }
            // SAFETY: ptsname_r wrote a NUL-terminated path.
            let path = unsafe { std::ffi::CStr::from_ptr(name.as_ptr()) }
                .to_string_lossy()
                .into_owned();
            let slave = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_NOCTTY)
                .open(&path)
                .ok()?;

            Some(Self {
                _master: master_file,
                slave,
                path,
            })
        }

        fn local_flags(&self) -> libc::tcflag_t {
            use std::os::unix::io::AsRawFd;

            termios::SavedTermios::read(self.slave.as_raw_fd())
                .unwrap()
                .local_flags()
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_close_restores_line_settings() {
        let Some(pty) = Pty::open() else {
            return;
        };
        let before = pty.local_flags();
        assert_ne!(before & libc::ICANON, 0);
        assert_ne!(before & libc::ECHO, 0);

        let config = SerialConfig::new(pty.path.as_str(), 300);
        let Ok(mut port) = NativePort::open(&config) else {
            return;
        };
        // Opening configures the line for raw 8N1
        let raw = pty.local_flags();
        assert_eq!(raw & libc::ICANON, 0);

        port.close()
            .unwrap();
        port.close()
            .unwrap();

        let after = pty.local_flags();
        assert_eq!(after, before);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_drop_restores_line_settings() {
        let Some(pty) = Pty::open() else {
            return;
        };
        let before = pty.local_flags();

        let config = SerialConfig::new(pty.path.as_str(), 110);
        let Ok(port) = NativePort::open(&config) else {
            return;
        };
        drop(port);

        let after = pty.local_flags();
        assert_eq!(after, before);
    }

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, MAX_SAFE_BAUD);
        assert_eq!(config.timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_serial_config_builder() {
        let config =
            SerialConfig::new("/dev/ttyUSB0", 110).with_timeout(Duration::from_millis(250));

        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 110);
        assert_eq!(config.timeout, Duration::from_millis(250));
    }
}

//! kimup CLI - upload programs to a KIM-1 over its TTY serial port.
//!
//! ## Features
//!
//! - Upload one or more binary images as monitor hex records
//! - Relay pre-formatted paper tape files byte for byte
//! - Run the program once the load is confirmed
//! - Port, baud and protocol settings from flags, environment or config files

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use kimup::handshake::DEFAULT_CONFIRM_ATTEMPTS;
use kimup::port::DEFAULT_CHAR_TIMEOUT;
use kimup::{
    Event, HandshakeConfig, HandshakeMode, Loader, LoaderConfig, MAX_SAFE_BAUD, TapeImage,
    UploadPlan, UploadTask,
};
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

mod config;
mod serial;

use config::Config;
use serial::{SERIALPORT_ENV, SerialOptions, open_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C/SIGTERM handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors classified for the process exit status.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Bad command line or settings (exit 2).
    #[error("{0}")]
    Usage(String),
    /// Interrupted by the user (exit 130).
    #[error("{0}")]
    Cancelled(String),
}

/// kimup - upload programs to a KIM-1 through its TTY monitor.
///
/// Environment variables:
///   KIMUP_PORT   - Serial port
///   SERIALPORT   - Serial port, if KIMUP_PORT is not set
///   KIMUP_BAUD   - Baud rate (default: 300)
#[derive(Parser)]
#[command(name = "kimup")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
#[command(after_help = "Examples:\n  kimup 0x200 hello.bin\n  kimup -g '$0200' 0x200 hello.bin 0x17F7 vectors.bin\n  kimup -p game.ptp")]
struct Cli {
    /// Run from this address once the load is confirmed.
    #[arg(short = 'g', long = "go", value_name = "ADDR", value_parser = parse_address)]
    go: Option<u16>,

    /// Relay a pre-formatted paper tape file instead of uploading binaries.
    #[arg(short = 'p', long = "paper-tape", value_name = "FILE", conflicts_with = "uploads")]
    paper_tape: Option<PathBuf>,

    /// Load address and binary file pairs.
    #[arg(value_name = "ADDR FILE")]
    uploads: Vec<String>,

    /// Serial port to use (auto-detected if not specified).
    #[arg(long, env = "KIMUP_PORT")]
    port: Option<String>,

    /// Baud rate (at most 300).
    #[arg(long, env = "KIMUP_BAUD")]
    baud: Option<u32>,

    /// Per-character timeout in milliseconds.
    #[arg(long, value_name = "MS")]
    char_timeout_ms: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,
}

/// Parse a 16-bit address.
///
/// Accepts `0x` hex, leading-zero octal, decimal and the 6502 `$` hex prefix.
fn parse_address(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let (digits, radix) = if let Some(hex) = s
        .strip_prefix('$')
        .or_else(|| s.strip_prefix("0x"))
        .or_else(|| s.strip_prefix("0X"))
    {
        (hex, 16)
    } else if s.len() > 1 && s.starts_with('0') {
        (&s[1..], 8)
    } else {
        (s, 10)
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return Err(format!("invalid address '{s}'"));
    }
    let value = u32::from_str_radix(digits, radix).map_err(|e| format!("invalid address '{s}': {e}"))?;
    u16::try_from(value).map_err(|_| format!("address '{s}' out of range (0-65535)"))
}

/// Turn positional `ADDR FILE` values into pairs.
fn upload_pairs(values: &[String]) -> Result<Vec<(u16, PathBuf)>> {
    if values.len() % 2 != 0 {
        return Err(CliError::Usage("address and file arguments must come in pairs".into()).into());
    }
    values
        .chunks(2)
        .map(|pair| -> Result<(u16, PathBuf)> {
            let address = parse_address(&pair[0]).map_err(CliError::Usage)?;
            Ok((address, PathBuf::from(&pair[1])))
        })
        .collect()
}

/// Build the upload plan, opening every input file.
fn build_plan(cli: &Cli) -> Result<UploadPlan> {
    let mut builder = UploadPlan::builder();
    if let Some(tape) = &cli.paper_tape {
        let image = TapeImage::from_file(tape)
            .with_context(|| format!("cannot open paper tape file {}", tape.display()))?;
        builder = builder.tape(image);
    }
    for (address, path) in upload_pairs(&cli.uploads)? {
        let task = UploadTask::from_file(address, &path)
            .with_context(|| format!("cannot open {}", path.display()))?;
        builder = builder.task(task);
    }
    if let Some(address) = cli.go {
        builder = builder.execute(address);
    }
    builder
        .build()
        .map_err(|e| CliError::Usage(e.to_string()).into())
}

/// Operator feedback: a spinner on terminals, plain lines otherwise.
struct Feedback {
    pb: ProgressBar,
    lines: bool,
}

impl Feedback {
    fn new(quiet: bool) -> Self {
        if quiet {
            return Self {
                pb: ProgressBar::hidden(),
                lines: false,
            };
        }
        if !use_fancy_output() {
            return Self {
                pb: ProgressBar::hidden(),
                lines: true,
            };
        }
        let pb = ProgressBar::new_spinner();
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap(),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        Self { pb, lines: false }
    }

    fn say(&self, message: String) {
        if self.lines {
            eprintln!("{message}");
        }
        self.pb
            .set_message(message);
    }

    fn on_event(&self, event: &Event) {
        match event {
            Event::HandshakeStarted(HandshakeMode::InitialContact) => {
                self.say("getting the monitor's attention (press RS?)".into());
            },
            Event::HandshakeStarted(HandshakeMode::PostLoad) => {
                self.say("waiting for completion".into());
            },
            Event::TaskStarted { name, address } => {
                self.say(format!("uploading {name} to address ${address:04X}"));
            },
            Event::TapeStarted { .. } => self.say("transmitting raw paper tape".into()),
            Event::Executing { address } => self.say(format!("executing from ${address:04X}")),
            _ => {},
        }
        self.pb
            .tick();
    }

    /// Close out the display. After `-g` the "executing from" line stays up.
    fn finish(&self, executed: Option<u16>) {
        match final_message(executed) {
            Some(message) => {
                if self.lines {
                    eprintln!("{message}");
                }
                self.pb
                    .finish_with_message(format!("{}", style(message).green()));
            },
            None => self
                .pb
                .finish(),
        }
    }

    fn abandon(&self) {
        self.pb
            .abandon();
    }
}

/// Closing line for a successful session, if any.
fn final_message(executed: Option<u16>) -> Option<&'static str> {
    match executed {
        Some(_) => None,
        None => Some("complete!"),
    }
}

fn confirm_attempts(config: &Config) -> Result<u32> {
    match config
        .protocol
        .confirm_attempts
    {
        Some(0) => Err(CliError::Usage("confirm_attempts must be at least 1".into()).into()),
        Some(attempts) => Ok(attempts),
        None => Ok(DEFAULT_CONFIRM_ATTEMPTS),
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    let baud = cli
        .baud
        .or(config.connection.baud)
        .unwrap_or(MAX_SAFE_BAUD);
    if baud == 0 || baud > MAX_SAFE_BAUD {
        return Err(CliError::Usage(format!(
            "baud rate {baud} is not supported (the KIM-1 handles at most {MAX_SAFE_BAUD})"
        ))
        .into());
    }
    let timeout = match cli
        .char_timeout_ms
        .or(config.protocol.char_timeout_ms)
    {
        Some(0) => return Err(CliError::Usage("character timeout must be positive".into()).into()),
        Some(ms) => Duration::from_millis(ms),
        None => DEFAULT_CHAR_TIMEOUT,
    };
    let max_confirm_attempts = confirm_attempts(&config)?;

    let plan = build_plan(cli)?;
    debug!("Plan: {plan:?}");

    let options = SerialOptions {
        port: cli.port.clone(),
        env_port: env::var(SERIALPORT_ENV).ok(),
        baud,
        timeout,
    };
    let port = open_port(&options, &config)?;

    let loader_config = LoaderConfig {
        handshake: HandshakeConfig {
            max_confirm_attempts,
        },
    };
    let mut loader = Loader::with_config(port, loader_config);
    let feedback = Feedback::new(cli.quiet);

    let result = loader.run(plan, &mut |event| feedback.on_event(&event));
    loader.close();

    match result {
        Ok(report) => {
            feedback.finish(report.executed);
            debug!(
                "{} records, {} bytes",
                report.load.records_sent, report.load.bytes_sent
            );
            Ok(())
        },
        Err(e) => {
            feedback.abandon();
            if was_interrupted() || matches!(e, kimup::Error::Interrupted) {
                return Err(CliError::Cancelled("exiting on signal".into()).into());
            }
            Err(e.into())
        },
    }
}

/// Map an error to the process exit status.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    match err.downcast_ref::<kimup::Error>() {
        Some(kimup::Error::Usage(_)) => 2,
        Some(kimup::Error::Interrupted) => 130,
        _ => 1,
    }
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "kimup v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install signal handler: {e}");
    }
    kimup::set_interrupt_checker(was_interrupted);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            if code == 130 {
                eprintln!("{e}");
            } else {
                eprintln!("{} {e:#}", style("Error:").red().bold());
            }
            ExitCode::from(code)
        },
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    // ---- clap validation ----

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_pairs_and_go() {
        let cli =
            Cli::try_parse_from(["kimup", "-g", "$0200", "0x200", "a.bin", "0x300", "b.bin"])
                .unwrap();
        assert_eq!(cli.go, Some(0x0200));
        assert_eq!(cli.uploads, ["0x200", "a.bin", "0x300", "b.bin"]);
        assert!(cli.paper_tape.is_none());
    }

    #[test]
    fn test_cli_parse_paper_tape() {
        let cli = Cli::try_parse_from(["kimup", "-p", "game.ptp"]).unwrap();
        assert_eq!(cli.paper_tape, Some(PathBuf::from("game.ptp")));
        assert!(cli.uploads.is_empty());
    }

    #[test]
    fn test_cli_paper_tape_with_pairs_is_rejected() {
        let result = Cli::try_parse_from(["kimup", "-p", "game.ptp", "0x200", "a.bin"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_invalid_go_address_is_rejected() {
        assert!(Cli::try_parse_from(["kimup", "-g", "0x10000", "0x200", "a.bin"]).is_err());
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "kimup",
            "--port",
            "/dev/ttyUSB3",
            "--baud",
            "110",
            "--char-timeout-ms",
            "2500",
            "-vv",
            "--config",
            "my.toml",
            "0x200",
            "a.bin",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB3"));
        assert_eq!(cli.baud, Some(110));
        assert_eq!(cli.char_timeout_ms, Some(2500));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config_path, Some(PathBuf::from("my.toml")));
    }

    // ---- parse_address ----

    #[test]
    fn test_parse_address_prefixes() {
        assert_eq!(parse_address("0x1C4F").unwrap(), 0x1C4F);
        assert_eq!(parse_address("0X1c4f").unwrap(), 0x1C4F);
        assert_eq!(parse_address("$0200").unwrap(), 0x0200);
        assert_eq!(parse_address("0400").unwrap(), 0o400);
        assert_eq!(parse_address("512").unwrap(), 512);
        assert_eq!(parse_address("0").unwrap(), 0);
    }

    #[test]
    fn test_parse_address_bounds() {
        assert_eq!(parse_address("65535").unwrap(), 0xFFFF);
        assert_eq!(parse_address("0xFFFF").unwrap(), 0xFFFF);
        assert!(parse_address("65536").is_err());
        assert!(parse_address("0x10000").is_err());
    }

    #[test]
    fn test_parse_address_invalid() {
        assert!(parse_address("").is_err());
        assert!(parse_address("$").is_err());
        assert!(parse_address("0x").is_err());
        assert!(parse_address("089").is_err());
        assert!(parse_address("-1").is_err());
        assert!(parse_address("0x+1").is_err());
        assert!(parse_address("zz").is_err());
    }

    // ---- upload pairs ----

    #[test]
    fn test_upload_pairs_odd_count_is_usage_error() {
        let err = upload_pairs(&["0x200".into()]).unwrap_err();
        assert_eq!(exit_code_for(&err), 2);
    }

    #[test]
    fn test_upload_pairs_bad_address_is_usage_error() {
        let err = upload_pairs(&["nope".into(), "a.bin".into()]).unwrap_err();
        assert_eq!(exit_code_for(&err), 2);
    }

    #[test]
    fn test_upload_pairs_in_order() {
        let pairs =
            upload_pairs(&["0x200".into(), "a.bin".into(), "$17F7".into(), "b.bin".into()]).unwrap();
        assert_eq!(
            pairs,
            vec![
                (0x0200, PathBuf::from("a.bin")),
                (0x17F7, PathBuf::from("b.bin"))
            ]
        );
    }

    // ---- exit codes ----

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(exit_code_for(&CliError::Usage("x".into()).into()), 2);
        assert_eq!(exit_code_for(&CliError::Cancelled("x".into()).into()), 130);
        assert_eq!(exit_code_for(&kimup::Error::Interrupted.into()), 130);
        assert_eq!(
            exit_code_for(&kimup::Error::HandshakeFailed { attempts: 10 }.into()),
            1
        );
        let wrapped = anyhow::Error::new(kimup::Error::Usage("x".into())).context("while loading");
        assert_eq!(exit_code_for(&wrapped), 2);
    }

    #[test]
    fn test_build_plan_missing_file_is_runtime_error() {
        let cli = Cli::try_parse_from(["kimup", "0x200", "/nonexistent/kimup/a.bin"]).unwrap();
        let err = build_plan(&cli).unwrap_err();
        assert_eq!(exit_code_for(&err), 1);
        assert!(format!("{err:#}").contains("/nonexistent/kimup/a.bin"));
    }

    #[test]
    fn test_build_plan_go_without_files_is_usage_error() {
        let cli = Cli::try_parse_from(["kimup", "-g", "0x200"]).unwrap();
        let err = build_plan(&cli).unwrap_err();
        assert_eq!(exit_code_for(&err), 2);
    }

    #[test]
    fn test_zero_confirm_attempts_is_usage_error() {
        let mut config = Config::default();
        config
            .protocol
            .confirm_attempts = Some(0);
        let err = confirm_attempts(&config).unwrap_err();
        assert_eq!(exit_code_for(&err), 2);

        config
            .protocol
            .confirm_attempts = Some(3);
        assert_eq!(confirm_attempts(&config).unwrap(), 3);
        assert_eq!(
            confirm_attempts(&Config::default()).unwrap(),
            DEFAULT_CONFIRM_ATTEMPTS
        );
    }

    #[test]
    fn test_final_message_only_without_go() {
        assert_eq!(final_message(None), Some("complete!"));
        assert_eq!(final_message(Some(0x0200)), None);
    }
}

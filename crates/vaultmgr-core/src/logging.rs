//! Logging bootstrapper shared by the vaultmgr binary and tests.

use env_logger::fmt::Formatter;
use env_logger::Env;
use log::{LevelFilter, Record};
use serde_json::json;
use std::env;
use std::io::{self, Write};
use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

const FORMAT_ENV: &str = "VAULTMGR_LOG_FORMAT";
const LEVEL_ENV: &str = "VAULTMGR_LOG_LEVEL";

/// Initialize the global logger.
///
/// The first caller wins; subsequent calls are no-ops. `VAULTMGR_LOG_LEVEL`
/// overrides `default_level`, and an explicit `RUST_LOG` takes over module
/// filtering entirely. `VAULTMGR_LOG_FORMAT=plain` disables JSON output.
///
/// The backend itself lets every record through; the effective level is the
/// `log` crate's max level, so [`set_level`] can raise or lower it later.
pub fn init(default_level: LevelFilter) {
    let _ = INIT.get_or_init(|| configure(default_level));
}

/// Change the effective level at runtime (debug flag, global config updates).
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

/// Parse a level name as found in config documents; unknown names yield `None`.
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    match name.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(LevelFilter::Trace),
        "debug" => Some(LevelFilter::Debug),
        "info" => Some(LevelFilter::Info),
        "warn" | "warning" => Some(LevelFilter::Warn),
        "error" | "fatal" | "panic" => Some(LevelFilter::Error),
        "off" | "none" => Some(LevelFilter::Off),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Plain,
}

impl LogFormat {
    fn from_env() -> Self {
        match env::var(FORMAT_ENV) {
            Ok(value) if value.eq_ignore_ascii_case("plain") => LogFormat::Plain,
            _ => LogFormat::Json,
        }
    }
}

fn write_record(format: LogFormat, buf: &mut Formatter, record: &Record) -> io::Result<()> {
    let level = record.level().as_str().to_ascii_lowercase();
    match format {
        LogFormat::Json => {
            let line = json!({
                "time": buf.timestamp_millis().to_string(),
                "level": level,
                "source": record.target(),
                "msg": record.args().to_string(),
                "pid": std::process::id(),
            });
            writeln!(buf, "{line}")
        }
        LogFormat::Plain => writeln!(
            buf,
            "{} [{level}] {}: {}",
            buf.timestamp_millis(),
            record.target(),
            record.args()
        ),
    }
}

fn configure(default_level: LevelFilter) {
    let level = env::var(LEVEL_ENV)
        .ok()
        .and_then(|value| parse_level(&value))
        .unwrap_or(default_level);

    let mut builder = if env::var("RUST_LOG").is_ok() {
        env_logger::Builder::from_env(Env::default())
    } else {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(LevelFilter::Trace);
        builder
    };

    let format = LogFormat::from_env();
    builder.format(move |buf, record| write_record(format, buf, record));

    if let Err(err) = builder.try_init() {
        eprintln!("vaultmgr: logger already installed: {err}");
    }
    set_level(level);
}

//! Tracing subscriber setup for the `fanout` binary
//!
//! Everything is logged to stderr so stdout stays free for job results and
//! for the `fanout handler` result frame. An optional rolling log file gets
//! the same events with source locations attached.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingSettings;
use crate::error::{Error, Result};

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

/// Keeps the file writer thread alive; drop it last to flush
pub struct LogGuards {
    _file_guard: Option<WorkerGuard>,
}

/// Install the global subscriber for a `fanout` process
pub fn init_logging(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Result<LogGuards> {
    let level = effective_level(settings, verbose, quiet);

    let (file, file_guard) = match &settings.file {
        Some(log_file) => {
            let (layer, guard) = file_layer(log_file, settings)?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(level)?)
        .with(format_layer(std::io::stderr, settings.json_format, false))
        .with(file)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))?;

    tracing::debug!(%level, file = ?settings.file, json = settings.json_format, "Logging initialized");

    Ok(LogGuards {
        _file_guard: file_guard,
    })
}

/// `--quiet` wins over `-v`; each `-v` lowers the threshold one step
fn effective_level(settings: &LoggingSettings, verbose: u8, quiet: bool) -> Level {
    if quiet {
        return Level::ERROR;
    }
    match verbose {
        0 => parse_level(&settings.level),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Unknown names fall back to info; "warning" is accepted for warn
fn parse_level(name: &str) -> Level {
    let name = name.trim().to_ascii_lowercase();
    let name = if name == "warning" { "warn" } else { name.as_str() };
    Level::from_str(name).unwrap_or(Level::INFO)
}

/// RUST_LOG tunes dependencies; the `fanout` target always follows `level`
fn env_filter(level: Level) -> Result<EnvFilter> {
    let base = level.to_string().to_ascii_lowercase();
    let own: Directive = format!("fanout={}", base)
        .parse()
        .map_err(|e| Error::Config(format!("Invalid log directive for level {}: {}", base, e)))?;

    Ok(EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&base))
        .add_directive(own))
}

/// One fmt layer over `writer`; `detailed` adds thread ids and source locations
fn format_layer<S, W>(writer: W, json: bool, detailed: bool) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(detailed || json)
        .with_file(detailed || json)
        .with_line_number(detailed || json);

    match (json, detailed) {
        (true, _) => Box::new(layer.json().with_span_events(FmtSpan::CLOSE).with_ansi(false)),
        (false, false) => Box::new(layer.compact().with_ansi(true)),
        (false, true) => Box::new(layer.with_ansi(false)),
    }
}

/// tracing-appender only rotates on time, so small size caps map to hourly files
fn rotation_for(max_size_mb: u64) -> Rotation {
    if max_size_mb > 0 && max_size_mb < 10 {
        Rotation::HOURLY
    } else {
        Rotation::DAILY
    }
}

fn file_layer<S>(log_file: &str, settings: &LoggingSettings) -> Result<(BoxedLayer<S>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let path = Path::new(log_file);
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(directory).map_err(|e| Error::IoWrite {
        path: directory.to_path_buf(),
        source: e,
    })?;

    let prefix = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("fanout.log");

    let appender = RollingFileAppender::builder()
        .rotation(rotation_for(settings.max_file_size_mb))
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(settings.max_files as usize)
        .build(directory)
        .map_err(|e| Error::Config(format!("Failed to open log file {}: {}", path.display(), e)))?;

    let (writer, guard) = tracing_appender::non_blocking(appender);
    Ok((format_layer(writer, settings.json_format, true), guard))
}

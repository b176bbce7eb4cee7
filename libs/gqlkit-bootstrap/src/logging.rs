//! Tracing subscriber setup driven by the `logging` config section.
//!
//! Console output is human-readable on stderr. File output is JSON, written to
//! size-rotated files; a subsystem with its own `file` gets its own rotating
//! file, everything else goes to the `default` file. `RUST_LOG`, when set,
//! caps both sinks.

use std::collections::BTreeSet;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use file_rotate::compression::Compression;
use file_rotate::suffix::{AppendTimestamp, FileLimit};
use file_rotate::{ContentLimit, FileRotate};
use parking_lot::Mutex;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LoggingConfig, Section};

const DEFAULT_SECTION: &str = "default";
const DEFAULT_MAX_SIZE_MB: u64 = 100;
const DEFAULT_MAX_BACKUPS: usize = 3;

static CONSOLE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// `None` means the sink is off for that section.
fn parse_level(s: &str) -> Option<LevelFilter> {
    match s.trim().to_ascii_lowercase().as_str() {
        "off" | "none" => None,
        "trace" => Some(LevelFilter::TRACE),
        "debug" => Some(LevelFilter::DEBUG),
        "warn" => Some(LevelFilter::WARN),
        "error" => Some(LevelFilter::ERROR),
        _ => Some(LevelFilter::INFO),
    }
}

/// `target` is `prefix` itself or one of its `::` children.
fn target_under(target: &str, prefix: &str) -> bool {
    target
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

type Rotating = Arc<Mutex<FileRotate<AppendTimestamp>>>;

#[derive(Clone)]
struct SinkHandle(Option<Rotating>);

impl Write for SinkHandle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &self.0 {
            Some(file) => file.lock().write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &self.0 {
            Some(file) => file.lock().flush(),
            None => Ok(()),
        }
    }
}

/// Picks the rotating file for a record by its target.
/// Longest matching subsystem prefix wins; unmatched targets use `default`.
#[derive(Clone, Default)]
struct FileSinks {
    default: Option<Rotating>,
    routes: Vec<(String, Rotating)>,
}

impl FileSinks {
    fn is_empty(&self) -> bool {
        self.default.is_none() && self.routes.is_empty()
    }

    fn route(&self, target: &str) -> Option<Rotating> {
        self.routes
            .iter()
            .filter(|(prefix, _)| target_under(target, prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, file)| Arc::clone(file))
            .or_else(|| self.default.clone())
    }
}

impl<'a> MakeWriter<'a> for FileSinks {
    type Writer = SinkHandle;

    fn make_writer(&'a self) -> Self::Writer {
        SinkHandle(self.default.clone())
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        SinkHandle(self.route(meta.target()))
    }
}

fn resolve_log_path(file: &str, base_dir: &Path) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

fn open_rotating(section: &Section, base_dir: &Path) -> std::io::Result<Rotating> {
    let path = resolve_log_path(&section.file, base_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let max_bytes = section.max_size_mb.unwrap_or(DEFAULT_MAX_SIZE_MB) as usize * 1024 * 1024;
    let files = section.max_backups.unwrap_or(DEFAULT_MAX_BACKUPS);
    Ok(Arc::new(Mutex::new(FileRotate::new(
        path,
        AppendTimestamp::default(FileLimit::MaxFiles(files)),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        None,
    ))))
}

fn open_sink(name: &str, section: &Section, base_dir: &Path) -> Option<Rotating> {
    if section.file.trim().is_empty() {
        return None;
    }
    match open_rotating(section, base_dir) {
        Ok(file) => Some(file),
        Err(e) => {
            // The subscriber is not installed yet.
            eprintln!("Failed to open log file for '{name}' ({}): {e}", section.file);
            None
        }
    }
}

/// Console and file level filters derived from the config sections.
fn build_targets(cfg: &LoggingConfig, file_sinks: &FileSinks) -> (Targets, Targets) {
    let default = cfg.get(DEFAULT_SECTION);

    let console_default = default
        .map(|s| parse_level(&s.console_level).unwrap_or(LevelFilter::OFF))
        .unwrap_or(LevelFilter::INFO);
    let file_default = match (default, file_sinks.default.is_some()) {
        (Some(s), true) => parse_level(&s.file_level).unwrap_or(LevelFilter::OFF),
        (_, false) => LevelFilter::OFF,
        (None, true) => LevelFilter::INFO,
    };

    let mut console = Targets::new().with_default(console_default);
    let mut file = Targets::new().with_default(file_default);

    for (name, section) in cfg.iter().filter(|(k, _)| k.as_str() != DEFAULT_SECTION) {
        console = console.with_target(
            name.clone(),
            parse_level(&section.console_level).unwrap_or(LevelFilter::OFF),
        );
        if !section.file.trim().is_empty() {
            file = file.with_target(
                name.clone(),
                parse_level(&section.file_level).unwrap_or(LevelFilter::OFF),
            );
        }
    }
    (console, file)
}

fn open_file_sinks(cfg: &LoggingConfig, base_dir: &Path) -> FileSinks {
    let mut sinks = FileSinks::default();
    for (name, section) in cfg {
        let Some(file) = open_sink(name, section, base_dir) else {
            continue;
        };
        if name == DEFAULT_SECTION {
            sinks.default = Some(file);
        } else {
            sinks.routes.push((name.clone(), file));
        }
    }
    sinks
}

/// Installs the global subscriber. Relative log paths resolve against `base_dir`.
/// A second call is a no-op.
pub fn init_logging(cfg: &LoggingConfig, base_dir: &Path) {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("LogTracer init skipped: {e}");
    }

    if cfg.is_empty() {
        init_minimal();
        return;
    }

    let sinks = open_file_sinks(cfg, base_dir);
    let (console_targets, file_targets) = build_targets(cfg, &sinks);

    let (stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = CONSOLE_GUARD.set(guard);

    let console_layer = fmt::layer()
        .with_writer(stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(console_targets);

    let file_layer = (!sinks.is_empty()).then(|| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(sinks)
            .with_filter(file_targets)
    });

    let _ = Registry::default()
        .with(EnvFilter::try_from_default_env().ok())
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

fn init_minimal() {
    let _ = Registry::default()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            fmt::layer()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339()),
        )
        .try_init();
}

/// Distinct log files referenced by `cfg`, resolved against `base_dir`.
pub fn log_files(cfg: &LoggingConfig, base_dir: &Path) -> Vec<PathBuf> {
    cfg.values()
        .filter(|s| !s.file.trim().is_empty())
        .map(|s| resolve_log_path(&s.file, base_dir))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

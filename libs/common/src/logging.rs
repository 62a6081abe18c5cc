//! Logging bootstrap for tapgen services
//!
//! Console plus daily rolling file output, both as `timestamp [LEVEL] message`.
//! Rolled files are gzipped after a few days and deleted after the retention period.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, SystemTime};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{
        self,
        format::{FmtSpan, Writer},
        FmtContext, FormatEvent, FormatFields,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment variable overriding the log root directory
pub const LOG_DIR_ENV: &str = "TAPGEN_LOG_DIR";

const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
const SECS_PER_DAY: u64 = 86_400;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn level_tag(level: Level) -> (&'static str, &'static str) {
    match level {
        Level::TRACE => ("[TRACE]", "\x1b[35m"),
        Level::DEBUG => ("[DEBUG]", "\x1b[34m"),
        Level::INFO => ("[INFO]", "\x1b[32m"),
        Level::WARN => ("[WARN]", "\x1b[33m"),
        Level::ERROR => ("[ERROR]", "\x1b[31m"),
    }
}

/// `2026-03-01T08:30:00.123456Z [INFO] message`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let (tag, color) = level_tag(*event.metadata().level());
        let stamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ");
        if writer.has_ansi_escapes() {
            write!(writer, "{stamp} {color}{tag}\x1b[0m ")?;
        } else {
            write!(writer, "{stamp} {tag} ")?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// Keeps the non-blocking writers flushing for the life of the process
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

/// Log root: `TAPGEN_LOG_DIR`, then the configured directory, then `logs`
pub fn resolve_log_root(config_dir: Option<&str>) -> PathBuf {
    if let Ok(dir) = std::env::var(LOG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    PathBuf::from(config_dir.unwrap_or("logs"))
}

/// `{YYYYMMDD}_{service}.log`, or `{YYYYMMDD}_{service}.{n}.log` for the n-th
/// size rotation of the day
fn log_file_name(date: &str, service: &str, index: u32) -> String {
    match index {
        0 => format!("{date}_{service}.log"),
        n => format!("{date}_{service}.{n}.log"),
    }
}

fn today() -> String {
    chrono::Local::now().format("%Y%m%d").to_string()
}

struct RollingState {
    date: String,
    index: u32,
    size: u64,
    file: File,
}

/// Appends to one file per day, starting a numbered file when `max_size` is reached
#[derive(Clone)]
struct RollingFileWriter {
    dir: PathBuf,
    service: String,
    max_size: u64,
    state: Arc<Mutex<RollingState>>,
}

impl RollingFileWriter {
    fn new(service: String, dir: PathBuf, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let date = today();
        let (file, size) = Self::open(&dir, &service, &date, 0)?;
        Ok(Self {
            dir,
            service,
            max_size,
            state: Arc::new(Mutex::new(RollingState {
                date,
                index: 0,
                size,
                file,
            })),
        })
    }

    fn open(dir: &Path, service: &str, date: &str, index: u32) -> io::Result<(File, u64)> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(log_file_name(date, service, index)))?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok((file, size))
    }

    fn switch_to(&self, state: &mut RollingState, date: String, index: u32) -> io::Result<()> {
        let (file, size) = Self::open(&self.dir, &self.service, &date, index)?;
        *state = RollingState {
            date,
            index,
            size,
            file,
        };
        Ok(())
    }
}

impl Write for RollingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| io::Error::other(format!("log writer poisoned: {e}")))?;

        let date = today();
        if state.date != date {
            self.switch_to(&mut state, date, 0)?;
        } else if state.size > 0 && state.size + buf.len() as u64 > self.max_size {
            let (date, index) = (state.date.clone(), state.index + 1);
            self.switch_to(&mut state, date, index)?;
        }

        let written = state.file.write(buf)?;
        state.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.state.lock() {
            Ok(mut state) => state.file.flush(),
            Err(e) => Err(io::Error::other(format!("log writer poisoned: {e}"))),
        }
    }
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub service_name: String,
    pub log_dir: PathBuf,
    /// Base level when `RUST_LOG` is not set
    pub level: String,
    /// JSON lines in the file layer instead of the bracketed format
    pub enable_json: bool,
    /// Console only when false
    pub enable_file: bool,
    pub max_file_size: u64,
    pub compress_after_days: u64,
    pub retain_days: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_dir: resolve_log_root(None),
            level: "info".to_string(),
            enable_json: false,
            enable_file: true,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            compress_after_days: 7,
            retain_days: 365,
        }
    }
}

impl LogConfig {
    /// The service logs at `level`; dependencies stay at `info` unless `level` is
    /// `trace` or quieter than `info`
    fn default_filter(&self) -> String {
        match self.level.as_str() {
            "trace" => format!("trace,{}=trace", self.service_name),
            "debug" => format!("info,{}=debug", self.service_name),
            level => format!("{},{}={}", level, self.service_name, level),
        }
    }
}

/// Install the global subscriber; fails if one is already installed
pub fn init_with_config(config: LogConfig) -> Result<(), BoxError> {
    let env_filter = std::env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.is_empty())
        .map_or_else(|| EnvFilter::new(config.default_filter()), EnvFilter::new);

    let console_layer = fmt::layer()
        .with_ansi(true)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = if config.enable_file {
        let writer = RollingFileWriter::new(
            config.service_name.clone(),
            config.log_dir.clone(),
            config.max_file_size,
        )?;
        let (non_blocking, guard) = tracing_appender::non_blocking(writer);
        GUARDS
            .get_or_init(|| Mutex::new(Vec::new()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(guard);

        let layer = if config.enable_json {
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .event_format(BracketedLevelFormat)
                .boxed()
        };
        Some(layer)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        "Logging {} to {}",
        config.service_name,
        config.log_dir.display()
    );

    if config.enable_file {
        start_log_compression_task(LogMaintenance {
            dir: config.log_dir,
            service: config.service_name,
            compress_after: Duration::from_secs(config.compress_after_days * SECS_PER_DAY),
            retain: Duration::from_secs(config.retain_days * SECS_PER_DAY),
        });
    }

    Ok(())
}

/// Console-only logging, for one-shot CLI modes
pub fn init(service_name: &str, level: &str) -> Result<(), BoxError> {
    init_with_config(LogConfig {
        service_name: service_name.to_string(),
        level: level.to_string(),
        enable_file: false,
        ..Default::default()
    })
}

/// Housekeeping of one service's rolled log files
#[derive(Debug, Clone)]
pub struct LogMaintenance {
    pub dir: PathBuf,
    pub service: String,
    /// Plain logs older than this are gzipped
    pub compress_after: Duration,
    /// Gzipped logs older than this are deleted
    pub retain: Duration,
}

/// What a maintenance pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub compressed: Vec<String>,
    pub deleted: Vec<String>,
}

impl LogMaintenance {
    /// One blocking pass over the log directory; today's files are never touched
    pub fn run_once(&self) -> io::Result<MaintenanceReport> {
        let marker = format!("_{}.", self.service);
        let today = today();
        let now = SystemTime::now();
        let mut report = MaintenanceReport::default();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if !name.contains(&marker) || name.starts_with(&today) {
                continue;
            }

            let modified = fs::metadata(&path)?.modified()?;
            let age = now.duration_since(modified).unwrap_or_default();

            if name.ends_with(".log") && age >= self.compress_after {
                gzip_file(&path)?;
                fs::remove_file(&path)?;
                report.compressed.push(name);
            } else if name.ends_with(".log.gz") && age >= self.retain {
                fs::remove_file(&path)?;
                report.deleted.push(name);
            }
        }

        Ok(report)
    }
}

fn gzip_file(path: &Path) -> io::Result<()> {
    let mut input = File::open(path)?;
    let mut output_name = path.as_os_str().to_owned();
    output_name.push(".gz");

    let mut encoder = GzEncoder::new(File::create(output_name)?, Compression::best());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}

/// Run [`LogMaintenance`] one minute after start and then daily
///
/// No-op outside a tokio runtime.
pub fn start_log_compression_task(maintenance: LogMaintenance) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::debug!("No tokio runtime, log maintenance disabled");
        return;
    };

    handle.spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        let mut daily = tokio::time::interval(Duration::from_secs(SECS_PER_DAY));

        loop {
            daily.tick().await;
            let pass = maintenance.clone();
            match tokio::task::spawn_blocking(move || pass.run_once()).await {
                Ok(Ok(report)) => tracing::debug!(
                    "Log maintenance: {} compressed, {} deleted",
                    report.compressed.len(),
                    report.deleted.len()
                ),
                Ok(Err(e)) => tracing::error!("Log maintenance for {}: {}", maintenance.service, e),
                Err(e) => tracing::error!("Log maintenance task failed: {}", e),
            }
        }
    });
}

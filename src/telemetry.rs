//! Newline-delimited JSON event log with size based rotation.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

use crate::config::RotationConfig;

/// Append-only writer that moves `<path>` to `<path>.1` (shifting older
/// backups up to `keep`) once the file reaches `max_bytes`.
pub struct RotatingWriter {
    path: PathBuf,
    file: fs::File,
    max_bytes: Option<u64>,
    keep: usize,
    compress: bool,
}

impl RotatingWriter {
    pub fn open(path: &str, rotation: &RotationConfig) -> std::io::Result<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            path: PathBuf::from(path),
            file,
            max_bytes: rotation.max_bytes,
            keep: rotation.keep,
            compress: rotation.compress,
        })
    }

    pub fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        if let Some(limit) = self.max_bytes {
            if self.current_size().map(|s| s >= limit).unwrap_or(false) {
                self.rotate()?;
            }
        }
        writeln!(self.file, "{}", line)
    }

    pub fn current_size(&self) -> Option<u64> {
        self.path.metadata().ok().map(|m| m.len())
    }

    fn backup_path(&self, idx: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", idx));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        if self.keep > 0 {
            for idx in (1..self.keep).rev() {
                let from = self.backup_path(idx);
                if from.exists() {
                    fs::rename(&from, self.backup_path(idx + 1))?;
                }
                let from_gz = gz_path(&from);
                if from_gz.exists() {
                    fs::rename(&from_gz, gz_path(&self.backup_path(idx + 1)))?;
                }
            }
            let first = self.backup_path(1);
            fs::rename(&self.path, &first)?;
            if self.compress {
                compress_file(&first)?;
            }
        }
        self.file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }
}

fn gz_path(path: &std::path::Path) -> PathBuf {
    let mut name = path.to_path_buf().into_os_string();
    name.push(".gz");
    PathBuf::from(name)
}

fn compress_file(path: &std::path::Path) -> std::io::Result<()> {
    let data = fs::read(path)?;
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&data)?;
    fs::write(gz_path(path), gz.finish()?)?;
    fs::remove_file(path)
}

/// One line of the webhook event log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRecord<'a> {
    pub ts: String,
    pub platform: &'a str,
    pub intent: Option<&'a str>,
    pub session: Option<&'a str>,
    pub forward: &'a str,
    pub schema_violations: usize,
    pub latency_ms: u128,
}

impl<'a> WebhookRecord<'a> {
    pub fn now(platform: &'a str, forward: &'a str) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            platform,
            intent: None,
            session: None,
            forward,
            schema_violations: 0,
            latency_ms: 0,
        }
    }
}

/// Event log shared by handlers.  Writing is best effort: failures are
/// counted and logged, never surfaced to the caller.
#[derive(Clone)]
pub struct EventLog {
    writer: Option<Arc<Mutex<RotatingWriter>>>,
    log_stdout: bool,
    log_sample_n: Option<u64>,
    sample_counter: Arc<AtomicU64>,
    lines_total: Arc<AtomicU64>,
    write_errors_total: Arc<AtomicU64>,
    file_size_bytes: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new(writer: Option<RotatingWriter>, log_stdout: bool, log_sample_n: Option<u64>) -> Self {
        let file_size = writer.as_ref().and_then(|w| w.current_size()).unwrap_or(0);
        Self {
            writer: writer.map(|w| Arc::new(Mutex::new(w))),
            log_stdout,
            log_sample_n,
            sample_counter: Arc::new(AtomicU64::new(0)),
            lines_total: Arc::new(AtomicU64::new(0)),
            write_errors_total: Arc::new(AtomicU64::new(0)),
            file_size_bytes: Arc::new(AtomicU64::new(file_size)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, false, None)
    }

    /// Open `path` if configured; a file that cannot be opened disables the
    /// log with a warning.
    pub fn from_config(
        path: Option<&str>,
        rotation: &RotationConfig,
        log_stdout: bool,
        log_sample_n: Option<u64>,
    ) -> Self {
        let writer = match path {
            Some(p) => match RotatingWriter::open(p, rotation) {
                Ok(w) => Some(w),
                Err(e) => {
                    tracing::warn!(path = %p, error = %e, "failed to open LOG_FILE; event log disabled");
                    None
                }
            },
            None => {
                tracing::debug!("event log disabled: LOG_FILE not set");
                None
            }
        };
        Self::new(writer, log_stdout, log_sample_n)
    }

    pub fn emit(&self, record: &WebhookRecord<'_>) {
        let wrote = self.write_json(record);
        if (wrote || self.writer.is_none()) && self.should_log_stdout() {
            tracing::info!(
                target: "events",
                platform = record.platform,
                intent = ?record.intent,
                session = ?record.session,
                forward = record.forward,
                schemaViolations = record.schema_violations,
                latencyMs = record.latency_ms as u64,
                "webhook"
            );
        }
    }

    pub fn lines_total(&self) -> u64 {
        self.lines_total.load(Ordering::Relaxed)
    }

    pub fn write_errors_total(&self) -> u64 {
        self.write_errors_total.load(Ordering::Relaxed)
    }

    pub fn file_size_bytes(&self) -> u64 {
        self.file_size_bytes.load(Ordering::Relaxed)
    }

    fn write_json<T: Serialize>(&self, record: &T) -> bool {
        let Some(target) = self.writer.as_ref() else {
            return false;
        };
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize event record");
                self.write_errors_total.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };
        // a panic mid-write leaves at most a torn line; keep logging
        let mut guard = target.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.write_line(&line) {
            Ok(()) => {
                self.lines_total.fetch_add(1, Ordering::Relaxed);
                if let Some(sz) = guard.current_size() {
                    self.file_size_bytes.store(sz, Ordering::Relaxed);
                }
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to write event line");
                self.write_errors_total.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn should_log_stdout(&self) -> bool {
        if !self.log_stdout {
            return false;
        }
        match self.log_sample_n {
            Some(n) => self.sample_counter.fetch_add(1, Ordering::Relaxed) % n == 0,
            None => true,
        }
    }
}

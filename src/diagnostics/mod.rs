//! Diagnostic sinks
//!
//! The monitor engine records unexpected internal errors (failing samplers, misbehaving listeners) to a
//! [`DiagnosticSink`]. The sink is created lazily on first need through a [`SinkFactory`], flushed once per
//! sampling cycle and closed exactly once when the engine stops.
//!
//! Two implementations ship with the crate:
//!
//! - [`TracingSink`] forwards records to `tracing` (the default)
//! - [`FileSink`] appends timestamped lines to a per-instance log file

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::constants::DIAGNOSTIC_LOG_PREFIX;

/// Severity of a diagnostic record
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Destination for diagnostic records
pub trait DiagnosticSink: Send + fmt::Debug {
    /// Record one message
    fn write(&mut self, severity: Severity, message: &str) -> Result<()>;

    /// Push buffered records to their destination
    fn flush(&mut self) -> Result<()>;

    /// Release the underlying resource. No writes follow a close.
    fn close(&mut self) -> Result<()>;
}

/// Creates a sink for the engine instance with the given id
pub type SinkFactory = Arc<dyn Fn(u64) -> Result<Box<dyn DiagnosticSink>> + Send + Sync>;

/// Factory producing [`TracingSink`]s
pub fn tracing_sink_factory() -> SinkFactory {
    Arc::new(|instance: u64| -> Result<Box<dyn DiagnosticSink>> { Ok(Box::new(TracingSink::new(instance))) })
}

/// Factory producing [`FileSink`]s inside `directory`
pub fn file_sink_factory(directory: impl Into<PathBuf>) -> SinkFactory {
    let directory = directory.into();
    Arc::new(move |instance: u64| -> Result<Box<dyn DiagnosticSink>> {
        Ok(Box::new(FileSink::create(&directory, instance)?))
    })
}

/// Sink forwarding records to `tracing`
#[derive(Debug)]
pub struct TracingSink {
    instance: u64,
}

impl TracingSink {
    pub fn new(instance: u64) -> Self {
        Self { instance }
    }
}

impl DiagnosticSink for TracingSink {
    fn write(&mut self, severity: Severity, message: &str) -> Result<()> {
        match severity {
            Severity::Info => tracing::info!(target: "memwatch::diagnostics", instance = self.instance, "{}", message),
            Severity::Warning => {
                tracing::warn!(target: "memwatch::diagnostics", instance = self.instance, "{}", message)
            },
            Severity::Error => {
                tracing::error!(target: "memwatch::diagnostics", instance = self.instance, "{}", message)
            },
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Sink appending to `<directory>/memwatch-<instance>.log`
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileSink {
    /// Opens (creating if needed) the log file for `instance` inside `directory`
    pub fn create(directory: &Path, instance: u64) -> Result<Self> {
        fs::create_dir_all(directory)?;
        let path = Self::log_path(directory, instance);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, writer: Some(BufWriter::new(file)) })
    }

    /// Location of the log file used for `instance`
    pub fn log_path(directory: &Path, instance: u64) -> PathBuf {
        directory.join(format!("{}-{}.log", DIAGNOSTIC_LOG_PREFIX, instance))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }
}

impl DiagnosticSink for FileSink {
    fn write(&mut self, severity: Severity, message: &str) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "diagnostic sink is closed").into());
        };
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        writeln!(
            writer,
            "{}.{:03} [{}] {}",
            since_epoch.as_secs(),
            since_epoch.subsec_millis(),
            severity,
            message
        )?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("memwatch-{}-{}", name, std::process::id()))
    }

    #[test]
    fn test_file_sink_writes_per_instance_log() {
        let dir = scratch_dir("file-sink");
        let mut sink = FileSink::create(&dir, 42).unwrap();
        assert_eq!(sink.path(), FileSink::log_path(&dir, 42).as_path());
        assert!(sink.path().ends_with("memwatch-42.log"));

        sink.write(Severity::Error, "sampler exploded").unwrap();
        sink.write(Severity::Warning, "listener failed").unwrap();
        sink.flush().unwrap();

        let contents = fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[ERROR] sampler exploded"));
        assert!(lines[1].ends_with("[WARN] listener failed"));

        sink.close().unwrap();
        assert!(sink.is_closed());
        assert!(sink.write(Severity::Info, "late").is_err());
        // Closing twice is harmless
        sink.close().unwrap();

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_sink_factory() {
        let dir = scratch_dir("factory");
        let factory = file_sink_factory(&dir);
        let mut sink = factory(7).unwrap();
        sink.write(Severity::Info, "hello").unwrap();
        sink.close().unwrap();

        let contents = fs::read_to_string(FileSink::log_path(&dir, 7)).unwrap();
        assert!(contents.contains("[INFO] hello"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_tracing_sink_never_fails() {
        let mut sink = tracing_sink_factory()(1).unwrap();
        assert!(sink.write(Severity::Error, "boom").is_ok());
        assert!(sink.flush().is_ok());
        assert!(sink.close().is_ok());
    }

    #[test]
    fn test_severity_ordering_and_display() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert_eq!(Severity::Warning.to_string(), "WARN");
    }
}

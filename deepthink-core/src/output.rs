//! Line-oriented output sinks for user-visible run reports.
//!
//! The controller writes its progress through an injected [`OutputSink`]
//! instead of touching process-wide stdout, so a caller can tee the report
//! into a file or capture it in tests.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A write-line capability.
pub trait OutputSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// Writes lines to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutOutput;

impl OutputSink for StdoutOutput {
    fn write_line(&self, line: &str) {
        println!("{line}");
    }
}

/// Forwards every line to an inner sink and appends it to a file.
pub struct TeeOutput {
    inner: Arc<dyn OutputSink>,
    path: PathBuf,
    file: Mutex<File>,
}

impl TeeOutput {
    pub fn create(inner: Arc<dyn OutputSink>, path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            inner,
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OutputSink for TeeOutput {
    fn write_line(&self, line: &str) {
        self.inner.write_line(line);
        match self.file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{line}") {
                    tracing::warn!(path = %self.path.display(), error = %e, "Failed to tee output line");
                }
            }
            Err(_) => tracing::warn!(path = %self.path.display(), "Output file lock poisoned"),
        }
    }
}

/// Captures lines in memory.
#[derive(Debug, Default)]
pub struct RecordingOutput {
    lines: Mutex<Vec<String>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }
}

impl OutputSink for RecordingOutput {
    fn write_line(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_output() {
        let out = RecordingOutput::new();
        out.write_line("epoch 0");
        out.write_line("epoch 1");
        assert_eq!(out.lines(), vec!["epoch 0", "epoch 1"]);
        assert!(out.contains("epoch 1"));
    }

    #[test]
    fn test_tee_output_forwards_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report").join("summary.txt");
        let inner = Arc::new(RecordingOutput::new());
        let tee = TeeOutput::create(inner.clone(), &path).unwrap();
        tee.write_line("Testing accuracy: 91.5");
        tee.write_line("Training accuracy: 99.0");

        assert_eq!(inner.lines().len(), 2);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "Testing accuracy: 91.5\nTraining accuracy: 99.0\n");
    }
}

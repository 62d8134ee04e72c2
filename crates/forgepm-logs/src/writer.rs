//! Console log file with rotation, fed from child stdout/stderr

use chrono::Utc;
use forgepm_core::Result;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::rotation::RotationConfig;
use crate::sink::LogSink;

/// Log writer that handles rotation
pub struct LogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    config: RotationConfig,
    current_size: u64,
}

impl LogWriter {
    pub fn new(path: PathBuf, config: RotationConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let current_size = file.metadata()?.len();

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            config,
            current_size,
        })
    }

    /// Append one timestamped line
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        let formatted = format!("[{}] {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S"), line);
        let bytes = formatted.as_bytes();

        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        self.current_size += bytes.len() as u64;

        if self.current_size >= self.config.max_size_bytes {
            self.rotate()?;
        }
        Ok(())
    }

    /// Shift `name.N` to `name.N+1`, dropping anything past `max_files`
    fn rotate(&mut self) -> Result<()> {
        debug!("Rotating log file: {}", self.path.display());
        self.writer.flush()?;

        let oldest = rotated_path(&self.path, self.config.max_files);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for i in (1..self.config.max_files).rev() {
            let from = rotated_path(&self.path, i);
            if from.exists() {
                fs::rename(&from, rotated_path(&self.path, i + 1))?;
            }
        }
        if self.path.exists() {
            fs::rename(&self.path, rotated_path(&self.path, 1))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.current_size = 0;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current_size(&self) -> u64 {
        self.current_size
    }
}

fn rotated_path(base: &Path, index: usize) -> PathBuf {
    let name = base
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "console.log".to_string());
    base.with_file_name(format!("{}.{}", name, index))
}

/// Pumps one child's output into its console log
///
/// stdout and stderr share one file. stderr lines are also raised in the
/// shared sink as warnings tagged with the instance.
pub struct LogCapture {
    instance_id: String,
    writer: Arc<Mutex<LogWriter>>,
    sink: Arc<LogSink>,
}

impl LogCapture {
    pub fn new(instance_id: &str, path: PathBuf, config: RotationConfig, sink: Arc<LogSink>) -> Result<Self> {
        Ok(Self {
            instance_id: instance_id.to_string(),
            writer: Arc::new(Mutex::new(LogWriter::new(path, config)?)),
            sink,
        })
    }

    /// Spawn tasks to capture stdout and stderr
    pub fn spawn_capture(
        self,
        stdout: Option<ChildStdout>,
        stderr: Option<ChildStderr>,
    ) -> (Option<JoinHandle<()>>, Option<JoinHandle<()>>) {
        let stdout_handle = stdout.map(|out| {
            let writer = Arc::clone(&self.writer);
            tokio::spawn(pump(out, writer, None))
        });

        let stderr_handle = stderr.map(|err| {
            let writer = Arc::clone(&self.writer);
            let tag = (self.instance_id.clone(), Arc::clone(&self.sink));
            tokio::spawn(pump(err, writer, Some(tag)))
        });

        (stdout_handle, stderr_handle)
    }
}

async fn pump<R: AsyncRead + Unpin>(
    stream: R,
    writer: Arc<Mutex<LogWriter>>,
    raise: Option<(String, Arc<LogSink>)>,
) {
    let mut lines = BufReader::new(stream).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let written = match raise {
            Some((ref id, ref sink)) => {
                sink.warn(Some(id), line.clone());
                writer.lock().write_line(&format!("[stderr] {}", line))
            }
            None => writer.lock().write_line(&line),
        };
        if let Err(e) = written {
            warn!("Failed to write console log: {}", e);
        }
    }
}

//! forgepm logs: the shared in-memory sink and per-instance console files

mod reader;
mod rotation;
mod sink;
mod writer;

pub use reader::LogReader;
pub use rotation::RotationConfig;
pub use sink::LogSink;
pub use writer::{LogCapture, LogWriter};

use std::path::{Path, PathBuf};

/// Console log path for an instance under `logs_dir`
pub fn console_path(logs_dir: &Path, instance_id: &str) -> PathBuf {
    forgepm_core::console_log_path(logs_dir, instance_id)
}

//! Append-only log file for frpc output.

use crate::error::{Result, TunnelError};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Log file that receives one line per non-blank frpc output line.
///
/// The file is truncated when the sink is opened. Write errors are logged
/// once and later lines are dropped; a broken log never stops a tunnel.
#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
    file: Option<File>,
}

impl LogSink {
    /// Create (or truncate) the log file, creating parent directories.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| TunnelError::io("create log directory", parent, e))?;
        }

        // std opens files with shared read/write on Windows, so other
        // processes can tail the log while frpc runs.
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| TunnelError::io("create log file", &path, e))?;

        debug!("Writing frpc output to {}", path.display());
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `line` followed by a newline.
    pub fn append(&mut self, line: &str) {
        let Some(file) = self.file.as_mut() else {
            return;
        };

        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');

        if let Err(e) = file.write_all(buf.as_bytes()) {
            warn!(
                "Failed to write to log file {}: {}; further output will not be logged",
                self.path.display(),
                e
            );
            self.file = None;
        }
    }

    pub fn is_broken(&self) -> bool {
        self.file.is_none()
    }
}

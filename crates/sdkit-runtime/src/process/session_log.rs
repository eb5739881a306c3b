//! Session log sink with request-scoped shadowing.
//!
//! The supervisor keeps one append-mode session log for the lifetime of a
//! server process. A per-request log file, when installed, shadows the
//! session log for that request's duration; writes always go to exactly
//! one of the two.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::error;

/// Handle shared between the supervisor and its log consumer task.
pub type SharedLogSink = Arc<Mutex<LogSink>>;

/// Destination for backend output lines.
#[derive(Debug, Default)]
pub struct LogSink {
    session: Option<File>,
    current: Option<File>,
}

impl LogSink {
    /// Open the session log in append mode, writing a session header.
    /// Already open is a no-op. Failure is logged, not fatal: generation
    /// works without a session log.
    pub fn open_session(&mut self, path: &Path) {
        if self.session.is_some() {
            return;
        }
        match Self::open_append(path) {
            Ok(mut file) => {
                let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
                let _ = writeln!(file, "\n--- NEW SESSION: {ts} ---");
                self.session = Some(file);
            }
            Err(e) => error!(path = %path.display(), error = %e, "failed to open session log"),
        }
    }

    fn open_append(path: &Path) -> io::Result<File> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().append(true).create(true).open(path)
    }

    /// Close the session log.
    pub fn close_session(&mut self) {
        self.session = None;
    }

    /// Install or clear the request-scoped shadow file.
    pub fn set_current(&mut self, file: Option<File>) {
        self.current = file;
    }

    /// Append a timestamped line to the active target (shadow when
    /// present, session log otherwise). Write errors are swallowed; the
    /// log is best-effort.
    pub fn write_line(&mut self, message: &str, level: &str) {
        let target = self.current.as_mut().or(self.session.as_mut());
        if let Some(file) = target {
            let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
            let _ = writeln!(file, "[{ts}] [{level}] {message}");
            let _ = file.flush();
        }
    }
}

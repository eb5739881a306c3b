//! Settings domain types.
//!
//! All fields are optional to support partial configuration files and
//! graceful defaults; use the `effective_*` accessors for resolved values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default host the backend server binds to.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default port the backend server listens on.
pub const DEFAULT_SERVER_PORT: u16 = 1234;

/// How generations are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Always spawn the backend binary per request.
    CliOnly,
    /// Always go through the HTTP server.
    ServerOnly,
    /// Pick per request based on parameter support.
    #[default]
    Auto,
}

/// Whether sdkit owns the server process or talks to an external one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerProcessMode {
    /// Start and supervise a local server process.
    #[default]
    StartLocal,
    /// Use an already-running (possibly remote) server.
    External,
}

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Settings file exists but could not be read.
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings file is not valid JSON.
    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Path to the backend binary (`sd` / `sd-server`).
    pub executable_path: Option<PathBuf>,

    /// Host the local server binds to (or the external server's host).
    pub server_host: Option<String>,

    /// Port the server listens on.
    pub server_port: Option<u16>,

    /// CLI vs server execution.
    pub execution_mode: Option<ExecutionMode>,

    /// Local supervised server vs external server.
    pub server_process_mode: Option<ServerProcessMode>,

    /// Directory generated images are written to.
    pub output_dir: Option<PathBuf>,

    /// Path to the flag mapping JSON document.
    pub flags_mapping_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from a JSON file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Get the effective server host (with default fallback).
    #[must_use]
    pub fn effective_server_host(&self) -> &str {
        self.server_host.as_deref().unwrap_or(DEFAULT_SERVER_HOST)
    }

    /// Get the effective server port (with default fallback).
    #[must_use]
    pub fn effective_server_port(&self) -> u16 {
        self.server_port.unwrap_or(DEFAULT_SERVER_PORT)
    }

    /// Get the effective execution mode.
    #[must_use]
    pub fn effective_execution_mode(&self) -> ExecutionMode {
        self.execution_mode.unwrap_or_default()
    }

    /// Get the effective server process mode.
    #[must_use]
    pub fn effective_server_process_mode(&self) -> ServerProcessMode {
        self.server_process_mode.unwrap_or_default()
    }

    /// Base URL of the backend server implied by the current host/port.
    #[must_use]
    pub fn server_base_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.effective_server_host(),
            self.effective_server_port()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_resolve() {
        let s = Settings::default();
        assert_eq!(s.effective_server_host(), "127.0.0.1");
        assert_eq!(s.effective_server_port(), 1234);
        assert_eq!(s.effective_execution_mode(), ExecutionMode::Auto);
        assert_eq!(
            s.effective_server_process_mode(),
            ServerProcessMode::StartLocal
        );
        assert_eq!(s.server_base_url(), "http://127.0.0.1:1234");
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(s, Settings::default());
    }

    #[test]
    fn load_parses_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"{{"server_port": 7777, "execution_mode": "server_only"}}"#
        )
        .unwrap();

        let s = Settings::load(&path).unwrap();
        assert_eq!(s.effective_server_port(), 7777);
        assert_eq!(s.effective_execution_mode(), ExecutionMode::ServerOnly);
        // Untouched fields keep defaults
        assert_eq!(s.effective_server_host(), "127.0.0.1");
    }

    #[test]
    fn load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(SettingsError::Parse { .. })
        ));
    }
}

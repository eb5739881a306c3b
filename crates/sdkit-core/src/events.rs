//! Canonical event union published on the bus.
//!
//! Every adapter (terminal printer, GUI bridge, tests) consumes the same
//! discriminated union; executors and the supervisor publish it through
//! one shared router so feedback is identical across transports.
//!
//! # Wire Format
//!
//! Events serialize with a `type` tag:
//!
//! ```json
//! { "type": "log_message", "text": "Server Online.", "level": "success" }
//! ```

use serde::{Deserialize, Serialize};

/// Severity attached to a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
    /// Unclassified backend output, shown verbatim.
    Raw,
}

/// Event types for all adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    /// A classified backend log line (or an sdkit status message).
    LogMessage {
        text: String,
        level: LogLevel,
        /// Present when the line carried the generation seed.
        #[serde(skip_serializing_if = "Option::is_none")]
        seed: Option<String>,
    },

    /// Sampling/batch progress extracted from backend output.
    ExecutionProgress { current: u64, total: u64 },

    /// Supervised server went online or offline.
    ServerStatus { online: bool },
}

impl BusEvent {
    /// Shorthand for a seedless log message.
    #[must_use]
    pub fn log(text: impl Into<String>, level: LogLevel) -> Self {
        Self::LogMessage {
            text: text.into(),
            level,
            seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_message_serialization() {
        let event = BusEvent::log("Server Online.", LogLevel::Success);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"log_message\""));
        assert!(json.contains("\"level\":\"success\""));
        assert!(!json.contains("seed"));
    }

    #[test]
    fn progress_serialization() {
        let event = BusEvent::ExecutionProgress {
            current: 3,
            total: 10,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"execution_progress\""));
        assert!(json.contains("\"current\":3"));
    }
}

//! Generation request and result types.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A single command-line parameter for the backend.
///
/// `value: None` means a boolean flag that takes no argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestParam {
    /// Flag as the backend expects it, e.g. `--steps`.
    pub flag: String,
    /// Optional flag value.
    pub value: Option<String>,
}

impl RequestParam {
    /// Create a flag with a value.
    pub fn new(flag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            flag: flag.into(),
            value: Some(value.into()),
        }
    }

    /// Create a boolean flag.
    pub fn switch(flag: impl Into<String>) -> Self {
        Self {
            flag: flag.into(),
            value: None,
        }
    }
}

/// One image-generation request. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Path to the model checkpoint.
    pub model_path: PathBuf,
    /// Positive prompt text.
    pub prompt: String,
    /// Ordered backend parameters.
    pub params: Vec<RequestParam>,
    /// Where the generated image is written.
    pub output_path: PathBuf,
    /// Optional per-request raw log file.
    pub log_file_path: Option<PathBuf>,
}

/// Outcome of one generation, delivered exactly once via the finish
/// callback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Files produced by the backend.
    pub files: Vec<PathBuf>,
    /// Realized seed, when the backend reported one.
    pub seed: Option<String>,
    /// Elapsed-time text, e.g. `"12.41s"`.
    pub generation_time: Option<String>,
    /// Failure description, `None` on success.
    pub error: Option<String>,
    /// Echo of the executed command or request.
    pub command: Option<String>,
}

impl GenerationResult {
    /// A failure result carrying only an error message.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_param_has_no_value() {
        let p = RequestParam::switch("--vae-tiling");
        assert_eq!(p.flag, "--vae-tiling");
        assert!(p.value.is_none());
    }

    #[test]
    fn failure_result_carries_message() {
        let r = GenerationResult::failure("boom");
        assert_eq!(r.error.as_deref(), Some("boom"));
        assert!(r.files.is_empty());
        assert!(r.seed.is_none());
    }
}

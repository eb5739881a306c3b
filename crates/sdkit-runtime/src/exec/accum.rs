//! Result accumulation from routed log events.

use sdkit_core::GenerationResult;

use crate::logs::LogEvent;

/// Folds classified log events into the eventual [`GenerationResult`].
///
/// Shared by both executors so a given backend output yields the same
/// result regardless of transport.
#[derive(Debug, Default)]
pub(crate) struct ResultAccumulator {
    result: GenerationResult,
    /// Timing lines seen so far; the last one wins.
    times: Vec<String>,
}

impl ResultAccumulator {
    pub fn new(command: Option<String>) -> Self {
        Self {
            result: GenerationResult {
                command,
                ..GenerationResult::default()
            },
            times: Vec::new(),
        }
    }

    pub fn apply(&mut self, event: &LogEvent) {
        match event {
            LogEvent::FileSaved { path, .. } => self.result.files.push(path.into()),
            LogEvent::Seed { seed, .. } => self.result.seed = Some(seed.clone()),
            LogEvent::Error { message, .. } => self.result.error = Some(message.clone()),
            LogEvent::Success { raw } => self.times.push(raw.clone()),
            _ => {}
        }
    }

    pub fn finish(mut self) -> GenerationResult {
        if let Some(last) = self.times.pop() {
            self.result.generation_time = Some(last);
        }
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::classify;
    use std::path::PathBuf;

    #[test]
    fn accumulates_files_seed_and_timing() {
        let mut acc = ResultAccumulator::new(Some("sd -m x".to_string()));
        for line in [
            "[INFO ] loading model",
            "seed 42",
            "save result image to 'out.png'",
            "txt2img completed in 10.1s",
            "decode_first_stage completed, taking 1.2s",
        ] {
            acc.apply(&classify(line));
        }

        let result = acc.finish();
        assert_eq!(result.files, vec![PathBuf::from("out.png")]);
        assert_eq!(result.seed.as_deref(), Some("42"));
        // Latest timing line wins
        assert_eq!(
            result.generation_time.as_deref(),
            Some("decode_first_stage completed, taking 1.2s")
        );
        assert!(result.error.is_none());
        assert_eq!(result.command.as_deref(), Some("sd -m x"));
    }

    #[test]
    fn error_lines_set_error() {
        let mut acc = ResultAccumulator::new(None);
        acc.apply(&classify("[ERROR] tensor shape mismatch"));
        let result = acc.finish();
        assert_eq!(result.error.as_deref(), Some("tensor shape mismatch"));
        assert!(result.generation_time.is_none());
    }
}

//! HTTP streaming executor.
//!
//! Drives a supervised (or externally managed) server over its OpenAI-style
//! images API. The response body is a line stream: progress and log lines
//! first, then one terminal JSON object carrying the base64 image.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::TryStreamExt;
use reqwest::multipart;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use sdkit_core::{
    BusEvent, FinishCallback, FlagMap, GenerationRequest, GenerationResult, Generator, LogLevel,
    ServerProcessMode, Settings,
};

use super::accum::ResultAccumulator;
use super::payload::{build_payload, partition_params, value_text, Partitioned};
use crate::logs::LogRouter;
use crate::process::ProcessSupervisor;

const EXTERNAL_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// How a response stream ended.
enum StreamOutcome {
    /// The terminal JSON object (contains the image data).
    Terminal(String),
    /// Stream closed without a terminal object.
    Exhausted,
    /// The stop flag was raised mid-stream.
    Stopped,
}

/// Sends generation requests to the backend server and streams results.
pub struct ServerGenerator {
    settings: Settings,
    mapping: FlagMap,
    supervisor: Arc<ProcessSupervisor>,
    router: LogRouter,
    stop_flag: Arc<AtomicBool>,
    client: reqwest::Client,
}

impl ServerGenerator {
    #[must_use]
    pub fn new(
        settings: Settings,
        mapping: FlagMap,
        supervisor: Arc<ProcessSupervisor>,
        router: LogRouter,
    ) -> Self {
        Self {
            settings,
            mapping,
            supervisor,
            router,
            stop_flag: Arc::new(AtomicBool::new(false)),
            // No default timeout: generations stream for minutes
            client: reqwest::Client::new(),
        }
    }

    async fn prepare_server(&self, split: &Partitioned) -> Result<String, String> {
        match self.settings.effective_server_process_mode() {
            ServerProcessMode::StartLocal => {
                let executable = self
                    .settings
                    .executable_path
                    .as_deref()
                    .filter(|p| p.exists())
                    .ok_or_else(|| "Server executable not found.".to_string())?;
                self.supervisor
                    .ensure_running(
                        executable,
                        &split.startup_args,
                        self.settings.effective_server_host(),
                        self.settings.effective_server_port(),
                    )
                    .await
                    .map_err(|err| format!("Failed starting server process: {err}"))?;
                Ok(self.supervisor.base_url().await)
            }
            ServerProcessMode::External => {
                let base = self.settings.server_base_url();
                self.client
                    .get(format!("{base}/v1/models"))
                    .timeout(EXTERNAL_PROBE_TIMEOUT)
                    .send()
                    .await
                    .map_err(|_| "External server unreachable.".to_string())?;
                Ok(base)
            }
        }
    }

    fn open_request_log(&self, request: &GenerationRequest) {
        let Some(path) = request.log_file_path.as_ref() else {
            return;
        };
        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!(path = %parent.display(), %err, "failed to create log directory");
            }
        }
        match fs::File::create(path) {
            Ok(mut file) => {
                let _ = writeln!(file, "CMD: API request\n{}", "=".repeat(60));
                self.supervisor.set_current_log_file(Some(file));
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to open request log");
                self.router.bus().publish(BusEvent::log(
                    "Error opening local log file.",
                    LogLevel::Error,
                ));
            }
        }
    }

    async fn send_request(
        &self,
        base_url: &str,
        payload: serde_json::Map<String, Value>,
        init_image: Option<&Path>,
    ) -> Result<reqwest::Response, String> {
        let response = match init_image {
            Some(init) => {
                let bytes = tokio::fs::read(init)
                    .await
                    .map_err(|err| format!("Output Processing Error: {err}"))?;
                let file_name = init
                    .file_name()
                    .map_or_else(|| "init.png".to_string(), |n| n.to_string_lossy().into_owned());
                let part = multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("image/png")
                    .map_err(|err| format!("Stream Error: {err}"))?;
                let mut form = multipart::Form::new().part("image[]", part);
                for (key, value) in &payload {
                    form = form.text(key.clone(), value_text(value));
                }
                self.client
                    .post(format!("{base_url}/v1/images/edits"))
                    .multipart(form)
                    .send()
                    .await
            }
            None => {
                self.client
                    .post(format!("{base_url}/v1/images/generations"))
                    .json(&Value::Object(payload))
                    .send()
                    .await
            }
        };
        let response = response.map_err(|err| format!("Stream Error: {err}"))?;
        if !response.status().is_success() {
            return Err(format!("Server Error {}", response.status().as_u16()));
        }
        Ok(response)
    }

    /// Consume the response line stream, routing log lines until the
    /// terminal JSON object (or end of stream, or a stop request).
    async fn scan_stream(
        &self,
        reader: impl AsyncBufRead + Unpin,
        acc: &mut ResultAccumulator,
    ) -> std::io::Result<StreamOutcome> {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if self.stop_flag.load(Ordering::SeqCst) {
                return Ok(StreamOutcome::Stopped);
            }
            let trimmed = line.trim();
            if trimmed.starts_with('{') && trimmed.contains("\"data\"") {
                return Ok(StreamOutcome::Terminal(trimmed.to_string()));
            }
            acc.apply(&self.router.handle_line(&line));
        }
        Ok(StreamOutcome::Exhausted)
    }

    fn decode_terminal(line: &str, output_path: &Path) -> Result<Vec<u8>, String> {
        let value: Value =
            serde_json::from_str(line).map_err(|err| format!("Output Processing Error: {err}"))?;
        let b64 = value["data"][0]["b64_json"]
            .as_str()
            .ok_or_else(|| "No image data received from server".to_string())?;
        let bytes = BASE64
            .decode(b64)
            .map_err(|err| format!("Output Processing Error: {err}"))?;
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| format!("Output Processing Error: {err}"))?;
        }
        Ok(bytes)
    }

    fn finish_with_error(&self, message: String, on_finish: FinishCallback) {
        self.router
            .bus()
            .publish(BusEvent::log(format!("Error: {message}"), LogLevel::Error));
        self.supervisor.set_current_log_file(None);
        on_finish(false, GenerationResult::failure(message));
    }

    async fn run_inner(&self, request: &GenerationRequest) -> Result<GenerationResult, String> {
        let split = partition_params(&request.model_path, &request.params, &self.mapping);
        let base_url = self.prepare_server(&split).await?;

        self.router.bus().publish(BusEvent::log(
            format!("Sending request to {base_url}..."),
            LogLevel::Info,
        ));
        self.open_request_log(request);

        let (payload, seed) = build_payload(&request.prompt, &split.api_params, &self.mapping);
        debug!(%base_url, seed, edit = split.init_image.is_some(), "dispatching generation");

        let started = Instant::now();
        let response = self
            .send_request(&base_url, payload, split.init_image.as_deref())
            .await?;

        let reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        let mut acc = ResultAccumulator::new(Some(format!("API (Seed: {seed})")));
        let outcome = self
            .scan_stream(reader, &mut acc)
            .await
            .map_err(|err| format!("Stream Error: {err}"))?;

        let terminal = match outcome {
            StreamOutcome::Terminal(line) => line,
            StreamOutcome::Exhausted => {
                return Err("No image data received from server".to_string())
            }
            StreamOutcome::Stopped => return Err("Stopped".to_string()),
        };

        let bytes = Self::decode_terminal(&terminal, &request.output_path)?;
        tokio::fs::write(&request.output_path, bytes)
            .await
            .map_err(|err| format!("Output Processing Error: {err}"))?;

        self.router.bus().publish(BusEvent::log(
            format!("Image saved: {}", request.output_path.display()),
            LogLevel::Success,
        ));

        let mut result = acc.finish();
        result.files = vec![request.output_path.clone()];
        result.seed = Some(seed.to_string());
        result.generation_time = Some(format!("{:.2}s", started.elapsed().as_secs_f64()));
        Ok(result)
    }
}

#[async_trait]
impl Generator for ServerGenerator {
    async fn run(&self, request: GenerationRequest, on_finish: FinishCallback) {
        self.stop_flag.store(false, Ordering::SeqCst);
        match self.run_inner(&request).await {
            Ok(result) => {
                self.supervisor.set_current_log_file(None);
                on_finish(true, result);
            }
            Err(message) => self.finish_with_error(message, on_finish),
        }
    }

    /// Abandons the stream; the server process itself is left to the
    /// supervisor.
    fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::LogRouter;
    use sdkit_core::EventBus;

    fn make_generator() -> ServerGenerator {
        let router = LogRouter::new(EventBus::new());
        let supervisor = Arc::new(ProcessSupervisor::new(
            router.clone(),
            PathBuf::from("/tmp/session.log"),
        ));
        ServerGenerator::new(Settings::default(), FlagMap::default(), supervisor, router)
    }

    #[tokio::test]
    async fn scan_stream_finds_terminal_object() {
        let generator = make_generator();
        let body = b"seed 42\n|====| 3/10\n{\"created\": 1, \"data\": [{\"b64_json\": \"aGk=\"}]}\n";
        let mut acc = ResultAccumulator::new(None);
        let outcome = generator.scan_stream(&body[..], &mut acc).await.unwrap();
        let StreamOutcome::Terminal(line) = outcome else {
            panic!("expected terminal outcome");
        };
        assert!(line.contains("b64_json"));
        assert_eq!(acc.finish().seed.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn scan_stream_without_terminal_is_exhausted() {
        let generator = make_generator();
        let body = b"loading model\nsampling\n";
        let mut acc = ResultAccumulator::new(None);
        assert!(matches!(
            generator.scan_stream(&body[..], &mut acc).await.unwrap(),
            StreamOutcome::Exhausted
        ));
    }

    #[tokio::test]
    async fn scan_stream_honors_stop_flag() {
        let generator = make_generator();
        generator.stop_flag.store(true, Ordering::SeqCst);
        let body = b"line one\nline two\n";
        let mut acc = ResultAccumulator::new(None);
        assert!(matches!(
            generator.scan_stream(&body[..], &mut acc).await.unwrap(),
            StreamOutcome::Stopped
        ));
    }

    #[test]
    fn decode_terminal_extracts_image_bytes() {
        let line = r#"{"data": [{"b64_json": "aGVsbG8="}]}"#;
        let bytes = ServerGenerator::decode_terminal(line, Path::new("/tmp/out.png")).unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn decode_terminal_without_data_reports_missing_image() {
        let line = r#"{"data": []}"#;
        let err = ServerGenerator::decode_terminal(line, Path::new("/tmp/out.png")).unwrap_err();
        assert_eq!(err, "No image data received from server");
    }

    #[test]
    fn decode_terminal_rejects_bad_base64() {
        let line = r#"{"data": [{"b64_json": "!!!"}]}"#;
        let err = ServerGenerator::decode_terminal(line, Path::new("/tmp/out.png")).unwrap_err();
        assert!(err.starts_with("Output Processing Error:"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_executable_fails_fast() {
        let router = LogRouter::new(EventBus::new());
        let supervisor = Arc::new(ProcessSupervisor::new(
            router.clone(),
            PathBuf::from("/tmp/session.log"),
        ));
        let settings = Settings {
            executable_path: Some(PathBuf::from("/nonexistent/sd-server")),
            ..Settings::default()
        };
        let generator = ServerGenerator::new(settings, FlagMap::default(), supervisor, router);

        let request = GenerationRequest {
            model_path: PathBuf::from("/m.gguf"),
            prompt: "x".to_string(),
            params: Vec::new(),
            output_path: PathBuf::from("/tmp/out.png"),
            log_file_path: None,
        };
        let (tx, rx) = tokio::sync::oneshot::channel();
        generator.run(
            request,
            Box::new(move |ok, result| {
                let _ = tx.send((ok, result));
            }),
        )
        .await;
        let (ok, result) = rx.await.unwrap();
        assert!(!ok);
        assert_eq!(result.error.as_deref(), Some("Server executable not found."));
    }
}

//! One-shot subprocess executor.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use sdkit_core::{
    BusEvent, FinishCallback, GenerationRequest, GenerationResult, Generator, LogLevel,
};

use super::accum::ResultAccumulator;
use crate::logs::{strip_ansi, LogRouter};
use crate::process::{spawn_line_reader, terminate_pid};

const LINE_CHANNEL_CAPACITY: usize = 256;

/// Runs the backend binary once per request and streams its merged
/// output through the log router.
pub struct CliGenerator {
    executable: PathBuf,
    router: LogRouter,
    stop_flag: Arc<AtomicBool>,
    child_pid: Arc<Mutex<Option<u32>>>,
}

impl CliGenerator {
    #[must_use]
    pub fn new(executable: PathBuf, router: LogRouter) -> Self {
        Self {
            executable,
            router,
            stop_flag: Arc::new(AtomicBool::new(false)),
            child_pid: Arc::new(Mutex::new(None)),
        }
    }

    fn build_args(request: &GenerationRequest) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            request.model_path.display().to_string(),
            "-p".to_string(),
            request.prompt.clone(),
            "-o".to_string(),
            request.output_path.display().to_string(),
        ];
        for p in &request.params {
            args.push(p.flag.clone());
            if let Some(value) = p.value.as_deref() {
                let value = value.trim();
                if !value.is_empty() {
                    args.push(value.to_string());
                }
            }
        }
        args
    }

    fn render_command(&self, args: &[String]) -> String {
        let mut parts = vec![self.executable.display().to_string()];
        parts.extend(args.iter().map(|a| {
            if a.contains(char::is_whitespace) {
                format!("\"{a}\"")
            } else {
                a.clone()
            }
        }));
        parts.join(" ")
    }

    fn set_pid(&self, pid: Option<u32>) {
        if let Ok(mut guard) = self.child_pid.lock() {
            *guard = pid;
        }
    }

    fn open_request_log(&self, request: &GenerationRequest, command: &str) -> Option<fs::File> {
        let path = request.log_file_path.as_ref()?;
        if let Some(parent) = path.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!(path = %parent.display(), %err, "failed to create log directory");
            }
        }
        match fs::File::create(path) {
            Ok(mut file) => {
                if let Err(err) = writeln!(file, "CMD: {command}\n{}", "=".repeat(60)) {
                    warn!(%err, "failed to write log header");
                }
                Some(file)
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "failed to open request log");
                self.router.bus().publish(BusEvent::log(
                    "Error opening local log file.",
                    LogLevel::Error,
                ));
                None
            }
        }
    }
}

#[async_trait]
impl Generator for CliGenerator {
    async fn run(&self, request: GenerationRequest, on_finish: FinishCallback) {
        self.stop_flag.store(false, Ordering::SeqCst);

        let args = Self::build_args(&request);
        let command_line = self.render_command(&args);
        debug!(command = %command_line, "spawning one-shot generation");

        let mut child = match Command::new(&self.executable)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                let message = format!("FATAL ERROR: {err}");
                self.router
                    .bus()
                    .publish(BusEvent::log(&message, LogLevel::Error));
                on_finish(false, GenerationResult::failure(message));
                return;
            }
        };
        self.set_pid(child.id());

        let (tx, mut rx) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, "stdout", tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, "stderr", tx.clone());
        }
        drop(tx);

        let mut log_file = self.open_request_log(&request, &command_line);
        let mut acc = ResultAccumulator::new(Some(command_line));

        while let Some(line) = rx.recv().await {
            if self.stop_flag.load(Ordering::SeqCst) {
                if let Err(err) = child.start_kill() {
                    debug!(%err, "kill on stop failed");
                }
                break;
            }
            let clean = strip_ansi(&line);
            if let Some(file) = log_file.as_mut() {
                let _ = writeln!(file, "{clean}");
            }
            acc.apply(&self.router.handle_line(&clean));
        }

        let status = child.wait().await;
        self.set_pid(None);

        let stopped = self.stop_flag.load(Ordering::SeqCst);
        let exited_ok = status.as_ref().map_or(false, |s| s.success());
        let success = exited_ok && !stopped;

        let mut result = acc.finish();
        if !success && result.error.is_none() {
            result.error = Some(if stopped {
                "Stopped".to_string()
            } else {
                match status {
                    Ok(status) => format!("Process exited with {status}"),
                    Err(err) => format!("FATAL ERROR: {err}"),
                }
            });
        }
        on_finish(success, result);
    }

    fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let pid = self.child_pid.lock().ok().and_then(|guard| *guard);
        if let Some(pid) = pid {
            terminate_pid(pid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdkit_core::EventBus;
    use std::path::Path;

    fn request() -> GenerationRequest {
        GenerationRequest {
            model_path: PathBuf::from("/models/sd.gguf"),
            prompt: "a red fox".to_string(),
            params: vec![
                sdkit_core::RequestParam::new("--steps", "20"),
                sdkit_core::RequestParam::switch("--verbose"),
            ],
            output_path: PathBuf::from("/tmp/out.png"),
            log_file_path: None,
        }
    }

    #[test]
    fn args_lead_with_model_prompt_output() {
        let args = CliGenerator::build_args(&request());
        assert_eq!(
            args,
            vec![
                "-m",
                "/models/sd.gguf",
                "-p",
                "a red fox",
                "-o",
                "/tmp/out.png",
                "--steps",
                "20",
                "--verbose",
            ]
        );
    }

    #[test]
    fn command_line_quotes_whitespace() {
        let generator = CliGenerator::new(
            PathBuf::from("/opt/sd"),
            LogRouter::new(EventBus::new()),
        );
        let rendered = generator.render_command(&CliGenerator::build_args(&request()));
        assert!(rendered.starts_with("/opt/sd -m /models/sd.gguf -p \"a red fox\""));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_executable_reports_fatal_error() {
        let generator = CliGenerator::new(
            PathBuf::from("/nonexistent/sd-binary"),
            LogRouter::new(EventBus::new()),
        );
        let (tx, rx) = tokio::sync::oneshot::channel();
        generator.run(
            request(),
            Box::new(move |ok, result| {
                let _ = tx.send((ok, result));
            }),
        )
        .await;
        let (ok, result) = rx.await.unwrap();
        assert!(!ok);
        assert!(result.error.unwrap().starts_with("FATAL ERROR:"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_run_collects_results() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-sd.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\necho \"seed 42\"\necho \"save result image to 'out.png'\"\n",
        )
        .unwrap();
        make_executable(&script);

        let log_path = dir.path().join("logs/run.log");
        let mut req = request();
        req.log_file_path = Some(log_path.clone());

        let generator = CliGenerator::new(script, LogRouter::new(EventBus::new()));
        let (tx, rx) = tokio::sync::oneshot::channel();
        generator.run(
            req,
            Box::new(move |ok, result| {
                let _ = tx.send((ok, result));
            }),
        )
        .await;

        let (ok, result) = rx.await.unwrap();
        assert!(ok);
        assert_eq!(result.seed.as_deref(), Some("42"));
        assert_eq!(result.files, vec![PathBuf::from("out.png")]);

        let log = std::fs::read_to_string(log_path).unwrap();
        assert!(log.starts_with("CMD: "));
        assert!(log.contains("seed 42"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_fails_with_status_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fail.sh");
        std::fs::write(&script, "#!/bin/sh\necho starting\nexit 3\n").unwrap();
        make_executable(&script);

        let generator = CliGenerator::new(script, LogRouter::new(EventBus::new()));
        let (tx, rx) = tokio::sync::oneshot::channel();
        generator.run(
            request(),
            Box::new(move |ok, result| {
                let _ = tx.send((ok, result));
            }),
        )
        .await;

        let (ok, result) = rx.await.unwrap();
        assert!(!ok);
        assert!(result.error.unwrap().contains("exited"));
    }

    #[cfg(unix)]
    fn make_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).unwrap();
    }
}

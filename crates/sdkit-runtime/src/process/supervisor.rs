//! Lifecycle supervision for the local sd-server process.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use sdkit_core::{BusEvent, LogLevel};

use super::health::{check_health, wait_for_port_release};
use super::session_log::{LogSink, SharedLogSink};
use super::shutdown::shutdown_child;
use super::stream::spawn_line_reader;
use crate::logs::{strip_ansi, LogRouter};

/// Errors that can occur while starting the backend server.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The target port never freed up; nothing was started.
    #[error("port {port} is already in use")]
    PortInUse { port: u16 },

    /// The OS refused to spawn the server binary.
    #[error("failed to spawn server process: {0}")]
    Spawn(#[from] std::io::Error),

    /// The server exited before its health endpoint came up.
    #[error("server process exited during startup")]
    ExitedDuringStartup,

    /// The health probe never succeeded within the startup window.
    #[error("server did not become healthy within {0:?}")]
    HealthTimeout(Duration),
}

/// Bounded waits used on the start path. Tests shrink these.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorTimeouts {
    /// How long to wait for the target port to free up.
    pub port_wait: Duration,
    /// How long to poll the health endpoint after spawn.
    pub health_wait: Duration,
    /// Health poll interval.
    pub poll_interval: Duration,
}

impl Default for SupervisorTimeouts {
    fn default() -> Self {
        Self {
            port_wait: Duration::from_secs(5),
            health_wait: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Default)]
struct SupervisorState {
    child: Option<Child>,
    host: String,
    port: u16,
    /// Normalized (sorted) startup args of the running process. Empty
    /// when nothing is running.
    signature: Vec<String>,
    /// Log consumer task; sole writer to the session log.
    log_consumer: Option<JoinHandle<()>>,
}

/// Supervises the single local sd-server process.
///
/// Construct one instance at the composition root and share it via
/// `Arc`; "one backend process per application" is enforced by single
/// construction. All mutating operations serialize on one async mutex.
/// The health probe itself never takes that lock.
pub struct ProcessSupervisor {
    state: Mutex<SupervisorState>,
    sink: SharedLogSink,
    router: LogRouter,
    client: reqwest::Client,
    session_log_path: PathBuf,
    timeouts: SupervisorTimeouts,
}

impl ProcessSupervisor {
    /// Create a supervisor writing its session log to `session_log_path`.
    #[must_use]
    pub fn new(router: LogRouter, session_log_path: PathBuf) -> Self {
        Self::with_timeouts(router, session_log_path, SupervisorTimeouts::default())
    }

    /// Create a supervisor with custom start-path timeouts.
    #[must_use]
    pub fn with_timeouts(
        router: LogRouter,
        session_log_path: PathBuf,
        timeouts: SupervisorTimeouts,
    ) -> Self {
        Self {
            state: Mutex::new(SupervisorState {
                host: sdkit_core::DEFAULT_SERVER_HOST.to_string(),
                port: sdkit_core::DEFAULT_SERVER_PORT,
                ..SupervisorState::default()
            }),
            sink: Arc::new(StdMutex::new(LogSink::default())),
            router,
            client: reqwest::Client::new(),
            session_log_path,
            timeouts,
        }
    }

    /// True iff a process handle exists and the OS reports it alive.
    pub async fn is_running(&self) -> bool {
        let mut state = self.state.lock().await;
        Self::child_alive(&mut state)
    }

    /// Base URL of the supervised (or last configured) server.
    pub async fn base_url(&self) -> String {
        let state = self.state.lock().await;
        format!("http://{}:{}", state.host, state.port)
    }

    /// Install or clear a request-scoped log file shadowing the session
    /// log for one request's duration.
    pub fn set_current_log_file(&self, file: Option<File>) {
        if let Ok(mut sink) = self.sink.lock() {
            sink.set_current(file);
        }
    }

    /// Route one backend output line (shared with the server executor,
    /// which streams lines over HTTP instead of a pipe).
    pub fn process_line(&self, line: &str) {
        self.router.handle_line(line);
    }

    /// Make sure a server with exactly this configuration is up.
    ///
    /// A healthy process with unchanged (host, port, sorted args) is a
    /// no-op. Config drift or a failed health probe stops the old process
    /// first, then starts fresh.
    pub async fn ensure_running(
        &self,
        executable: &Path,
        startup_args: &[String],
        host: &str,
        port: u16,
    ) -> Result<(), SupervisorError> {
        let signature = normalize_signature(startup_args);
        let mut state = self.state.lock().await;

        if Self::child_alive(&mut state) {
            let unchanged =
                state.signature == signature && state.host == host && state.port == port;
            if unchanged {
                let url = format!("http://{host}:{port}");
                if check_health(&self.client, &url).await {
                    debug!(%host, %port, "server already running with matching config");
                    return Ok(());
                }
                // Unresponsive process with the right config is replaced
                self.stop_locked(&mut state).await;
            } else {
                info!(%host, %port, "server config changed, restarting");
                self.stop_locked(&mut state).await;
            }
        }

        self.start_locked(&mut state, executable, startup_args, signature, host, port)
            .await
    }

    /// Stop the supervised process. Idempotent; a no-op when idle.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state).await;
    }

    fn child_alive(state: &mut SupervisorState) -> bool {
        match state.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn start_locked(
        &self,
        state: &mut SupervisorState,
        executable: &Path,
        startup_args: &[String],
        signature: Vec<String>,
        host: &str,
        port: u16,
    ) -> Result<(), SupervisorError> {
        if !wait_for_port_release(host, port, self.timeouts.port_wait).await {
            self.router.bus().publish(BusEvent::log(
                format!("Port {port} in use."),
                LogLevel::Error,
            ));
            return Err(SupervisorError::PortInUse { port });
        }

        state.host = host.to_string();
        state.port = port;
        if let Ok(mut sink) = self.sink.lock() {
            sink.open_session(&self.session_log_path);
        }

        let mut cmd = Command::new(executable);
        cmd.arg("--listen-ip")
            .arg(host)
            .arg("--listen-port")
            .arg(port.to_string())
            .args(startup_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.stop_locked(state).await;
                return Err(SupervisorError::Spawn(e));
            }
        };

        debug!(pid = ?child.id(), %host, %port, "spawned sd-server");

        let (tx, rx) = mpsc::channel(256);
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, "stdout", tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, "stderr", tx);
        }
        state.log_consumer = Some(self.spawn_log_consumer(rx));
        state.child = Some(child);
        state.signature = signature;

        match self.wait_for_health(state, host, port).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.stop_locked(state).await;
                Err(e)
            }
        }
    }

    /// Consumes merged stdout/stderr lines in production order; the sole
    /// writer to the session log.
    fn spawn_log_consumer(&self, mut rx: mpsc::Receiver<String>) -> JoinHandle<()> {
        let sink = Arc::clone(&self.sink);
        let router = self.router.clone();
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                let clean = strip_ansi(&line);
                let clean = clean.trim();
                if clean.is_empty() {
                    continue;
                }
                if let Ok(mut sink) = sink.lock() {
                    sink.write_line(clean, "INFO");
                }
                router.handle_line(clean);
            }
            debug!("server log consumer exiting");
        })
    }

    async fn wait_for_health(
        &self,
        state: &mut SupervisorState,
        host: &str,
        port: u16,
    ) -> Result<(), SupervisorError> {
        let url = format!("http://{host}:{port}");
        let deadline = Instant::now() + self.timeouts.health_wait;

        while Instant::now() < deadline {
            if check_health(&self.client, &url).await {
                info!(%url, "server is ready");
                self.router
                    .bus()
                    .publish(BusEvent::log("Server Online.", LogLevel::Success));
                self.router.bus().publish(BusEvent::ServerStatus { online: true });
                return Ok(());
            }
            if !Self::child_alive(state) {
                warn!(%url, "server exited before becoming healthy");
                return Err(SupervisorError::ExitedDuringStartup);
            }
            sleep(self.timeouts.poll_interval).await;
        }

        Err(SupervisorError::HealthTimeout(self.timeouts.health_wait))
    }

    async fn stop_locked(&self, state: &mut SupervisorState) {
        if let Some(child) = state.child.take() {
            debug!(pid = ?child.id(), "stopping sd-server");
            if let Err(e) = shutdown_child(child).await {
                warn!(error = %e, "failed to shut down server cleanly");
            }
            self.router.bus().publish(BusEvent::ServerStatus { online: false });
        }

        // Readers hit EOF once the process is gone; give the consumer a
        // bounded window to drain.
        if let Some(consumer) = state.log_consumer.take() {
            if timeout(Duration::from_secs(1), consumer).await.is_err() {
                debug!("log consumer did not drain in time");
            }
        }

        state.signature.clear();
        if let Ok(mut sink) = self.sink.lock() {
            sink.close_session();
        }
    }
}

fn normalize_signature(args: &[String]) -> Vec<String> {
    let mut signature = args.to_vec();
    signature.sort();
    signature
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdkit_core::EventBus;

    fn test_supervisor(dir: &Path) -> ProcessSupervisor {
        let router = LogRouter::new(EventBus::new());
        ProcessSupervisor::with_timeouts(
            router,
            dir.join("server_session.log"),
            SupervisorTimeouts {
                port_wait: Duration::from_millis(200),
                health_wait: Duration::from_millis(600),
                poll_interval: Duration::from_millis(100),
            },
        )
    }

    #[test]
    fn signature_is_order_insensitive() {
        let a = normalize_signature(&["--model".into(), "x.gguf".into(), "--vae".into()]);
        let b = normalize_signature(&["--vae".into(), "--model".into(), "x.gguf".into()]);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn idle_supervisor_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let sup = test_supervisor(dir.path());
        assert!(!sup.is_running().await);
        assert_eq!(sup.base_url().await, "http://127.0.0.1:1234");
    }

    #[tokio::test]
    async fn stop_is_idempotent_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let sup = test_supervisor(dir.path());
        sup.stop().await;
        sup.stop().await;
        assert!(!sup.is_running().await);
    }

    #[tokio::test]
    async fn missing_executable_reports_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let sup = test_supervisor(dir.path());
        let result = sup
            .ensure_running(
                Path::new("/nonexistent/sd-server"),
                &[],
                "127.0.0.1",
                free_port(),
            )
            .await;
        assert!(matches!(result, Err(SupervisorError::Spawn(_))));
        assert!(!sup.is_running().await);
    }

    #[tokio::test]
    async fn occupied_port_aborts_with_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let sup = test_supervisor(dir.path());

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = sup
            .ensure_running(Path::new("/nonexistent/sd-server"), &[], "127.0.0.1", port)
            .await;
        assert!(matches!(result, Err(SupervisorError::PortInUse { .. })));
        assert!(!sup.is_running().await);
        // Session log untouched: the port check aborts before any spawn
        assert!(!dir.path().join("server_session.log").exists());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn unhealthy_process_is_cleaned_up() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-server.sh");
        // Never serves HTTP; the health wait must give up and clean up
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let sup = test_supervisor(dir.path());
        let result = sup
            .ensure_running(&script, &[], "127.0.0.1", free_port())
            .await;
        assert!(matches!(result, Err(SupervisorError::HealthTimeout(_))));
        assert!(!sup.is_running().await);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn early_exit_is_detected_during_startup() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-server.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 1\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let sup = test_supervisor(dir.path());
        let result = sup
            .ensure_running(&script, &[], "127.0.0.1", free_port())
            .await;
        assert!(matches!(
            result,
            Err(SupervisorError::ExitedDuringStartup | SupervisorError::HealthTimeout(_))
        ));
        assert!(!sup.is_running().await);
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }
}

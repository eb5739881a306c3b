//! Backend server process supervision.
//!
//! # Structure
//!
//! - [`ProcessSupervisor`] - owns the single `sd-server` process: start,
//!   config-drift detection, health polling, graceful stop
//! - `session_log` - session log sink with request-scoped shadowing
//! - `stream` - lossy-UTF8 pipe readers feeding one ordered consumer
//! - `shutdown` - SIGTERM -> SIGKILL escalation
//! - `health` - lock-free HTTP probe and port-release wait

mod health;
mod session_log;
pub mod shutdown;
mod stream;
mod supervisor;

pub use health::{check_health, wait_for_port_release};
pub use session_log::{LogSink, SharedLogSink};
pub use shutdown::{shutdown_child, terminate_pid};
pub(crate) use stream::spawn_line_reader;
pub use supervisor::{ProcessSupervisor, SupervisorError, SupervisorTimeouts};

//! Generation executors.
//!
//! Two interchangeable implementations of the [`Generator`] contract:
//! [`CliGenerator`] spawns the backend binary per request, while
//! [`ServerGenerator`] drives a supervised (or external) HTTP server.
//! Both classify and route backend output through the same path, so the
//! caller sees identical feedback either way.
//!
//! [`Generator`]: sdkit_core::Generator

mod accum;
mod cli;
mod payload;
mod server;

pub use cli::CliGenerator;
pub use server::ServerGenerator;

use sdkit_core::{BusEvent, EventBus, ExecutionMode, FlagMap, LogLevel, RequestParam};

/// Which executor should serve a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    Cli,
    Server,
}

/// Pick an executor for one request.
///
/// Explicit modes always win. In `Auto`, parameters the server API cannot
/// carry force the one-shot path (with a notice on the bus); otherwise
/// the server is only worth its startup cost when more work is queued
/// behind this request (`queue_lookahead`).
pub fn select_backend(
    mode: ExecutionMode,
    mapping: &FlagMap,
    params: &[RequestParam],
    queue_lookahead: usize,
    bus: &EventBus,
) -> BackendChoice {
    match mode {
        ExecutionMode::CliOnly => BackendChoice::Cli,
        ExecutionMode::ServerOnly => BackendChoice::Server,
        ExecutionMode::Auto => {
            if mapping.has_unsupported(params) {
                bus.publish(BusEvent::log(
                    "Unsupported server flags detected. Switching to CLI mode.",
                    LogLevel::Info,
                ));
                return BackendChoice::Cli;
            }
            if queue_lookahead > 0 {
                BackendChoice::Server
            } else {
                BackendChoice::Cli
            }
        }
    }
}

//! Process runtime and OS-level concerns for sdkit.
//!
//! # Structure
//!
//! - [`logs`] - stdout line classification and bus routing
//! - [`process`] - backend server process supervision
//! - [`exec`] - the one-shot and server generation executors

pub mod exec;
pub mod logs;
pub mod process;

pub use exec::{select_backend, BackendChoice, CliGenerator, ServerGenerator};
pub use logs::{classify, strip_ansi, LogEvent, LogRouter};
pub use process::{ProcessSupervisor, SupervisorError};

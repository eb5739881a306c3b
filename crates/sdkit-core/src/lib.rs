//! Core domain types and port definitions for sdkit.
//!
//! This crate holds everything the executors and the composition root
//! share: the generation request/result types, application settings, the
//! flag mapping table, the typed event bus, and the `Generator` port.
//! No process or HTTP code lives here.

pub mod bus;
pub mod events;
pub mod mapping;
pub mod ports;
pub mod request;
pub mod settings;

// Re-export commonly used types for convenience
pub use bus::EventBus;
pub use events::{BusEvent, LogLevel};
pub use mapping::{FlagKind, FlagMap, FlagRule, ValueType};
pub use ports::{FinishCallback, Generator};
pub use request::{GenerationRequest, GenerationResult, RequestParam};
pub use settings::{
    DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT, ExecutionMode, ServerProcessMode, Settings,
    SettingsError,
};

//! CLI library surface.
//!
//! Keeps the parser testable; all wiring lives in `main.rs`.

pub mod parser;
pub mod printer;

pub use parser::{Cli, Commands, GenerateArgs, ModeArg};

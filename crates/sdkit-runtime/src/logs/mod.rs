//! Backend log line classification and routing.
//!
//! stable-diffusion.cpp reports everything - sampling progress, seeds,
//! saved files, errors - as free-form text on stdout. [`classify`] turns
//! one line into a typed [`LogEvent`]; [`LogRouter`] publishes the
//! matching bus events so every transport produces identical UI feedback.

mod classify;
mod router;

pub use classify::{classify, strip_ansi, LogEvent};
pub use router::LogRouter;

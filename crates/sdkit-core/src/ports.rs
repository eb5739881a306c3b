//! Port definitions implemented by the runtime crate.

use async_trait::async_trait;

use crate::request::{GenerationRequest, GenerationResult};

/// Callback invoked exactly once when a generation finishes.
///
/// The boolean is the overall success flag; the result carries files,
/// seed, timing and error details.
pub type FinishCallback = Box<dyn FnOnce(bool, GenerationResult) + Send + 'static>;

/// Contract shared by the one-shot and server executors.
///
/// `run` drives one generation to completion; the outcome is delivered
/// through `on_finish` before it returns. Callers wanting concurrency
/// spawn it on a task and keep a second handle for `stop`. A single
/// instance serves one request at a time (there is no internal queue);
/// `stop` requests best-effort cooperative cancellation of the current
/// request.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Start a generation. Launch-path failures are still reported
    /// through `on_finish`, never panicked.
    async fn run(&self, request: GenerationRequest, on_finish: FinishCallback);

    /// Request cancellation of the in-flight generation.
    fn stop(&self);
}

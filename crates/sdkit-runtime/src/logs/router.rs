//! Routes classified log lines onto the event bus.

use sdkit_core::{BusEvent, EventBus, LogLevel};

use super::classify::{classify, LogEvent};

/// Converts raw backend lines into bus notifications.
///
/// Both executors and the supervisor's session reader share one router,
/// so UI feedback is identical whether output arrives from a local pipe
/// or an HTTP stream. `handle_line` returns the classified event for
/// caller-side accumulation.
#[derive(Debug, Clone)]
pub struct LogRouter {
    bus: EventBus,
}

impl LogRouter {
    /// Create a router publishing on `bus`.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    /// The underlying bus, for publishing executor status messages.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Classify a line and publish the matching bus events.
    pub fn handle_line(&self, line: &str) -> LogEvent {
        let event = classify(line);
        let raw = event.raw().map(str::trim).unwrap_or_default().to_string();
        match &event {
            LogEvent::Empty => {}
            LogEvent::Progress { current, total, .. } => {
                self.bus.publish(BusEvent::ExecutionProgress {
                    current: *current,
                    total: *total,
                });
            }
            LogEvent::BatchProgress { current, total, .. } => {
                self.bus.publish(BusEvent::ExecutionProgress {
                    current: *current,
                    total: *total,
                });
                self.emit(raw, LogLevel::Info);
            }
            LogEvent::Error { message, .. } => self.emit(message.clone(), LogLevel::Error),
            LogEvent::Warning { .. } => self.emit(raw, LogLevel::Warn),
            LogEvent::FileSaved { path, .. } => {
                self.emit(format!("Image saved: {path}"), LogLevel::Success);
            }
            LogEvent::Seed { seed, .. } => {
                self.bus.publish(BusEvent::LogMessage {
                    text: raw,
                    level: LogLevel::Info,
                    seed: Some(seed.clone()),
                });
            }
            LogEvent::Success { .. }
            | LogEvent::LoraApplied { .. }
            | LogEvent::ModelLoadTime { .. } => self.emit(raw, LogLevel::Success),
            LogEvent::VramUsage { .. }
            | LogEvent::UcacheStats { .. }
            | LogEvent::Info { .. }
            | LogEvent::System { .. } => self.emit(raw, LogLevel::Info),
            LogEvent::Params { .. } | LogEvent::Debug { .. } | LogEvent::Raw { .. } => {
                self.emit(raw, LogLevel::Raw);
            }
        }
        event
    }

    fn emit(&self, text: String, level: LogLevel) {
        self.bus.publish(BusEvent::LogMessage {
            text,
            level,
            seed: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::Receiver;

    fn setup() -> (LogRouter, Receiver<BusEvent>) {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        (LogRouter::new(bus), rx)
    }

    #[tokio::test]
    async fn progress_emits_execution_progress_only() {
        let (router, mut rx) = setup();
        router.handle_line("|====| 5/20");
        assert_eq!(
            rx.try_recv().unwrap(),
            BusEvent::ExecutionProgress {
                current: 5,
                total: 20
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn batch_progress_also_logs_info() {
        let (router, mut rx) = setup();
        router.handle_line("generating image: 2/4");
        assert_eq!(
            rx.try_recv().unwrap(),
            BusEvent::ExecutionProgress {
                current: 2,
                total: 4
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            BusEvent::log("generating image: 2/4", LogLevel::Info)
        );
    }

    #[tokio::test]
    async fn seed_attaches_seed_to_payload() {
        let (router, mut rx) = setup();
        router.handle_line("seed 42");
        assert_eq!(
            rx.try_recv().unwrap(),
            BusEvent::LogMessage {
                text: "seed 42".to_string(),
                level: LogLevel::Info,
                seed: Some("42".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn error_message_routes_at_error_level() {
        let (router, mut rx) = setup();
        router.handle_line("[ERROR] out of memory");
        assert_eq!(
            rx.try_recv().unwrap(),
            BusEvent::log("out of memory", LogLevel::Error)
        );
    }

    #[tokio::test]
    async fn file_saved_routes_as_success() {
        let (router, mut rx) = setup();
        router.handle_line("save result image to 'out.png'");
        assert_eq!(
            rx.try_recv().unwrap(),
            BusEvent::log("Image saved: out.png", LogLevel::Success)
        );
    }

    #[tokio::test]
    async fn empty_line_is_silent() {
        let (router, mut rx) = setup();
        router.handle_line("   ");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_line_routes_raw() {
        let (router, mut rx) = setup();
        router.handle_line("~~~ whatever ~~~");
        assert_eq!(
            rx.try_recv().unwrap(),
            BusEvent::log("~~~ whatever ~~~", LogLevel::Raw)
        );
    }
}

//! Terminal subscriber for bus events.

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use sdkit_core::{BusEvent, EventBus, LogLevel};

/// Spawn a task printing every bus event until the bus closes.
pub fn spawn(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    eprintln!("[warn ] dropped {skipped} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn print_event(event: &BusEvent) {
    match event {
        BusEvent::LogMessage { text, level, .. } => {
            println!("[{}] {text}", level_tag(*level));
        }
        BusEvent::ExecutionProgress { current, total } => {
            println!("[prog ] {current}/{total}");
        }
        BusEvent::ServerStatus { online } => {
            println!(
                "[serve] server {}",
                if *online { "online" } else { "offline" }
            );
        }
    }
}

fn level_tag(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "info ",
        LogLevel::Warn => "warn ",
        LogLevel::Error => "error",
        LogLevel::Success => "ok   ",
        LogLevel::Raw => "raw  ",
    }
}

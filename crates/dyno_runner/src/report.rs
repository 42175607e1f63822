// SPDX-License-Identifier: MIT OR Apache-2.0
//! Captures warnings and errors emitted during a run for the final summary.

use serde::Serialize;
use std::sync::mpsc;
use tracing::Level;

/// A tracing event captured by the [`ReportBridge`] layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    /// Level name
    pub level: String,
    /// Module path that emitted it
    pub target: String,
    /// Message followed by its fields
    pub message: String,
}

/// A `tracing_subscriber::Layer` that forwards events at or above a level
/// over an `mpsc` channel.
pub struct ReportBridge {
    sender: mpsc::Sender<LogRecord>,
    threshold: Level,
}

impl ReportBridge {
    /// Create a new bridge and return `(layer, receiver)`.
    pub fn new(threshold: Level) -> (Self, mpsc::Receiver<LogRecord>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender, threshold }, receiver)
    }
}

impl<S> tracing_subscriber::Layer<S> for ReportBridge
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let meta = event.metadata();
        // More severe levels compare as smaller.
        if *meta.level() > self.threshold {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let _ = self.sender.send(LogRecord {
            level: meta.level().to_string(),
            target: meta.target().to_string(),
            message: visitor.finish(),
        });
    }
}

/// Visitor that puts the `message` field first and appends the rest.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (true, true) => "(empty)".to_string(),
            (true, false) => self.fields.join(", "),
            (false, true) => self.message,
            (false, false) => format!("{} ({})", self.message, self.fields.join(", ")),
        }
    }
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{} = {:?}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{} = {}", field.name(), value));
        }
    }
}

//! Observability for the object synchronization core
//!
//! - Structured logging (JSON, one line per event)
//! - Typed protocol events
//! - Monotonic counters
//!
//! Observability is read-only: nothing here feeds back into protocol
//! decisions.
//!
//! # Usage
//!
//! ```ignore
//! use objsync::observability::{log_event_with_fields, Event, SyncMetrics};
//!
//! log_event_with_fields(Event::NodeAdded, &[("node", "...")]);
//!
//! let metrics = SyncMetrics::new();
//! metrics.increment_nodes_added();
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{SyncMetrics, SyncMetricsSnapshot};

/// Log a protocol event at its natural severity.
pub fn log_event(event: Event) {
    log_event_with_fields(event, &[]);
}

/// Log a protocol event with fields at its natural severity.
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(default_severity(event), event.as_str(), fields);
}

/// Log a protocol event at an explicit severity.
pub fn log_event_at(severity: Severity, event: Event, fields: &[(&str, &str)]) {
    Logger::log(severity, event.as_str(), fields);
}

fn default_severity(event: Event) -> Severity {
    match event {
        Event::InvariantViolation => Severity::Fatal,
        Event::NodeZapped | Event::GcDisableFailed | Event::SendFailed => Severity::Error,
        Event::NodeAddRejected
        | Event::ObjectsMissingHere
        | Event::GcResultIgnored
        | Event::TxnIgnored
        | Event::SyncCancelled => Severity::Warn,
        Event::BatchSent | Event::TxnPruned | Event::GcDisableRetry => Severity::Trace,
        _ => Severity::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_severities() {
        assert_eq!(default_severity(Event::InvariantViolation), Severity::Fatal);
        assert_eq!(default_severity(Event::NodeZapped), Severity::Error);
        assert_eq!(default_severity(Event::ObjectsMissingHere), Severity::Warn);
        assert_eq!(default_severity(Event::NodeAdded), Severity::Info);
    }

    #[test]
    fn test_log_event_does_not_panic() {
        log_event(Event::ConfigLoaded);
        log_event_with_fields(Event::NodeRemoved, &[("node", "n1")]);
        log_event_at(Severity::Trace, Event::BatchSent, &[("count", "0")]);
    }
}

//! Observability for the subscription subsystem
//!
//! - Logging through `tracing`, one typed [`Event`] per line. The event's
//!   fields are rendered into a single `fields` value of sorted
//!   `key=value` pairs, so they are readable but not separately queryable.
//! - Monotonic counters in [`LiveMetrics`]
//!
//! Observability is read-only: a failure to log never changes the outcome
//! of a subscribe, renewal or broadcast decision.
//!
//! ```ignore
//! use aerolive::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::BatchFlushed, &[("batch_key", "Post:updated"), ("items", "3")]);
//! ```

mod events;
mod metrics;

pub use events::{Event, Severity};
pub use metrics::{LiveMetrics, MetricsSnapshot};

/// Log a lifecycle event
pub fn log_event(event: Event) {
    log_event_with_fields(event, &[]);
}

/// Log a lifecycle event with fields
///
/// Fields are rendered in alphabetical key order so log lines are stable.
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    let rendered = render_fields(fields);
    match event.severity() {
        Severity::Trace => tracing::trace!(event = event.as_str(), fields = %rendered),
        Severity::Info => tracing::info!(event = event.as_str(), fields = %rendered),
        Severity::Warn => tracing::warn!(event = event.as_str(), fields = %rendered),
        Severity::Error => tracing::error!(event = event.as_str(), fields = %rendered),
    }
}

fn render_fields(fields: &[(&str, &str)]) -> String {
    let mut sorted: Vec<_> = fields.iter().collect();
    sorted.sort_by_key(|(k, _)| *k);
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

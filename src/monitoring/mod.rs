/*!
 * Monitoring
 * Tracing, metrics and the event history of adjuster passes
 */

pub mod events;
pub mod metrics;
mod tracer;

pub use events::{AdjEvent, AdjEventKind, EventHistory, Severity};
pub use metrics::{MetricsCollector, MetricsSnapshot, Timer};
pub use tracer::{generate_trace_id, init_tracing, PassSpan};

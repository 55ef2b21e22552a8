/*!
 * Tracing
 * Structured tracing for adjuster passes using the tracing crate
 *
 * Features:
 * - Trace ID per pass for correlating effects with the pass that made them
 * - JSON-formatted logs for structured parsing
 * - Slow-pass warnings recorded on the pass span
 */

use std::time::Instant;
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Passes slower than this are logged at warn
const SLOW_PASS_MS: u128 = 50;

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - OOM_ADJ_TRACE_JSON: Enable JSON output (default: false)
///
/// Calling it twice is harmless; the second registration is ignored.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("OOM_ADJ_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        info!(json = use_json, "Structured tracing initialized");
    }
}

/// Generate a unique trace ID for pass correlation
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span covering one adjuster pass
///
/// Fields left empty at creation are filled in as the pass progresses;
/// dropping the span logs its duration.
pub struct PassSpan {
    span: tracing::Span,
    start: Instant,
    trace_id: String,
    seq: u64,
}

impl PassSpan {
    pub fn new(seq: u64, full: bool, reason: &str) -> Self {
        let trace_id = generate_trace_id();
        let span = span!(
            Level::DEBUG,
            "oom_adj_pass",
            trace_id = %trace_id,
            seq = seq,
            full = full,
            reason = reason,
            processes = tracing::field::Empty,
            cycle_rounds = tracing::field::Empty,
            changed = tracing::field::Empty,
            kills = tracing::field::Empty,
            duration_us = tracing::field::Empty,
        );

        {
            let _entered = span.enter();
            debug!(seq, full, reason, "pass started");
        }

        Self {
            span,
            start: Instant::now(),
            trace_id,
            seq,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Enter the span for the synchronous body of the pass
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    pub fn record_processes(&self, count: usize) {
        self.span.record("processes", count as u64);
    }

    pub fn record_cycle_rounds(&self, rounds: u32) {
        self.span.record("cycle_rounds", rounds);
    }

    pub fn record_outcome(&self, changed: usize, kills: usize) {
        self.span.record("changed", changed as u64);
        self.span.record("kills", kills as u64);
    }
}

impl Drop for PassSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_us", duration.as_micros() as u64);

        if duration.as_millis() > SLOW_PASS_MS {
            warn!(
                trace_id = %self.trace_id,
                seq = self.seq,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow pass detected"
            );
        } else {
            debug!(
                trace_id = %self.trace_id,
                seq = self.seq,
                duration_us = duration.as_micros() as u64,
                "pass completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_trace_ids_are_unique() {
        assert_ne!(generate_trace_id(), generate_trace_id());
    }

    #[test]
    #[serial]
    fn test_json_tracing_reinit_is_ignored() {
        std::env::set_var("OOM_ADJ_TRACE_JSON", "1");
        init_tracing();
        init_tracing();
        std::env::remove_var("OOM_ADJ_TRACE_JSON");
    }

    #[test]
    #[serial]
    fn test_pass_span_lifecycle() {
        init_tracing();
        let span = PassSpan::new(7, true, "system_init");
        assert_eq!(span.trace_id().len(), 36);
        span.record_processes(3);
        span.record_cycle_rounds(1);
        span.record_outcome(2, 0);
    }
}

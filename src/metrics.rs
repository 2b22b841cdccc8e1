//! Reconcile metrics (feature `metrics`) and tracing spans (feature `tracing`).

#[cfg(feature = "metrics")]
pub use self::otel::{LinkManyMetrics, METRICS};

#[cfg(feature = "metrics")]
mod otel {
    use crate::error::LinkOperation;
    use once_cell::sync::Lazy;
    use opentelemetry::{
        global,
        metrics::{Counter, Histogram},
        KeyValue,
    };
    use std::time::Duration;

    pub static METRICS: Lazy<LinkManyMetrics> = Lazy::new(LinkManyMetrics::init);

    pub struct LinkManyMetrics {
        pub links_total: Counter<u64>,
        pub unlinks_total: Counter<u64>,
        pub dropped_references_total: Counter<u64>,
        pub persistence_errors_total: Counter<u64>,
        pub reconcile_duration: Histogram<f64>,
    }

    impl LinkManyMetrics {
        pub fn init() -> Self {
            let meter = global::meter("linkmany");

            let links_total = meter
                .u64_counter("linkmany_links_total")
                .with_description("Junction rows created")
                .build();

            let unlinks_total = meter
                .u64_counter("linkmany_unlinks_total")
                .with_description("Junction rows removed or detached")
                .build();

            let dropped_references_total = meter
                .u64_counter("linkmany_dropped_references_total")
                .with_description("Desired references that matched no entity")
                .build();

            let persistence_errors_total = meter
                .u64_counter("linkmany_persistence_errors_total")
                .with_description("Failed collaborator calls")
                .build();

            let reconcile_duration = meter
                .f64_histogram("linkmany_reconcile_duration_seconds")
                .with_description("Duration of reconcile passes")
                .build();

            Self {
                links_total,
                unlinks_total,
                dropped_references_total,
                persistence_errors_total,
                reconcile_duration,
            }
        }

        pub fn record_link(&self) {
            self.links_total.add(1, &[]);
        }

        pub fn record_unlink(&self) {
            self.unlinks_total.add(1, &[]);
        }

        pub fn record_dropped(&self, count: usize) {
            self.dropped_references_total.add(count as u64, &[]);
        }

        pub fn record_persistence_error(&self, operation: LinkOperation) {
            self.persistence_errors_total
                .add(1, &[KeyValue::new("operation", operation.as_str())]);
        }

        pub fn record_reconcile_duration(&self, elapsed: Duration) {
            self.reconcile_duration.record(elapsed.as_secs_f64(), &[]);
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    pub fn reconcile_span(relation: &str) -> Span {
        info_span!("linkmany.reconcile", relation = %relation)
    }

    pub fn reconcile_delete_span(relation: &str) -> Span {
        info_span!("linkmany.reconcile_delete", relation = %relation)
    }
}

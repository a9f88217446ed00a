//! Prometheus metrics (feature `metrics`) and tracing span helpers (feature `tracing`).

#[cfg(feature = "metrics")]
pub use self::prometheus_metrics::{LedgerMetrics, METRICS};

#[cfg(feature = "metrics")]
mod prometheus_metrics {
    use once_cell::sync::Lazy;
    use opentelemetry::metrics::{Counter, Histogram, MeterProvider};
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Encoder, Registry, TextEncoder};
    use std::time::Duration;

    pub static METRICS: Lazy<LedgerMetrics> = Lazy::new(LedgerMetrics::init);

    pub struct LedgerMetrics {
        pub registry: Registry,
        provider: SdkMeterProvider,
        pub queries_total: Counter<u64>,
        pub query_errors_total: Counter<u64>,
        pub query_duration: Histogram<f64>,
        pub reconcile_steps_total: Counter<u64>,
        pub reconcile_conflicts_total: Counter<u64>,
        pub reconcile_partial_total: Counter<u64>,
        pub carry_forwards_total: Counter<u64>,
        pub carried_items_total: Counter<u64>,
    }

    impl LedgerMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let provider = match opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
            {
                Ok(exporter) => SdkMeterProvider::builder().with_reader(exporter).build(),
                Err(e) => {
                    log::warn!("prometheus exporter unavailable, metrics will not be exported: {e}");
                    SdkMeterProvider::builder().build()
                }
            };
            let meter = provider.meter("stock_ledger");

            let queries_total = meter
                .u64_counter("stock_ledger_queries_total")
                .with_description("Total queries executed")
                .build();
            let query_errors_total = meter
                .u64_counter("stock_ledger_query_errors_total")
                .with_description("Queries that returned an error")
                .build();
            let query_duration = meter
                .f64_histogram("stock_ledger_query_duration_seconds")
                .with_description("Duration of queries")
                .build();
            let reconcile_steps_total = meter
                .u64_counter("stock_ledger_reconcile_steps_total")
                .with_description("Periods reconciled, one per committed step")
                .build();
            let reconcile_conflicts_total = meter
                .u64_counter("stock_ledger_reconcile_conflicts_total")
                .with_description("Optimistic version conflicts hit while reconciling")
                .build();
            let reconcile_partial_total = meter
                .u64_counter("stock_ledger_reconcile_partial_total")
                .with_description("Chain walks that stopped before the end of the chain")
                .build();
            let carry_forwards_total = meter
                .u64_counter("stock_ledger_carry_forwards_total")
                .with_description("Completed carry-forward operations")
                .build();
            let carried_items_total = meter
                .u64_counter("stock_ledger_carried_items_total")
                .with_description("Stock records created by carry-forward")
                .build();

            Self {
                registry,
                provider,
                queries_total,
                query_errors_total,
                query_duration,
                reconcile_steps_total,
                reconcile_conflicts_total,
                reconcile_partial_total,
                carry_forwards_total,
                carried_items_total,
            }
        }

        pub fn record_query(&self, elapsed: Duration) {
            self.queries_total.add(1, &[]);
            self.query_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_query_error(&self) {
            self.query_errors_total.add(1, &[]);
        }

        pub fn record_reconcile_step(&self) {
            self.reconcile_steps_total.add(1, &[]);
        }

        pub fn record_conflict(&self) {
            self.reconcile_conflicts_total.add(1, &[]);
        }

        pub fn record_partial_walk(&self) {
            self.reconcile_partial_total.add(1, &[]);
        }

        pub fn record_carry_forward(&self, items: usize) {
            self.carry_forwards_total.add(1, &[]);
            self.carried_items_total.add(items as u64, &[]);
        }

        /// Render every registered metric in the Prometheus text format.
        pub fn render(&self) -> String {
            if let Err(e) = self.provider.force_flush() {
                log::debug!("metric flush failed: {e}");
            }
            let mut buf = Vec::new();
            if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
                log::warn!("failed to encode metrics: {e}");
                return String::new();
            }
            String::from_utf8_lossy(&buf).into_owned()
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    pub fn execute_query_span(query: &str) -> Span {
        info_span!("stock_ledger.query", sql = %truncate(query, 120))
    }

    pub fn acquire_connection_span() -> Span {
        info_span!("stock_ledger.connect")
    }

    pub fn begin_transaction_span() -> Span {
        info_span!("stock_ledger.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        info_span!("stock_ledger.transaction.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        info_span!("stock_ledger.transaction.rollback")
    }

    pub fn reconcile_step_span(period_id: i64) -> Span {
        info_span!("stock_ledger.reconcile.step", period_id)
    }

    pub fn carry_forward_span(source: i64, target: i64) -> Span {
        info_span!("stock_ledger.carry_forward", source, target)
    }

    fn truncate(s: &str, max: usize) -> &str {
        match s.char_indices().nth(max) {
            Some((idx, _)) => &s[..idx],
            None => s,
        }
    }

}

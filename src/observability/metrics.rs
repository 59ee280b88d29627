/// Prometheusメトリクス定義。
use prometheus::{
    Counter, Histogram, HistogramOpts, Registry, register_counter_with_registry,
    register_histogram_with_registry,
};
use std::sync::Arc;

/// メトリクスコレクター。
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // カウンター
    pub runs_started: Counter,
    pub runs_completed: Counter,
    pub runs_failed: Counter,
    pub runs_cancelled: Counter,
    pub batches_enriched: Counter,
    pub batches_skipped: Counter,
    pub destinations_enriched: Counter,
    pub generation_calls: Counter,
    pub generation_retries: Counter,

    // ヒストグラム
    pub stub_generation_duration: Histogram,
    pub batch_duration: Histogram,
    pub run_duration: Histogram,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("runs_started", &self.runs_started.get())
            .field("runs_completed", &self.runs_completed.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// 新しいメトリクスコレクターを作成する。
    ///
    /// # Errors
    /// 同じレジストリに同名のメトリクスが既に登録されている場合。
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        let llm_buckets = vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0];

        Ok(Self {
            runs_started: register_counter_with_registry!(
                "discovery_runs_started_total",
                "Total number of discovery runs started",
                registry
            )?,
            runs_completed: register_counter_with_registry!(
                "discovery_runs_completed_total",
                "Total number of discovery runs that returned a destination list",
                registry
            )?,
            runs_failed: register_counter_with_registry!(
                "discovery_runs_failed_total",
                "Total number of discovery runs that failed during candidate generation",
                registry
            )?,
            runs_cancelled: register_counter_with_registry!(
                "discovery_runs_cancelled_total",
                "Total number of discovery runs cancelled by the caller",
                registry
            )?,
            batches_enriched: register_counter_with_registry!(
                "discovery_batches_enriched_total",
                "Total number of enrichment batches merged",
                registry
            )?,
            batches_skipped: register_counter_with_registry!(
                "discovery_batches_skipped_total",
                "Total number of enrichment batches skipped after an upstream failure",
                registry
            )?,
            destinations_enriched: register_counter_with_registry!(
                "discovery_destinations_enriched_total",
                "Total number of destination records replaced by an enriched record",
                registry
            )?,
            generation_calls: register_counter_with_registry!(
                "discovery_generation_calls_total",
                "Total number of generation calls issued by the pipeline",
                registry
            )?,
            generation_retries: register_counter_with_registry!(
                "discovery_generation_retries_total",
                "Total number of generation calls retried",
                registry
            )?,
            stub_generation_duration: register_histogram_with_registry!(
                HistogramOpts::new(
                    "discovery_stub_generation_duration_seconds",
                    "Duration of the candidate name generation call"
                )
                .buckets(llm_buckets.clone()),
                registry
            )?,
            batch_duration: register_histogram_with_registry!(
                HistogramOpts::new(
                    "discovery_batch_duration_seconds",
                    "Duration of one enrichment batch including merge"
                )
                .buckets(llm_buckets),
                registry
            )?,
            run_duration: register_histogram_with_registry!(
                HistogramOpts::new(
                    "discovery_run_duration_seconds",
                    "Duration of a whole discovery run"
                )
                .buckets(vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
                registry
            )?,
            registry,
        })
    }

    /// 独立したレジストリで作成する（テスト・ライブラリ利用向け）。
    ///
    /// # Errors
    /// メトリクス登録に失敗した場合。
    pub fn standalone() -> Result<Self, prometheus::Error> {
        Self::new(Arc::new(Registry::new()))
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use prometheus::{Encoder, TextEncoder};

    use super::*;

    #[test]
    fn registers_all_families() {
        let metrics = Metrics::standalone().expect("metrics register");
        metrics.runs_started.inc();
        metrics.batch_duration.observe(1.2);

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metrics.registry().gather(), &mut buffer)
            .expect("encode metrics");
        let rendered = String::from_utf8(buffer).expect("utf8 exposition");

        assert!(rendered.contains("discovery_runs_started_total 1"));
        assert!(rendered.contains("discovery_batch_duration_seconds_count 1"));
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = Arc::new(Registry::new());
        let _first = Metrics::new(Arc::clone(&registry)).expect("first registers");

        assert!(Metrics::new(registry).is_err());
    }
}

//! オーケストレーター。候補生成のあと、エンリッチメントのバッチを順番に実行する。

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::clients::generation::GenerationService;
use crate::error::DiscoveryError;
use crate::observability::metrics::Metrics;

use super::candidates::CandidateGenerator;
use super::enrich::{BatchEnricher, DEFAULT_BATCH_SIZE, plan_batches};
use super::models::{Destination, DestinationStub};
use super::params::PreferenceParams;
use super::progress::{ProgressCallbacks, ProgressDispatcher};
use super::prompt::{DEFAULT_TIGHT_BUDGET_USD, PromptBuilder};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// プロセス全体のパイプライン設定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub batch_size: NonZeroUsize,
    pub tight_budget_usd: u32,
    /// 1回の生成呼び出し（再試行込み）の上限時間。
    pub call_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            batch_size: NonZeroUsize::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN),
            tight_budget_usd: DEFAULT_TIGHT_BUDGET_USD,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// 実行ごとのオプション。
#[derive(Debug, Default)]
pub struct RunOptions {
    /// この実行に限り [`PipelineSettings::batch_size`] を上書きする。
    pub batch_size: Option<NonZeroUsize>,
    pub callbacks: ProgressCallbacks,
    pub cancel: CancellationToken,
}

impl RunOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: NonZeroUsize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    #[must_use]
    pub fn with_callbacks(mut self, callbacks: ProgressCallbacks) -> Self {
        self.callbacks = callbacks;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PipelineState {
    NotStarted,
    FetchingStubs,
    StubsReady,
    EnrichingBatch(usize),
    Completed,
    Errored,
    Cancelled,
}

impl PipelineState {
    fn batch_number(self) -> Option<usize> {
        match self {
            Self::EnrichingBatch(number) => Some(number),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct StateTracker {
    state: PipelineState,
}

impl StateTracker {
    fn new() -> Self {
        Self {
            state: PipelineState::NotStarted,
        }
    }

    fn advance(&mut self, next: PipelineState) {
        debug!(
            from = ?self.state,
            to = ?next,
            batch_number = ?next.batch_number(),
            "pipeline state transition"
        );
        self.state = next;
    }
}

/// 唯一の可変な結果リスト。インデックス `i` は常にスタブ `i` に対応する。
#[derive(Debug)]
struct ResultBuffer {
    entries: Vec<Destination>,
}

impl ResultBuffer {
    fn from_stubs(stubs: &[DestinationStub]) -> Self {
        Self {
            entries: stubs.iter().cloned().map(Destination::from).collect(),
        }
    }

    /// 受理されたレコードを `start + j` に書き込み、書き込んだ件数を返す。
    fn merge(&mut self, start: usize, results: Vec<Option<Destination>>) -> usize {
        let mut merged = 0;
        for (offset, result) in results.into_iter().enumerate() {
            let Some(enriched) = result else { continue };
            if let Some(slot) = self.entries.get_mut(start + offset) {
                *slot = enriched;
                merged += 1;
            }
        }
        merged
    }

    fn snapshot(&self) -> Vec<Destination> {
        self.entries.clone()
    }

    fn into_inner(self) -> Vec<Destination> {
        self.entries
    }
}

/// 段階的な目的地探索。
pub struct DiscoveryPipeline {
    candidates: CandidateGenerator,
    enricher: BatchEnricher,
    settings: PipelineSettings,
    metrics: Option<Arc<Metrics>>,
}

impl DiscoveryPipeline {
    pub fn new(generation: Arc<dyn GenerationService>, settings: PipelineSettings) -> Self {
        let prompts = PromptBuilder::new(settings.tight_budget_usd);
        Self {
            candidates: CandidateGenerator::new(Arc::clone(&generation), prompts),
            enricher: BatchEnricher::new(generation, prompts),
            settings,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 候補生成とバッチ単位のエンリッチメントを実行する。
    ///
    /// 候補生成の失敗かキャンセル以外では、全件のリスト（一部のみエンリッチ済みの場合あり）を返す。
    ///
    /// # Errors
    /// - 呼び出し前の入力検証に失敗した場合は [`DiscoveryError::Validation`]（コールバックなし）。
    /// - 候補生成の上流エラー（`on_error` 通知後）。
    /// - `options.cancel` が発火した場合は [`DiscoveryError::Cancelled`]。
    pub async fn run(
        &self,
        params: &PreferenceParams,
        options: RunOptions,
    ) -> Result<Vec<Destination>, DiscoveryError> {
        self.run_with_id(Uuid::now_v7(), params, options).await
    }

    /// ログ相関用の実行IDを呼び出し側が指定する [`run`](Self::run)。
    ///
    /// # Errors
    /// [`run`](Self::run) を参照。
    pub async fn run_with_id(
        &self,
        run_id: Uuid,
        params: &PreferenceParams,
        options: RunOptions,
    ) -> Result<Vec<Destination>, DiscoveryError> {
        params.validate()?;
        let span = info_span!("discovery_run", %run_id);
        self.execute(params, options).instrument(span).await
    }

    async fn execute(
        &self,
        params: &PreferenceParams,
        options: RunOptions,
    ) -> Result<Vec<Destination>, DiscoveryError> {
        let started = Instant::now();
        let batch_size = options.batch_size.unwrap_or(self.settings.batch_size).get();
        let dispatcher = ProgressDispatcher::new(&options.callbacks);
        let cancel = &options.cancel;
        let mut tracker = StateTracker::new();
        self.record(|m| m.runs_started.inc());

        if cancel.is_cancelled() {
            return Err(self.cancelled(&mut tracker));
        }

        tracker.advance(PipelineState::FetchingStubs);
        let stub_started = Instant::now();
        let stubs = match self
            .guarded(cancel, self.candidates.generate_candidates(params))
            .await
        {
            Ok(stubs) => stubs,
            Err(DiscoveryError::Cancelled) => return Err(self.cancelled(&mut tracker)),
            Err(failure) => {
                tracker.advance(PipelineState::Errored);
                error!(error = %failure, "candidate generation failed");
                self.record(|m| m.runs_failed.inc());
                dispatcher.error(&failure);
                return Err(failure);
            }
        };
        let stub_elapsed = stub_started.elapsed().as_secs_f64();
        self.record(|m| m.stub_generation_duration.observe(stub_elapsed));

        tracker.advance(PipelineState::StubsReady);
        info!(count = stubs.len(), batch_size, "candidate destinations ready");
        dispatcher.initial(&stubs);

        let mut buffer = ResultBuffer::from_stubs(&stubs);
        for plan in plan_batches(stubs.len(), batch_size) {
            if cancel.is_cancelled() {
                return Err(self.cancelled(&mut tracker));
            }
            tracker.advance(PipelineState::EnrichingBatch(plan.number));

            let batch_started = Instant::now();
            let batch = &stubs[plan.start..plan.start + plan.len];
            match self
                .guarded(cancel, self.enricher.enrich_batch(batch, params))
                .await
            {
                Ok(results) => {
                    let merged = buffer.merge(plan.start, results);
                    info!(
                        batch_number = plan.number,
                        batch_start = plan.start,
                        batch_len = plan.len,
                        enriched = merged,
                        "enrichment batch merged"
                    );
                    self.record(|m| {
                        m.batches_enriched.inc();
                        m.destinations_enriched.inc_by(merged as f64);
                    });
                }
                Err(DiscoveryError::Cancelled) => return Err(self.cancelled(&mut tracker)),
                Err(failure) => {
                    warn!(
                        batch_number = plan.number,
                        batch_start = plan.start,
                        batch_len = plan.len,
                        error = %failure,
                        "enrichment batch skipped"
                    );
                    self.record(|m| m.batches_skipped.inc());
                }
            }
            let batch_elapsed = batch_started.elapsed().as_secs_f64();
            self.record(|m| m.batch_duration.observe(batch_elapsed));

            dispatcher.batch_complete(buffer.snapshot(), plan.number);
        }

        tracker.advance(PipelineState::Completed);
        let elapsed = started.elapsed().as_secs_f64();
        self.record(|m| {
            m.runs_completed.inc();
            m.run_duration.observe(elapsed);
        });
        dispatcher.complete();

        let destinations = buffer.into_inner();
        info!(
            total = destinations.len(),
            enriched = destinations.iter().filter(|d| d.is_enriched()).count(),
            elapsed_ms = started.elapsed().as_millis(),
            "discovery run completed"
        );
        Ok(destinations)
    }

    /// `call` をキャンセルと呼び出し上限時間と競合させる。
    async fn guarded<T>(
        &self,
        cancel: &CancellationToken,
        call: impl Future<Output = Result<T, DiscoveryError>>,
    ) -> Result<T, DiscoveryError> {
        let limit = self.settings.call_timeout;
        self.record(|m| m.generation_calls.inc());
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(DiscoveryError::Cancelled),
            outcome = tokio::time::timeout(limit, call) => {
                outcome.unwrap_or_else(|_| Err(DiscoveryError::timed_out(limit)))
            }
        }
    }

    fn cancelled(&self, tracker: &mut StateTracker) -> DiscoveryError {
        info!(state = ?tracker.state, "discovery run cancelled");
        tracker.advance(PipelineState::Cancelled);
        self.record(|m| m.runs_cancelled.inc());
        DiscoveryError::Cancelled
    }

    fn record(&self, update: impl FnOnce(&Metrics)) {
        if let Some(metrics) = &self.metrics {
            update(metrics);
        }
    }
}

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tracing::info;

use crate::{
    api,
    clients::generation::{GeminiClient, GenerationService, RetryingGenerationService},
    config::Config,
    observability::{Telemetry, tracing::TracingSettings},
    pipeline::{DiscoveryPipeline, PipelineSettings},
};

#[derive(Clone)]
pub(crate) struct AppState {
    registry: Arc<ComponentRegistry>,
}

pub struct ComponentRegistry {
    telemetry: Telemetry,
    generation: Arc<dyn GenerationService>,
    pipeline: Arc<DiscoveryPipeline>,
}

impl AppState {
    pub(crate) fn new(registry: ComponentRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub(crate) fn telemetry(&self) -> &Telemetry {
        &self.registry.telemetry
    }

    pub(crate) fn generation(&self) -> Arc<dyn GenerationService> {
        Arc::clone(&self.registry.generation)
    }

    pub(crate) fn pipeline(&self) -> Arc<DiscoveryPipeline> {
        Arc::clone(&self.registry.pipeline)
    }
}

impl ComponentRegistry {
    /// 構成情報と依存をまとめて初期化し、アプリケーションの共有レジストリを構築する。
    ///
    /// # Errors
    /// Telemetry の初期化や HTTP クライアント構築が失敗した場合はエラーを返す。
    pub fn build(config: &Config) -> Result<Self> {
        let telemetry = Telemetry::new(&TracingSettings {
            otlp_endpoint: config.otel_exporter_endpoint().map(ToString::to_string),
            sampling_ratio: config.otel_sampling_ratio(),
        })?;
        let gemini =
            Arc::new(GeminiClient::new(config.gemini()).context("failed to build Gemini client")?);
        info!(model = gemini.model(), "generation client configured");

        let retry = config.retry();
        let generation: Arc<dyn GenerationService> = if retry.is_enabled() {
            info!(max_attempts = retry.max_attempts, "generation retries enabled");
            Arc::new(
                RetryingGenerationService::new(gemini, retry)
                    .with_attempt_timeout(config.generation_timeout())
                    .with_metrics(telemetry.metrics_arc()),
            )
        } else {
            gemini
        };

        Ok(Self::from_parts(telemetry, generation, config.pipeline()))
    }

    /// 任意の生成サービスでレジストリを組み立てる。
    #[must_use]
    pub fn from_parts(
        telemetry: Telemetry,
        generation: Arc<dyn GenerationService>,
        settings: PipelineSettings,
    ) -> Self {
        let pipeline = Arc::new(
            DiscoveryPipeline::new(Arc::clone(&generation), settings)
                .with_metrics(telemetry.metrics_arc()),
        );

        Self {
            telemetry,
            generation,
            pipeline,
        }
    }
}

pub fn build_router(registry: ComponentRegistry) -> Router {
    let state = AppState::new(registry);
    api::router(state)
}

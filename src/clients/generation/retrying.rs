use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::DiscoveryError;
use crate::observability::metrics::Metrics;
use crate::util::retry::RetryConfig;

use super::{GenerationRequest, GenerationService};

/// 再試行可能なエラーに限って呼び出しを繰り返すラッパー。
///
/// マージや失敗封じ込めの意味論は変えない。最終的な失敗はそのまま返す。
/// `attempt_timeout` を設定すると各試行ごとに打ち切り、タイムアウトも再試行対象になる。
pub struct RetryingGenerationService {
    inner: Arc<dyn GenerationService>,
    config: RetryConfig,
    attempt_timeout: Option<Duration>,
    metrics: Option<Arc<Metrics>>,
}

impl RetryingGenerationService {
    pub fn new(inner: Arc<dyn GenerationService>, config: RetryConfig) -> Self {
        Self {
            inner,
            config,
            attempt_timeout: None,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = Some(limit);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn attempt(&self, request: &GenerationRequest) -> Result<String, DiscoveryError> {
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.generate(request))
                .await
                .unwrap_or_else(|_| Err(DiscoveryError::timed_out(limit))),
            None => self.inner.generate(request).await,
        }
    }
}

#[async_trait]
impl GenerationService for RetryingGenerationService {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, DiscoveryError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt(request).await {
                Ok(text) => return Ok(text),
                Err(error) if error.is_retryable() && self.config.can_retry(attempts) => {
                    let delay = self.config.delay_for_retry(attempts);
                    warn!(
                        mode = request.mode.as_str(),
                        attempt = attempts,
                        delay_ms = delay.as_millis(),
                        %error,
                        "retrying generation call"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.generation_retries.inc();
                    }
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn ready(&self) -> anyhow::Result<()> {
        self.inner.ready().await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::clients::generation::GenerationMode;

    struct Scripted {
        responses: Mutex<VecDeque<Result<String, DiscoveryError>>>,
        calls: Mutex<usize>,
        first_call_delay: Option<Duration>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<String, DiscoveryError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
                first_call_delay: None,
            })
        }

        fn hanging_first(
            responses: Vec<Result<String, DiscoveryError>>,
            delay: Duration,
        ) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
                first_call_delay: Some(delay),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock().expect("calls lock")
        }
    }

    #[async_trait]
    impl GenerationService for Scripted {
        async fn generate(&self, _request: &GenerationRequest) -> Result<String, DiscoveryError> {
            let call = {
                let mut calls = self.calls.lock().expect("calls lock");
                *calls += 1;
                *calls
            };
            if let (1, Some(delay)) = (call, self.first_call_delay) {
                tokio::time::sleep(delay).await;
            }
            self.responses
                .lock()
                .expect("responses lock")
                .pop_front()
                .unwrap_or_else(|| Err(DiscoveryError::UpstreamParse("script exhausted".into())))
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            mode: GenerationMode::Details,
            system: "system",
            prompt: "prompt".into(),
        }
    }

    fn unavailable() -> DiscoveryError {
        DiscoveryError::UpstreamRequest {
            message: "503".into(),
            status: Some(503),
            retryable: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_until_success() {
        let inner = Scripted::new(vec![Err(unavailable()), Err(unavailable()), Ok("[]".into())]);
        let service = RetryingGenerationService::new(inner.clone(), RetryConfig::new(3, 10, 100));

        let text = service.generate(&request()).await.expect("third attempt succeeds");

        assert_eq!(text, "[]");
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let inner = Scripted::new(vec![Err(unavailable()), Err(unavailable()), Ok("[]".into())]);
        let service = RetryingGenerationService::new(inner.clone(), RetryConfig::new(2, 10, 100));

        let error = service.generate(&request()).await.expect_err("two attempts fail");

        assert!(error.is_retryable());
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn parse_errors_are_not_retried() {
        let inner = Scripted::new(vec![
            Err(DiscoveryError::UpstreamParse("not json".into())),
            Ok("[]".into()),
        ]);
        let service = RetryingGenerationService::new(inner.clone(), RetryConfig::new(5, 10, 100));

        let error = service.generate(&request()).await.expect_err("parse error surfaces");

        assert!(matches!(error, DiscoveryError::UpstreamParse(_)));
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_times_out_and_is_retried() {
        let inner = Scripted::hanging_first(vec![Ok("[]".into())], Duration::from_secs(600));
        let service = RetryingGenerationService::new(inner.clone(), RetryConfig::new(3, 10, 100))
            .with_attempt_timeout(Duration::from_secs(60));

        let text = service.generate(&request()).await.expect("second attempt succeeds");

        assert_eq!(text, "[]");
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_timing_out_surfaces_timeout() {
        let inner = Scripted::hanging_first(vec![], Duration::from_secs(600));
        let service = RetryingGenerationService::new(inner.clone(), RetryConfig::new(1, 10, 100))
            .with_attempt_timeout(Duration::from_secs(5));

        let error = service.generate(&request()).await.expect_err("single attempt times out");

        assert_eq!(error, DiscoveryError::timed_out(Duration::from_secs(5)));
        assert_eq!(inner.calls(), 1);
    }
}

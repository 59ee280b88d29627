use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use crate::error::DiscoveryError;

use super::models::{
    Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig,
    truncate_error_message,
};
use super::{GenerationRequest, GenerationService};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini クライアントの設定。
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub temperature: f64,
}

/// Gemini generateContent API を叩く生成サービス実装。
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: Url,
    api_key: String,
    model: String,
    request_timeout: Duration,
    temperature: f64,
}

impl GeminiClient {
    /// 新しいクライアントを作成する。
    ///
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合はエラーを返す。
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .context("failed to build generation HTTP client")?;

        let base_url = Url::parse(&config.base_url).context("invalid generation base URL")?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key,
            model: config.model,
            request_timeout: config.request_timeout,
            temperature: config.temperature,
        })
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn model_url(&self, suffix: &str) -> Result<Url> {
        self.base_url
            .join(&format!("v1beta/models/{}{suffix}", self.model))
            .context("failed to build generation model URL")
    }

    /// モデルのメタデータ取得で疎通を確認する。
    ///
    /// # Errors
    /// リクエストが失敗するか、エラーステータスが返った場合。
    pub async fn health_check(&self) -> Result<()> {
        let url = self.model_url("")?;

        self.client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("generation health request failed")?
            .error_for_status()
            .context("generation health endpoint returned error status")?;

        Ok(())
    }
}

#[async_trait]
impl GenerationService for GeminiClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, DiscoveryError> {
        let url = self
            .model_url(":generateContent")
            .map_err(|error| DiscoveryError::UpstreamRequest {
                message: format!("{error:#}"),
                status: None,
                retryable: false,
            })?;

        let body = GenerateContentRequest {
            system_instruction: Content::system(request.system),
            contents: vec![Content::user(&request.prompt)],
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        };

        debug!(
            mode = request.mode.as_str(),
            model = %self.model,
            prompt_chars = request.prompt.len(),
            "sending generation request"
        );
        let started = Instant::now();

        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|error| DiscoveryError::from_transport(&error))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DiscoveryError::from_status(
                status,
                &truncate_error_message(&body),
            ));
        }

        let payload: GenerateContentResponse = response
            .json()
            .await
            .map_err(|error| DiscoveryError::UpstreamParse(error.to_string()))?;

        debug!(
            mode = request.mode.as_str(),
            elapsed_ms = started.elapsed().as_millis(),
            "generation response received"
        );

        payload.into_text().ok_or_else(|| {
            DiscoveryError::UpstreamParse("generation response contained no text".to_string())
        })
    }

    async fn ready(&self) -> Result<()> {
        self.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::generation::GenerationMode;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::new(GeminiConfig {
            base_url: format!("{}/", server.uri()),
            api_key: "test-key".to_string(),
            model: "gemini-2.5-flash".to_string(),
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
            temperature: 0.7,
        })
        .expect("client should build")
    }

    fn names_request() -> GenerationRequest {
        GenerationRequest {
            mode: GenerationMode::Names,
            system: "system prompt",
            prompt: "I want to hike volcanoes in March.".to_string(),
        }
    }

    #[tokio::test]
    async fn generate_returns_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.5-flash:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_string_contains("hike volcanoes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "```json\n[]\n```" }] }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server)
            .generate(&names_request())
            .await
            .expect("generate succeeds");

        assert_eq!(text, "```json\n[]\n```");
    }

    #[tokio::test]
    async fn generate_maps_server_error_to_retryable_request_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("x".repeat(5000)))
            .mount(&server)
            .await;

        let error = client_for(&server)
            .generate(&names_request())
            .await
            .expect_err("503 should fail");

        match &error {
            DiscoveryError::UpstreamRequest {
                status, retryable, message,
            } => {
                assert_eq!(*status, Some(503));
                assert!(*retryable);
                assert!(message.contains("truncated"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn generate_rejects_empty_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "candidates": [] })),
            )
            .mount(&server)
            .await;

        let error = client_for(&server)
            .generate(&names_request())
            .await
            .expect_err("no text should fail");

        assert!(matches!(error, DiscoveryError::UpstreamParse(_)));
    }

    #[tokio::test]
    async fn health_check_fails_on_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta/models/gemini-2.5-flash"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let error = client_for(&server)
            .health_check()
            .await
            .expect_err("should fail");
        assert!(error.to_string().contains("error status"));
    }

    #[tokio::test]
    async fn health_check_succeeds_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1beta/models/gemini-2.5-flash"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        client_for(&server)
            .health_check()
            .await
            .expect("health check should succeed");
    }
}

use std::convert::Infallible;
use std::num::NonZeroUsize;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, stream};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::DiscoveryError;
use crate::pipeline::{
    Destination, PreferenceParams, ProgressCallbacks, ProgressEvent, RunOptions,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DiscoverRequest {
    #[serde(flatten)]
    params: PreferenceParams,
    #[serde(default)]
    batch_size: Option<NonZeroUsize>,
}

impl DiscoverRequest {
    fn options(&self) -> RunOptions {
        let options = RunOptions::new();
        match self.batch_size {
            Some(batch_size) => options.with_batch_size(batch_size),
            None => options,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DiscoverResponse {
    run_id: Uuid,
    enriched_count: usize,
    destinations: Vec<Destination>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// [`DiscoveryError`] の HTTP 表現。
#[derive(Debug)]
pub(crate) struct ApiError(DiscoveryError);

impl From<DiscoveryError> for ApiError {
    fn from(error: DiscoveryError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            DiscoveryError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            DiscoveryError::UpstreamRequest { .. } => (StatusCode::BAD_GATEWAY, "upstream_request"),
            DiscoveryError::UpstreamParse(_) => (StatusCode::BAD_GATEWAY, "upstream_parse"),
            DiscoveryError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
        };
        let body = ErrorBody {
            error: code,
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub(crate) async fn discover(
    State(state): State<AppState>,
    Json(request): Json<DiscoverRequest>,
) -> Result<Json<DiscoverResponse>, ApiError> {
    let run_id = Uuid::now_v7();
    let destinations = state
        .pipeline()
        .run_with_id(run_id, &request.params, request.options())
        .await?;
    let enriched_count = destinations.iter().filter(|d| d.is_enriched()).count();

    Ok(Json(DiscoverResponse {
        run_id,
        enriched_count,
        destinations,
    }))
}

/// 進捗を Server-Sent Events で配信する。レスポンスストリームが破棄されると実行をキャンセルする。
pub(crate) async fn discover_stream(
    State(state): State<AppState>,
    Json(request): Json<DiscoverRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    request.params.validate()?;

    let run_id = Uuid::now_v7();
    let (sender, receiver) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let options = request
        .options()
        .with_callbacks(ProgressCallbacks::channel(sender))
        .with_cancellation(cancel.clone());
    let pipeline = state.pipeline();

    tokio::spawn(async move {
        match pipeline.run_with_id(run_id, &request.params, options).await {
            Ok(destinations) => info!(%run_id, total = destinations.len(), "stream run finished"),
            Err(DiscoveryError::Cancelled) => info!(%run_id, "stream client went away"),
            Err(error) => warn!(%run_id, %error, "stream run failed"),
        }
    });

    let events = stream::unfold(
        (receiver, cancel.drop_guard()),
        |(mut receiver, guard)| async move {
            let event = receiver.recv().await?;
            Some((Ok(to_sse(&event)), (receiver, guard)))
        },
    );

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &ProgressEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|error| Event::default().event("error").data(error.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::app::{ComponentRegistry, build_router};
    use crate::clients::generation::{GenerationMode, GenerationRequest, GenerationService};
    use crate::observability::Telemetry;
    use crate::pipeline::PipelineSettings;

    struct Canned {
        names: Result<String, DiscoveryError>,
    }

    #[async_trait]
    impl GenerationService for Canned {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, DiscoveryError> {
            match request.mode {
                GenerationMode::Names => self.names.clone(),
                GenerationMode::Details => Ok(json!([{
                    "country": "ISL",
                    "region": "Reykjanes",
                    "description": ["Lava fields"],
                    "imagesKeywords": { "cover": "lava", "gallery": "lagoon" },
                    "pricing": { "accommodation": "80-150", "food": "30-60", "activities": "20-80" },
                    "recommendedDuration": "3-5",
                    "destinationAirportCode": "KEF"
                }])
                .to_string()),
            }
        }
    }

    fn app(names: Result<String, DiscoveryError>) -> axum::Router {
        let registry = ComponentRegistry::from_parts(
            Telemetry::without_tracing().expect("telemetry"),
            Arc::new(Canned { names }),
            PipelineSettings::default(),
        );
        build_router(registry)
    }

    fn post(uri: &str, body: &Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request builds")
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        String::from_utf8(bytes.to_vec()).expect("utf8 body")
    }

    #[tokio::test]
    async fn discover_returns_enriched_list() {
        let app = app(Ok(r#"[{"country":"ISL","region":"Reykjanes"}]"#.into()));

        let response = app
            .oneshot(post(
                "/v1/destinations/discover",
                &json!({ "vibe": "hike volcanoes", "timePeriod": "March", "batchSize": 2 }),
            ))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        let payload: Value = serde_json::from_str(&body_string(response).await).expect("json");
        assert_eq!(payload["enrichedCount"], 1);
        assert_eq!(payload["destinations"][0]["destinationAirportCode"], "KEF");
        assert!(
            payload["runId"]
                .as_str()
                .and_then(|id| Uuid::parse_str(id).ok())
                .is_some()
        );
    }

    #[tokio::test]
    async fn blank_vibe_is_bad_request() {
        let app = app(Ok("[]".into()));

        let response = app
            .oneshot(post(
                "/v1/destinations/discover",
                &json!({ "vibe": " ", "timePeriod": "March" }),
            ))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let payload: Value = serde_json::from_str(&body_string(response).await).expect("json");
        assert_eq!(payload["error"], "validation");
    }

    #[tokio::test]
    async fn candidate_failure_is_bad_gateway() {
        let app = app(Err(DiscoveryError::UpstreamRequest {
            message: "quota exceeded".into(),
            status: Some(429),
            retryable: true,
        }));

        let response = app
            .oneshot(post(
                "/v1/destinations/discover",
                &json!({ "vibe": "surf", "timePeriod": "July" }),
            ))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn stream_emits_events_in_order() {
        let app = app(Ok(r#"[{"country":"ISL","region":"Reykjanes"}]"#.into()));

        let response = app
            .oneshot(post(
                "/v1/destinations/discover/stream",
                &json!({ "vibe": "hike volcanoes", "timePeriod": "March" }),
            ))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        let names: Vec<&str> = body
            .lines()
            .filter_map(|line| line.strip_prefix("event: "))
            .collect();
        assert_eq!(names, vec!["initial", "batch", "complete"]);
        assert!(body.contains(r#""batchNumber":1"#));
    }

    #[tokio::test]
    async fn stream_reports_candidate_failure_as_error_event() {
        let app = app(Ok("no list today".into()));

        let response = app
            .oneshot(post(
                "/v1/destinations/discover/stream",
                &json!({ "vibe": "surf", "timePeriod": "July" }),
            ))
            .await
            .expect("request succeeds");

        let body = body_string(response).await;
        let names: Vec<&str> = body
            .lines()
            .filter_map(|line| line.strip_prefix("event: "))
            .collect();
        assert_eq!(names, vec!["error"]);
    }

    #[tokio::test]
    async fn stream_validates_before_opening() {
        let app = app(Ok("[]".into()));

        let response = app
            .oneshot(post(
                "/v1/destinations/discover/stream",
                &json!({ "vibe": "surf", "timePeriod": "" }),
            ))
            .await
            .expect("request succeeds");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metube_core::{
    request_from_parts, FetchError, FetchOrchestrator, FetchRequest, MediaStream, StreamError,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Clone, Debug)]
pub struct AppState {
    pub fetch: FetchOrchestrator,
}

impl AppState {
    pub fn new(fetch: FetchOrchestrator) -> Self {
        Self { fetch }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/stream", get(stream_get).post(stream_post))
        .route("/health", get(health))
        .with_state(state)
}

/// JSON error body returned for every failed request.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        let status = match &err {
            FetchError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            FetchError::DownloadFailed(_) => StatusCode::BAD_GATEWAY,
            FetchError::MissingFile { .. } => StatusCode::NOT_FOUND,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<StreamError> for ApiError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::MissingFile { .. } => Self {
                status: StatusCode::NOT_FOUND,
                message: err.to_string(),
            },
            StreamError::Io { .. } => Self::internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.message, "request failed");
        } else {
            warn!(status = %self.status, error = %self.message, "request rejected");
        }
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub url: Option<String>,
    pub format: Option<String>,
    pub quality: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamBody {
    pub url: Option<String>,
    pub format: Option<String>,
    pub quality: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthReport {
    pub status: String,
    pub cache: String,
}

pub async fn stream_get(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> ApiResult<Response> {
    let request = request_from_parts(
        query.url.as_deref().unwrap_or_default(),
        query.format.as_deref(),
        query.quality.as_deref(),
    )?;
    stream_media(&state, request).await
}

/// Query parameters win over fields of the same name in the body.
pub async fn stream_post(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    body: Result<Json<StreamBody>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(body) = body?;
    let url = query.url.or(body.url).unwrap_or_default();
    let request = request_from_parts(
        &url,
        query.format.or(body.format).as_deref(),
        query.quality.or(body.quality).as_deref(),
    )?;
    stream_media(&state, request).await
}

pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let cache = match state.fetch.ping_cache().await {
        Ok(()) => "ok",
        Err(err) => {
            warn!(error = %err, "cache health check failed");
            "unavailable"
        }
    };
    Json(HealthReport {
        status: "ok".to_string(),
        cache: cache.to_string(),
    })
}

async fn stream_media(state: &AppState, request: FetchRequest) -> ApiResult<Response> {
    let media = state.fetch.handle_request(request).await?;
    let stream = MediaStream::open(&media.path, media.format).await?;
    info!(
        path = %media.path.display(),
        size_bytes = stream.len(),
        cache = media.cache.as_str(),
        "streaming media"
    );

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(stream.content_type()),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(stream.len()));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&stream.content_disposition())
            .map_err(|err| ApiError::internal(err.to_string()))?,
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Disposition, X-Cache"),
    );
    headers.insert("x-cache", HeaderValue::from_static(media.cache.as_str()));

    let body = Body::from_stream(stream.into_body());
    Ok((headers, body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::to_bytes;
    use metube_core::{
        DownloadError, DownloadResult, DownloadedFile, ExtractJob, MediaExtractor,
        MemoryCacheStore, ScratchDir,
    };
    use tempfile::TempDir;

    struct StubExtractor {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MediaExtractor for StubExtractor {
        async fn extract(&self, job: &ExtractJob) -> DownloadResult<DownloadedFile> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DownloadError::ExternalToolFailure {
                    status: Some(1),
                    stderr: "ERROR: Video unavailable".into(),
                });
            }
            std::fs::write(&job.output_path, b"stub-media").unwrap();
            Ok(DownloadedFile {
                path: job.output_path.clone(),
                format: job.request.format,
                size_bytes: 10,
            })
        }
    }

    struct TestContext {
        _temp: TempDir,
        state: AppState,
        extractor: Arc<StubExtractor>,
    }

    impl TestContext {
        fn new(fail: bool) -> Self {
            let temp = TempDir::new().unwrap();
            let extractor = Arc::new(StubExtractor {
                calls: AtomicUsize::new(0),
                fail,
            });
            let scratch = ScratchDir::new(temp.path().join("scratch")).unwrap();
            let fetch = FetchOrchestrator::new(
                Arc::new(MemoryCacheStore::new()),
                extractor.clone(),
                scratch,
                Duration::from_secs(3600),
            );
            Self {
                _temp: temp,
                state: AppState::new(fetch),
                extractor,
            }
        }
    }

    fn query(url: &str, format: Option<&str>, quality: Option<&str>) -> StreamQuery {
        StreamQuery {
            url: Some(url.to_string()),
            format: format.map(str::to_string),
            quality: quality.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn get_streams_video_with_attachment_headers() {
        let ctx = TestContext::new(false);
        let response = stream_get(
            State(ctx.state.clone()),
            Query(query("https://example.com/v", Some("mp4"), Some("720p"))),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "video/mp4");
        assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "10");
        let disposition = headers
            .get(header::CONTENT_DISPOSITION)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(disposition.starts_with("attachment; filename=\""));
        assert!(disposition.ends_with(".mp4\""));
        assert_eq!(headers.get("x-cache").unwrap(), "MISS");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"stub-media");
    }

    #[tokio::test]
    async fn repeated_request_reports_cache_hit() {
        let ctx = TestContext::new(false);
        for _ in 0..2 {
            stream_get(
                State(ctx.state.clone()),
                Query(query("https://example.com/v", None, None)),
            )
            .await
            .unwrap();
        }
        let response = stream_get(
            State(ctx.state.clone()),
            Query(query("https://example.com/v", None, None)),
        )
        .await
        .unwrap();
        assert_eq!(response.headers().get("x-cache").unwrap(), "HIT");
        assert_eq!(ctx.extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn post_prefers_query_over_body() {
        let ctx = TestContext::new(false);
        let body = StreamBody {
            url: Some("https://example.com/song".into()),
            format: Some("mp4".into()),
            quality: Some("best".into()),
        };
        let response = stream_post(
            State(ctx.state.clone()),
            Query(StreamQuery {
                url: None,
                format: Some("mp3".into()),
                quality: Some("256k".into()),
            }),
            Ok(Json(body)),
        )
        .await
        .unwrap();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "audio/mpeg"
        );
    }

    #[tokio::test]
    async fn post_url_follows_query_precedence() {
        let ctx = TestContext::new(false);
        let body = StreamBody {
            url: Some("not a url".into()),
            format: None,
            quality: None,
        };
        let response = stream_post(
            State(ctx.state.clone()),
            Query(query("https://example.com/from-query", None, None)),
            Ok(Json(body)),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(ctx.extractor.calls.load(Ordering::SeqCst), 1);

        let body = StreamBody {
            url: Some("https://example.com/from-body".into()),
            format: None,
            quality: None,
        };
        let response = stream_post(
            State(ctx.state.clone()),
            Query(StreamQuery::default()),
            Ok(Json(body)),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(ctx.extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn missing_url_is_bad_request() {
        let ctx = TestContext::new(false);
        let err = stream_post(
            State(ctx.state.clone()),
            Query(StreamQuery::default()),
            Ok(Json(StreamBody::default())),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(ctx.extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_format_is_bad_request() {
        let ctx = TestContext::new(false);
        let err = stream_get(
            State(ctx.state.clone()),
            Query(query("https://example.com/v", Some("avi"), None)),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn extractor_failure_maps_to_bad_gateway() {
        let ctx = TestContext::new(true);
        let err = stream_get(
            State(ctx.state.clone()),
            Query(query("https://example.com/v", None, None)),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert!(err.message.contains("Video unavailable"));

        let response = err.into_response();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(value["error"].as_str().unwrap().contains("download failed"));
    }

    #[tokio::test]
    async fn health_reports_cache_state() {
        let ctx = TestContext::new(false);
        let Json(report) = health(State(ctx.state.clone())).await;
        assert_eq!(
            report,
            HealthReport {
                status: "ok".into(),
                cache: "ok".into(),
            }
        );
    }
}

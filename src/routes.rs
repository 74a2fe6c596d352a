use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::acquire::{self, AcquisitionError, MAX_IMAGE_BYTES};
use crate::model::{self, ModelError, ModelOutcome, VisionModel};
use crate::models::{ErrorResponse, QueryParams, ResultResponse};
use crate::normalize::{self, NormalizeError};
use crate::prompt::{self, Kind, LANGUAGES};

/// Leaves room above the image ceiling so oversize uploads reach the acquirer.
/// Anything past this is refused by the body extractor with its own status.
const BODY_LIMIT: usize = 2 * MAX_IMAGE_BYTES;

#[derive(Clone)]
pub struct AppState {
    pub http: reqwest::Client,
    pub model: Arc<dyn VisionModel>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/languages", get(languages))
        .route("/api/metadata", post(metadata))
        .route("/api/alt-text", post(alt_text))
        .route("/api/caption", post(caption))
        .route("/api/description", post(description))
        .route("/api/focus-keyword", post(focus_keyword))
        .route("/api/filename", post(filename))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid image data: empty payload")]
    EmptyPayload,
    #[error("{}", .0.body_text())]
    Body(#[from] BytesRejection),
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::EmptyPayload => StatusCode::BAD_REQUEST,
            ApiError::Body(rejection) => rejection.status(),
            ApiError::Acquisition(_) | ApiError::Model(_) | ApiError::Normalize(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn languages() -> impl IntoResponse {
    Json(&*LANGUAGES)
}

async fn metadata(
    State(state): State<AppState>,
    Query(query): Query<QueryParams>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    generate(Kind::Metadata, &state, &query, &headers, body).await
}

async fn alt_text(
    State(state): State<AppState>,
    Query(query): Query<QueryParams>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    generate(Kind::AltText, &state, &query, &headers, body).await
}

async fn caption(
    State(state): State<AppState>,
    Query(query): Query<QueryParams>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    generate(Kind::Caption, &state, &query, &headers, body).await
}

async fn description(
    State(state): State<AppState>,
    Query(query): Query<QueryParams>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    generate(Kind::Description, &state, &query, &headers, body).await
}

async fn focus_keyword(
    State(state): State<AppState>,
    Query(query): Query<QueryParams>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    generate(Kind::FocusKeyword, &state, &query, &headers, body).await
}

async fn filename(
    State(state): State<AppState>,
    Query(query): Query<QueryParams>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    generate(Kind::Filename, &state, &query, &headers, body).await
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

async fn generate(
    kind: Kind,
    state: &AppState,
    query: &QueryParams,
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let body = body?;
    let language = prompt::language_name(query.lang.as_deref());
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let acquired = acquire::acquire(&state.http, content_type, body).await?;
    if acquired.payload.is_empty() {
        return Err(ApiError::EmptyPayload);
    }

    let options = acquired.options.or(query.options());
    let prompt = prompt::build(kind, language, &options);
    tracing::debug!(kind = kind.as_str(), language, "invoking model");

    let outcome = model::invoke(state.model.as_ref(), &prompt, &acquired.payload).await?;
    let image_type = acquired.payload.content_type();

    let response = match kind {
        Kind::Metadata => Json(normalize::normalize_metadata(outcome, image_type)?).into_response(),
        Kind::Filename => Json(ResultResponse {
            result: normalize::slugify(&outcome_text(outcome), image_type),
        })
        .into_response(),
        Kind::AltText | Kind::Caption | Kind::Description | Kind::FocusKeyword => {
            Json(ResultResponse {
                result: outcome_text(outcome),
            })
            .into_response()
        }
    };
    Ok(response)
}

/// Single-field kinds want text; an object reply is passed on as compact JSON.
fn outcome_text(outcome: ModelOutcome) -> String {
    match outcome {
        ModelOutcome::Text(text) => text,
        ModelOutcome::Structured(obj) => serde_json::Value::Object(obj).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VisionRequest;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::net::SocketAddr;

    struct Stub(fn(&VisionRequest<'_>) -> Result<Value, ModelError>);

    #[async_trait]
    impl VisionModel for Stub {
        async fn run(&self, request: &VisionRequest<'_>) -> Result<Value, ModelError> {
            (self.0)(request)
        }
    }

    async fn spawn(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn spawn_api(stub: Stub) -> SocketAddr {
        let state = AppState {
            http: acquire::build_http_client().unwrap(),
            model: Arc::new(stub),
        };
        spawn(router(state)).await
    }

    async fn spawn_image_host() -> SocketAddr {
        let app = Router::new().route(
            "/cat.webp",
            get(|| async { ([(header::CONTENT_TYPE, "image/webp")], vec![b'R', b'I', b'F', b'F']) }),
        );
        spawn(app).await
    }

    async fn post_json(addr: SocketAddr, path: &str, body: Value) -> (u16, Value) {
        let resp = reqwest::Client::new()
            .post(format!("http://{addr}{path}"))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn post_bytes(addr: SocketAddr, path: &str, content_type: &str, bytes: Vec<u8>) -> (u16, Value) {
        let resp = reqwest::Client::new()
            .post(format!("http://{addr}{path}"))
            .header(header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    #[tokio::test]
    async fn metadata_from_url_appends_extension() {
        let host = spawn_image_host().await;
        let api = spawn_api(Stub(|req| {
            assert_eq!(req.image, b"RIFF");
            Ok(json!({"alt-text": "a cat", "filename": "cute-cat"}))
        }))
        .await;

        let (status, body) =
            post_json(api, "/api/metadata", json!({"url": format!("http://{host}/cat.webp")})).await;
        assert_eq!(status, 200, "{body}");
        assert_eq!(body["filename"], "cute-cat.webp");
        assert_eq!(body["alt-text"], "a cat");
    }

    #[tokio::test]
    async fn metadata_from_noisy_text_reply() {
        let api = spawn_api(Stub(|_| {
            Ok(json!({"response": "Sure! ```json\n{\"caption\":\"Dog\",\"focus_keyword\":\"dog\",\"filename\":\"dog-park\"}\n```"}))
        }))
        .await;

        let (status, body) = post_bytes(api, "/api/metadata", "image/jpeg", vec![1, 2, 3]).await;
        assert_eq!(status, 200, "{body}");
        assert_eq!(
            body,
            json!({"caption": "Dog", "filename": "dog-park.jpg", "focus-keyword": "dog"})
        );
    }

    #[tokio::test]
    async fn metadata_prompt_carries_language_and_options() {
        let api = spawn_api(Stub(|req| Ok(json!({"prompt": req.user}))))
            .await;

        let (status, body) = post_bytes(
            api,
            "/api/metadata?lang=fr&tags=true&keyword=chaton&tone=warm",
            "image/png",
            vec![1],
        )
        .await;
        assert_eq!(status, 200, "{body}");
        let prompt = body["prompt"].as_str().unwrap();
        assert!(prompt.contains("French"));
        assert!(prompt.contains("\"tags\""));
        assert!(prompt.contains("chaton"));
        assert!(prompt.contains("warm tone"));
    }

    #[tokio::test]
    async fn body_options_take_precedence_over_query() {
        let host = spawn_image_host().await;
        let api = spawn_api(Stub(|req| Ok(json!({"prompt": req.user})))).await;

        let (status, body) = post_json(
            api,
            "/api/metadata?keyword=from-query&context=shop",
            json!({"url": format!("http://{host}/cat.webp"), "keyword": "from-body"}),
        )
        .await;
        assert_eq!(status, 200, "{body}");
        let prompt = body["prompt"].as_str().unwrap();
        assert!(prompt.contains("from-body"));
        assert!(!prompt.contains("from-query"));
        assert!(prompt.contains("Context about the image: shop"));
    }

    #[tokio::test]
    async fn filename_is_slugged_with_upload_type() {
        let api = spawn_api(Stub(|_| Ok(json!({"response": "  Orange Cat_Sleeping on Sofa! "})))).await;
        let (status, body) = post_bytes(api, "/api/filename", "IMAGE/PNG", vec![9, 9]).await;
        assert_eq!(status, 200, "{body}");
        assert_eq!(body, json!({"result": "orange-catsleeping-on-sofa.png"}));
    }

    #[tokio::test]
    async fn single_field_kinds_return_trimmed_text() {
        let api = spawn_api(Stub(|req| Ok(json!({"response": format!("  {}  ", req.user)})))).await;

        for path in ["/api/alt-text", "/api/caption", "/api/description", "/api/focus-keyword"] {
            let (status, body) =
                post_bytes(api, &format!("{path}?lang=de"), "application/octet-stream", vec![1]).await;
            assert_eq!(status, 200, "{path}: {body}");
            let result = body["result"].as_str().unwrap();
            assert!(result.ends_with("Respond in German."), "{path}: {result}");
        }

        let (_, body) = post_bytes(api, "/api/caption?lang=xx", "image/gif", vec![1]).await;
        assert!(body["result"].as_str().unwrap().ends_with("Respond in English."));
    }

    #[tokio::test]
    async fn empty_upload_is_a_client_error() {
        let api = spawn_api(Stub(|_| panic!("model must not be called"))).await;
        let (status, body) = post_bytes(api, "/api/caption", "image/png", Vec::new()).await;
        assert_eq!(status, 400);
        assert_eq!(body, json!({"error": "Invalid image data: empty payload"}));
    }

    #[tokio::test]
    async fn failures_map_to_server_errors() {
        let api = spawn_api(Stub(|_| Ok(json!({"response": "I cannot describe this image."})))).await;

        let (status, body) = post_json(api, "/api/metadata", json!({"url": "ftp://host/img.png"})).await;
        assert_eq!(status, 500);
        assert!(body["error"].as_str().unwrap().starts_with("Unsupported protocol"), "{body}");

        let (status, body) = post_json(api, "/api/metadata", json!({"link": "x"})).await;
        assert_eq!(status, 500);
        assert_eq!(body["error"], "Missing required field: url");

        let (status, body) = post_bytes(api, "/api/metadata", "text/plain", vec![1]).await;
        assert_eq!(status, 500);
        assert_eq!(body["error"], "Unsupported content type: text/plain");

        let (status, body) = post_bytes(api, "/api/metadata", "image/png", vec![1]).await;
        assert_eq!(status, 500);
        assert_eq!(
            body["error"],
            "Model returned malformed JSON: I cannot describe this image."
        );
    }

    #[tokio::test]
    async fn model_failure_is_surfaced() {
        let api = spawn_api(Stub(|_| Err(ModelError::Invocation("binding unavailable".into())))).await;
        let (status, body) = post_bytes(api, "/api/alt-text", "image/png", vec![1]).await;
        assert_eq!(status, 500);
        assert_eq!(body["error"], "Model invocation failed: binding unavailable");
    }

    #[tokio::test]
    async fn oversize_upload_reaches_size_policy() {
        let api = spawn_api(Stub(|_| panic!("model must not be called"))).await;
        let (status, body) =
            post_bytes(api, "/api/caption", "image/jpeg", vec![0u8; MAX_IMAGE_BYTES + 1]).await;
        assert_eq!(status, 500);
        assert!(body["error"].as_str().unwrap().starts_with("Image too large: 10.00 MiB"), "{body}");
    }

    #[tokio::test]
    async fn body_over_transport_limit_keeps_json_shape() {
        use tower::ServiceExt;

        let app = router(AppState {
            http: acquire::build_http_client().unwrap(),
            model: Arc::new(Stub(|_| panic!("model must not be called"))),
        });
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/caption")
            .header(header::CONTENT_TYPE, "image/png")
            .body(axum::body::Body::from(vec![0u8; BODY_LIMIT + 1]))
            .unwrap();

        let resp = app.oneshot(request).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(
            body["error"].as_str().unwrap().starts_with("Failed to buffer the request body"),
            "{body}"
        );
    }

    #[tokio::test]
    async fn only_post_is_routed() {
        let api = spawn_api(Stub(|_| panic!("model must not be called"))).await;
        let resp = reqwest::get(format!("http://{api}/api/metadata")).await.unwrap();
        assert_eq!(resp.status().as_u16(), 405);

        let resp = reqwest::get(format!("http://{api}/health")).await.unwrap();
        assert_eq!(resp.json::<Value>().await.unwrap(), json!({"status": "ok"}));

        let langs: Value = reqwest::get(format!("http://{api}/api/languages"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(langs["ja"], "Japanese");
        assert_eq!(langs.as_object().unwrap().len(), 11);
    }
}

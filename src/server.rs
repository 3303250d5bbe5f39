//! HTTP server for the faceswap-gateway.
//!
//! Exposes the swap endpoint plus health and metrics probes. Each request
//! is a suspendable task; the only shared mutable state is the result
//! cache, and request-local files live in a scoped temp directory that is
//! removed on every exit path.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::Multipart;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use eyre::Result;
use governor::{Quota, RateLimiter};
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::{ResultCache, DEFAULT_MAX_ENTRIES, DEFAULT_TTL_SECONDS};
use crate::image_ops::{self, DEFAULT_MAX_DIMENSION};
use crate::remote::{RemoteSwapClient, RetryPolicy, SwapError, DEFAULT_ENDPOINT, DEFAULT_OPERATION};
use crate::{content_hash, has_allowed_extension};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Directory for request-scoped upload staging
    pub upload_dir: PathBuf,
    /// Directory where finalized outputs are written
    pub output_dir: PathBuf,
    /// Remote face-swap endpoint base URL
    pub remote_endpoint: String,
    /// Operation identifier on the remote host
    pub remote_operation: String,
    /// Cache TTL in seconds
    pub cache_ttl_seconds: u64,
    /// Maximum cache entries
    pub cache_max_entries: u64,
    /// Retry policy for remote calls
    pub retry: RetryPolicy,
    /// Rate limit in requests per minute per IP (0 = no limit)
    pub rate_limit_rpm: u32,
    /// Allowed CORS origins (None/empty = allow any)
    pub allowed_origins: Option<Vec<String>>,
    /// Largest dimension kept when normalizing uploads
    pub max_image_dimension: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".parse().unwrap(),
            upload_dir: PathBuf::from("static/uploads"),
            output_dir: PathBuf::from("static/output"),
            remote_endpoint: DEFAULT_ENDPOINT.to_string(),
            remote_operation: DEFAULT_OPERATION.to_string(),
            cache_ttl_seconds: DEFAULT_TTL_SECONDS,
            cache_max_entries: DEFAULT_MAX_ENTRIES,
            retry: RetryPolicy::default(),
            rate_limit_rpm: 60,
            allowed_origins: None,
            max_image_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Successful swap response
#[derive(Debug, Serialize)]
pub struct SwapResponse {
    pub result_image: String,
}

/// Error body for 4xx/5xx responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Upper bound on a whole multipart upload (two images plus form fields).
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Type alias for per-IP rate limiters
type IpRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Server state
pub struct ServerState {
    pub config: ServerConfig,
    pub cache: ResultCache,
    pub remote: RemoteSwapClient,
    pub rate_limiters: Mutex<HashMap<std::net::IpAddr, Arc<IpRateLimiter>>>,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Self {
        let cache = ResultCache::new(config.cache_ttl_seconds, config.cache_max_entries);
        let remote = RemoteSwapClient::new(
            &config.remote_endpoint,
            &config.remote_operation,
            config.retry.clone(),
            config.output_dir.clone(),
        );

        Self {
            config,
            cache,
            remote,
            rate_limiters: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_rate_limiter(&self, ip: std::net::IpAddr) -> Option<Arc<IpRateLimiter>> {
        if self.config.rate_limit_rpm == 0 {
            return None;
        }

        let mut limiters = self.rate_limiters.lock().await;

        if let Some(limiter) = limiters.get(&ip) {
            return Some(Arc::clone(limiter));
        }

        let quota = Quota::per_minute(NonZeroU32::new(self.config.rate_limit_rpm).unwrap());
        let limiter = Arc::new(RateLimiter::direct(quota));
        limiters.insert(ip, Arc::clone(&limiter));

        if limiters.len() > 10000 {
            tracing::warn!("rate limiter map exceeded 10000 entries, clearing");
            limiters.clear();
            limiters.insert(ip, Arc::clone(&limiter));
        }

        Some(limiter)
    }
}

/// Run the HTTP server
pub async fn run_server(config: ServerConfig) -> Result<()> {
    use axum::routing::{get, post};
    use axum::Router;

    std::fs::create_dir_all(&config.upload_dir)?;
    std::fs::create_dir_all(&config.output_dir)?;

    let prometheus_handle = crate::metrics::install_prometheus_recorder();
    let rate_limit_rpm = config.rate_limit_rpm;

    // Build CORS layer
    let cors = match &config.allowed_origins {
        Some(origins) if !origins.is_empty() => {
            let allowed: Vec<axum::http::HeaderValue> =
                origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers([axum::http::header::CONTENT_TYPE])
        }
        _ => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers(Any),
    };

    let state = Arc::new(ServerState::new(config.clone()));

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/swap", post(swap_handler))
        .route(
            "/metrics",
            get(move || {
                let handle = prometheus_handle.clone();
                async move { handle.render() }
            }),
        )
        .with_state(state)
        .layer(axum::extract::DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("faceswap-gateway listening on {}", config.bind_addr);
    tracing::info!("Endpoints: GET /health, GET /metrics, POST /swap");
    tracing::info!(remote = %config.remote_endpoint, operation = %config.remote_operation, "remote model configured");
    if rate_limit_rpm > 0 {
        tracing::info!(rate_limit_rpm, "rate limiting enabled");
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Health check handler. Static liveness probe, no dependencies.
async fn health_handler() -> impl IntoResponse {
    axum::Json(HealthResponse {
        status: "API is running",
    })
}

/// One uploaded multipart file, filename as sent by the client.
struct UploadedImage {
    filename: Option<String>,
    bytes: Vec<u8>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Metric label for a swap failure.
fn outcome_label(err: &SwapError) -> &'static str {
    match err {
        SwapError::InvalidInput => "invalid_input",
        SwapError::Remote(_) => "remote_error",
        SwapError::NoResult => "no_result",
        SwapError::SaveFailed => "save_failed",
    }
}

/// Face swap handler (`POST /swap`).
///
/// Validates the two uploads, normalizes and fingerprints them, and
/// serves from cache when the pair has been seen within the TTL window.
/// On a miss the normalized images are staged into a scoped temp
/// directory and handed to the remote invoker.
async fn swap_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
    axum::extract::ConnectInfo(addr): axum::extract::ConnectInfo<SocketAddr>,
    mut multipart: Multipart,
) -> Response {
    let start = Instant::now();
    let client_ip = addr.ip();

    // Check rate limit
    if let Some(limiter) = state.get_rate_limiter(client_ip).await {
        if limiter.check().is_err() {
            tracing::warn!(%client_ip, "rate limit exceeded");
            crate::metrics::record_rate_limit_hit();
            return error_response(
                StatusCode::TOO_MANY_REQUESTS,
                format!(
                    "Rate limit exceeded. Maximum {} requests per minute.",
                    state.config.rate_limit_rpm
                ),
            );
        }
    }

    // Collect multipart fields
    let mut source: Option<UploadedImage> = None;
    let mut dest: Option<UploadedImage> = None;
    let mut source_face_index: u32 = 1;
    let mut dest_face_index: u32 = 1;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "malformed multipart body");
                return error_response(StatusCode::BAD_REQUEST, "No file selected");
            }
        };

        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("source_image") | Some("dest_image") => {
                let is_source = name.as_deref() == Some("source_image");
                let filename = field.file_name().map(|n| n.to_string());
                let bytes = match field.bytes().await {
                    Ok(b) => b.to_vec(),
                    Err(e) => {
                        tracing::debug!(error = %e, "failed to read upload");
                        return error_response(StatusCode::BAD_REQUEST, "No file selected");
                    }
                };
                let upload = UploadedImage { filename, bytes };
                if is_source {
                    source = Some(upload);
                } else {
                    dest = Some(upload);
                }
            }
            Some("source_face_index") | Some("dest_face_index") => {
                let is_source = name.as_deref() == Some("source_face_index");
                // Unparseable selectors fall back to the first face.
                let idx = field
                    .text()
                    .await
                    .ok()
                    .and_then(|t| t.trim().parse::<u32>().ok())
                    .filter(|&i| i >= 1)
                    .unwrap_or(1);
                if is_source {
                    source_face_index = idx;
                } else {
                    dest_face_index = idx;
                }
            }
            _ => {}
        }
    }

    let (Some(source), Some(dest)) = (source, dest) else {
        crate::metrics::record_rejected_upload("missing_field");
        return error_response(StatusCode::BAD_REQUEST, "No file selected");
    };

    // Validate filenames and extensions before looking at the content.
    let filenames = [source.filename.as_deref(), dest.filename.as_deref()];
    if filenames.iter().any(|f| f.map_or(true, str::is_empty)) {
        crate::metrics::record_rejected_upload("missing_filename");
        return error_response(StatusCode::BAD_REQUEST, "No file selected");
    }
    if !filenames
        .iter()
        .all(|f| f.map(has_allowed_extension).unwrap_or(false))
    {
        crate::metrics::record_rejected_upload("bad_extension");
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid file format. Only PNG, JPG, JPEG allowed",
        );
    }

    // Normalize, fingerprint, and consult the cache.
    let max_dim = state.config.max_image_dimension;
    let source_bytes = image_ops::normalize(&source.bytes, max_dim);
    let dest_bytes = image_ops::normalize(&dest.bytes, max_dim);

    let cache_key = ResultCache::key(&content_hash(&source_bytes), &content_hash(&dest_bytes));
    if let Some(cached) = state.cache.get(&cache_key) {
        crate::metrics::record_cache_hit();
        crate::metrics::record_swap("cache_hit", start.elapsed().as_millis() as u64);
        tracing::info!(%client_ip, "returning cached swap result");
        return (
            StatusCode::OK,
            axum::Json(SwapResponse {
                result_image: as_url(&cached),
            }),
        )
            .into_response();
    }
    crate::metrics::record_cache_miss();

    // Stage normalized images into a scoped temp dir; removed on drop
    // whatever path this handler exits through.
    let staging = match tempfile::TempDir::new_in(&state.config.upload_dir) {
        Ok(dir) => dir,
        Err(e) => {
            tracing::warn!(error = %e, "failed to create staging directory");
            crate::metrics::record_swap("save_failed", start.elapsed().as_millis() as u64);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save output");
        }
    };

    let source_path = staging.path().join(staged_name(
        "source",
        source.filename.as_deref().unwrap_or_default(),
    ));
    let dest_path = staging.path().join(staged_name(
        "dest",
        dest.filename.as_deref().unwrap_or_default(),
    ));

    if tokio::fs::write(&source_path, &source_bytes).await.is_err()
        || tokio::fs::write(&dest_path, &dest_bytes).await.is_err()
    {
        tracing::warn!("failed to stage uploads");
        crate::metrics::record_swap("save_failed", start.elapsed().as_millis() as u64);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save output");
    }

    tracing::info!(%client_ip, source_face_index, dest_face_index, "invoking remote face swap");

    match state
        .remote
        .swap(&source_path, &dest_path, source_face_index, dest_face_index)
        .await
    {
        Ok(output_path) => {
            let output = output_path.to_string_lossy().into_owned();
            state.cache.insert(cache_key, output.clone());

            let duration_ms = start.elapsed().as_millis() as u64;
            crate::metrics::record_swap("success", duration_ms);
            tracing::info!(%client_ip, output = %output, duration_ms, "swap complete");

            (
                StatusCode::OK,
                axum::Json(SwapResponse {
                    result_image: as_url(&output),
                }),
            )
                .into_response()
        }
        Err(e) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            crate::metrics::record_swap(outcome_label(&e), duration_ms);
            tracing::warn!(%client_ip, error = %e, duration_ms, "swap failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.message())
        }
    }
}

/// Staged filename for an upload: role prefix, random token, original
/// extension (already validated as allowed).
fn staged_name(role: &str, original_filename: &str) -> String {
    let ext = original_filename
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_else(|| "png".to_string());
    format!("{}_{}.{}", role, image_ops::random_token(), ext)
}

/// Render a stored output path as a URL path with a single leading slash.
fn as_url(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let json = serde_json::to_string(&HealthResponse {
            status: "API is running",
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"API is running"}"#);
    }

    #[test]
    fn test_swap_response_serialization() {
        let json = serde_json::to_string(&SwapResponse {
            result_image: "/static/output/face_swap_ab.png".to_string(),
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"result_image":"/static/output/face_swap_ab.png"}"#
        );
    }

    #[test]
    fn test_error_response_serialization() {
        let json = serde_json::to_string(&ErrorResponse {
            error: "No file selected".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"error":"No file selected"}"#);
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.cache_ttl_seconds, 3600);
        assert_eq!(config.cache_max_entries, 100);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.max_image_dimension, 1024);
    }

    #[test]
    fn test_staged_name_keeps_extension() {
        let name = staged_name("source", "portrait.JPG");
        assert!(name.starts_with("source_"));
        assert!(name.ends_with(".jpg"));
    }

    #[test]
    fn test_as_url_single_slash() {
        assert_eq!(as_url("static/output/x.png"), "/static/output/x.png");
        assert_eq!(as_url("/abs/output/x.png"), "/abs/output/x.png");
    }
}

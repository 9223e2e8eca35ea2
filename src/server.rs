use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{
        HeaderMap, HeaderValue, Method,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;
use url::Url;

use crate::config::non_empty;
use crate::error::ApiError;
use crate::formats::{self, FormatBuckets};
use crate::temp::{self, CookieFile, GuardedFileStream, TempFileGuard};
use crate::tool::{MediaTool, ToolError};

const MAX_JSON_BODY_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub temp_dir: PathBuf,
    pub production: bool,
    pub tool: Arc<dyn MediaTool>,
}

impl AppState {
    fn environment(&self) -> &'static str {
        if self.production {
            "production"
        } else {
            "development"
        }
    }

    fn details(&self, details: String) -> Option<String> {
        if self.production { None } else { Some(details) }
    }

    fn tool_error(&self, fallback: &str, error: ToolError) -> ApiError {
        warn!("Media tool call failed: {error}");
        match error {
            ToolError::Failed { message } => ApiError::internal(message),
            other => ApiError::internal(fallback).with_details(self.details(other.to_string())),
        }
    }

    async fn cookie_file(&self, cookies: Option<&str>) -> Result<Option<CookieFile>, ApiError> {
        let Some(contents) = cookies.and_then(non_empty) else {
            return Ok(None);
        };

        CookieFile::create(&self.temp_dir, contents)
            .await
            .map(Some)
            .map_err(|error| {
                ApiError::internal("Could not prepare cookie file")
                    .with_details(self.details(error.to_string()))
            })
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/api/info", post(fetch_info))
        .route("/api/download", post(download))
        .layer(DefaultBodyLimit::max(MAX_JSON_BODY_BYTES))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
    environment: &'static str,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.environment(),
    })
}

#[derive(Debug, Deserialize)]
struct InfoRequest {
    url: Option<String>,
    cookies: Option<String>,
}

#[derive(Debug, Serialize)]
struct InfoResponse {
    title: String,
    formats: FormatBuckets,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<f64>,
}

async fn fetch_info(
    State(state): State<AppState>,
    Json(payload): Json<InfoRequest>,
) -> Result<Json<InfoResponse>, ApiError> {
    let url = payload
        .url
        .as_deref()
        .and_then(non_empty)
        .ok_or_else(|| ApiError::bad_request("URL is required"))?
        .to_string();

    // Dropped on every exit path below.
    let cookies = state.cookie_file(payload.cookies.as_deref()).await?;

    let info = state
        .tool
        .fetch_info(&url, cookies.as_ref().map(CookieFile::path))
        .await
        .map_err(|error| state.tool_error("Failed to fetch formats", error))?;

    let title = info
        .title
        .as_deref()
        .and_then(non_empty)
        .unwrap_or("Untitled")
        .to_string();

    Ok(Json(InfoResponse {
        title,
        formats: formats::partition(info.formats),
        platform: info.platform,
        thumbnail: info.thumbnail,
        duration: info.duration,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadRequest {
    url: Option<String>,
    format: Option<String>,
    quality: Option<String>,
    extract_audio: Option<bool>,
    cookies: Option<String>,
}

async fn download(
    State(state): State<AppState>,
    Json(payload): Json<DownloadRequest>,
) -> Result<Response, ApiError> {
    let (Some(url), Some(format)) = (
        payload.url.as_deref().and_then(non_empty),
        payload.format.as_deref().and_then(non_empty),
    ) else {
        return Err(ApiError::bad_request("URL and format are required"));
    };

    let is_audio = format == "audio" || payload.extract_audio.unwrap_or(false);
    let (ext, content_type, disposition) = if is_audio {
        ("mp3", "audio/mpeg", "attachment; filename=\"download.mp3\"")
    } else {
        ("mp4", "video/mp4", "attachment; filename=\"download.mp4\"")
    };
    let format_id = payload
        .quality
        .as_deref()
        .and_then(non_empty)
        .unwrap_or(if is_audio { "bestaudio" } else { "best" });

    let cookies = state.cookie_file(payload.cookies.as_deref()).await?;

    // Created before the bridge call so a failed download still deletes any
    // partial output when the guard drops.
    let guard = TempFileGuard::new(temp::media_path(&state.temp_dir, ext));

    state
        .tool
        .download(
            url,
            format_id,
            guard.path(),
            is_audio,
            cookies.as_ref().map(CookieFile::path),
        )
        .await
        .map_err(|error| state.tool_error("Download failed", error))?;

    let file = File::open(guard.path()).await.map_err(|error| {
        ApiError::internal("Could not read downloaded file")
            .with_details(state.details(error.to_string()))
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(CONTENT_DISPOSITION, HeaderValue::from_static(disposition));

    let body = Body::from_stream(GuardedFileStream::new(file, guard));
    Ok((headers, body).into_response())
}

/// Extension origins are always allowed; anything else must match the
/// configured allow-list. GET/POST only.
pub fn build_cors_layer(configured: &[String]) -> Result<CorsLayer, ApiError> {
    let mut allowed = HashSet::new();
    for origin in configured {
        let normalized = normalize_origin(origin).ok_or_else(|| {
            ApiError::internal(format!(
                "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://domain.com"
            ))
        })?;
        allowed.insert(normalized);
    }

    if allowed.is_empty() {
        warn!("ALLOWED_ORIGINS not set. Only extension origins will be allowed.");
    }

    let allowed = Arc::new(allowed);
    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let Ok(value) = origin.to_str() else {
            return false;
        };
        if is_extension_origin(value) {
            return true;
        }
        normalize_origin(value).is_some_and(|normalized| allowed.contains(&normalized))
    });

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([CONTENT_DISPOSITION]))
}

fn is_extension_origin(value: &str) -> bool {
    value.starts_with("chrome-extension://") || value.starts_with("moz-extension://")
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };
    let port = parsed.port();

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    let include_port = port.is_some_and(|explicit| explicit != default_port);

    if include_port {
        Some(format!("{scheme}://{host}:{}", port?))
    } else {
        Some(format!("{scheme}://{host}"))
    }
}

//! Minimal HTTP serving surface (spec.md §6.2). Intentionally thin: no middleware stack, no
//! auth, no metrics endpoint — serving pre-built gzip artifacts and one redirect is the
//! entire surface.

use axum::extract::{Path as AxumPath, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use bulkapi_core::RequestKey;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub base_dir: Arc<PathBuf>,
}

pub fn router(base_dir: PathBuf) -> Router {
    let state = AppState {
        base_dir: Arc::new(base_dir),
    };
    Router::new()
        // `name` may be a bare site name (`site`) or its image-preview counterpart
        // (`site_images`); both resolve to `<base_dir>/<name>.json.gz`.
        .route("/bulk/:name", get(serve_artifact).head(serve_artifact))
        .route(
            "/static_json_gzip/cache/:fp",
            get(serve_cache_entry).head(serve_cache_entry),
        )
        .route("/fetch", get(fetch_redirect))
        .with_state(state)
}

/// Requires `gzip` in the request's `Accept-Encoding`; serves `<base_dir>/<name>.json.gz` with
/// `Content-Encoding: gzip`, `Content-Type: application/json`, an `Age` header computed from
/// the file's mtime, and a permissive CORS header, matching the original's static responder.
async fn serve_artifact(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let artifact_name = sanitize_artifact_name(&name);
    let path = state.base_dir.join(format!("{artifact_name}.json.gz"));
    serve_gz_file(&path, method, headers).await
}

/// Backs the `/fetch` redirect target: `fp` is `<fingerprint-hex>.json` (matching what
/// `fetch_redirect` hands back in `Location`); the entry actually on disk is the same
/// fingerprint's flat `cache/<fp>.json.gz` file (spec.md §6).
async fn serve_cache_entry(
    State(state): State<AppState>,
    AxumPath(fp): AxumPath<String>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let fp_hex = sanitize_artifact_name(fp.strip_suffix(".json").unwrap_or(&fp));
    let path = state.base_dir.join("cache").join(format!("{fp_hex}.json.gz"));
    serve_gz_file(&path, method, headers).await
}

async fn serve_gz_file(path: &std::path::Path, method: Method, headers: HeaderMap) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let accepts_gzip = headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("gzip"))
        .unwrap_or(false);
    if !accepts_gzip {
        return (StatusCode::BAD_REQUEST, "client must accept gzip").into_response();
    }

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };

    let age = metadata
        .modified()
        .ok()
        .and_then(|m| std::time::SystemTime::now().duration_since(m).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response_headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    if let Ok(age_value) = HeaderValue::from_str(&age.to_string()) {
        response_headers.insert(header::AGE, age_value);
    }

    if method == Method::HEAD {
        if let Ok(len_value) = HeaderValue::from_str(&metadata.len().to_string()) {
            response_headers.insert(header::CONTENT_LENGTH, len_value);
        }
        return (StatusCode::OK, response_headers).into_response();
    }

    match std::fs::read(path) {
        Ok(bytes) => (StatusCode::OK, response_headers, bytes).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

fn sanitize_artifact_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// `GET /fetch?url=...&method=...` builds a `RequestKey`, computes its cache fingerprint, and
/// issues a 302 to `/static_json_gzip/cache/<fp>.json`, letting the route above serve the
/// pre-cached body through the same flat `cache/` directory `DiskCache` writes to, instead of
/// this process re-issuing the request itself.
async fn fetch_redirect(
    axum::extract::Query(params): axum::extract::Query<std::collections::HashMap<String, String>>,
) -> Response {
    let Some(url) = params.get("url") else {
        return (StatusCode::BAD_REQUEST, "missing `url` query parameter").into_response();
    };
    let method = params
        .get("method")
        .cloned()
        .unwrap_or_else(|| "GET".to_string());
    let key = RequestKey::get(url.clone());
    let key = RequestKey { method, ..key };
    let fp_hex = key.fingerprint_hex();
    Redirect::found(&format!("/static_json_gzip/cache/{fp_hex}.json")).into_response()
}

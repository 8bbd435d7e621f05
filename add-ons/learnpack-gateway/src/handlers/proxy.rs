//! Fallback handler: every request that is not a gateway route goes through the cache
//! controller, and is proxied upstream when the controller passes it through.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use learnpack_core::{CachedResponse, Destination, Dispatch, FetchRequest, StrategyError};

use crate::AppState;

/// Largest request body forwarded upstream.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Tells the page where a response came from.
pub(crate) const SOURCE_HEADER: &str = "x-learnpack-source";

const HOP_HEADERS: [&str; 5] = [
    "connection",
    "transfer-encoding",
    "keep-alive",
    "content-length",
    "upgrade",
];

pub(crate) async fn intercept(State(state): State<AppState>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = state.controller.settings().resolve(path_and_query);

    let mut request = FetchRequest::get(url).with_method(parts.method.as_str());
    request.navigate = is_navigation(&parts.headers, request.is_get());
    request.destination = destination(&parts.headers, &request);
    for (name, value) in parts.headers.iter() {
        if let Ok(v) = value.to_str() {
            request.headers.push((name.as_str().to_string(), v.to_string()));
        }
    }
    if !request.is_get() {
        match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
            Ok(bytes) if !bytes.is_empty() => request.body = Some(bytes.to_vec()),
            Ok(_) => {}
            Err(e) => {
                return error_response(StatusCode::PAYLOAD_TOO_LARGE, "body_rejected", &e.to_string());
            }
        }
    }

    match state.controller.handle_fetch(&request).await {
        Ok(Dispatch::Served(served)) => to_response(served.response, served.source.as_str()),
        Ok(Dispatch::Passthrough) => match state.fetcher.fetch(&request).await {
            Ok(response) => to_response(response, "passthrough"),
            Err(e) => {
                tracing::warn!(target: "learnpack::gateway", url = %request.url, error = %e, "Upstream unreachable");
                error_response(StatusCode::BAD_GATEWAY, "upstream_unreachable", &e.to_string())
            }
        },
        Err(StrategyError::Unavailable { url, source }) => {
            tracing::debug!(target: "learnpack::gateway", url = %url, error = %source, "No network and no cached copy");
            error_response(StatusCode::GATEWAY_TIMEOUT, "offline", &source.to_string())
        }
    }
}

/// `Sec-Fetch-Mode: navigate`, or an HTML `Accept` from a client without fetch metadata.
fn is_navigation(headers: &HeaderMap, is_get: bool) -> bool {
    if let Some(mode) = headers.get("sec-fetch-mode").and_then(|v| v.to_str().ok()) {
        return mode.eq_ignore_ascii_case("navigate");
    }
    is_get
        && headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |accept| accept.contains("text/html"))
}

fn destination(headers: &HeaderMap, request: &FetchRequest) -> Destination {
    match headers.get("sec-fetch-dest").and_then(|v| v.to_str().ok()) {
        Some(dest) => Destination::from_fetch_dest(dest),
        None if request.navigate => Destination::Document,
        None => Destination::guess_from_path(&request.path),
    }
}

fn to_response(snapshot: CachedResponse, source: &'static str) -> Response {
    let status = StatusCode::from_u16(snapshot.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::new(Body::from(snapshot.body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    for (name, value) in &snapshot.headers {
        if HOP_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    headers.insert(SOURCE_HEADER, HeaderValue::from_static(source));
    response
}

fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (
        status,
        axum::Json(serde_json::json!({ "error": error, "message": message })),
    )
        .into_response()
}

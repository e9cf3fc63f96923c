//! A proxy that fetches JSON from another site, validates it, optionally
//! localizes it as a MapRoot, and returns it as HTML-safe JSON or JSONP.

use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, FromRequestParts, Query, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map as JsonObject, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::AppState;

/// JSON wrapped in a function call. `\w+` is broader than a JavaScript
/// identifier, which is fine since the call is being removed.
static JSON_CALLBACK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\w+\((.*)\)[\s;]*$").expect("valid regex"));

static CALLBACK_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w.$]+$").expect("valid regex"));

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// A failure reported to the client as a status code and a plain message.
#[derive(Debug, Error, PartialEq)]
#[error("{message}")]
pub struct ProxyError {
    pub status: StatusCode,
    pub message: &'static str,
}

impl ProxyError {
    fn new(status: StatusCode, message: &'static str) -> Self {
        Self { status, message }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

/// The connecting client's address, or `0.0.0.0` when the server was not
/// started with connect info.
pub struct ClientIp(pub IpAddr);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        Ok(ClientIp(ip))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct JsonpParams {
    pub url: String,
    /// When non-empty, POSTed to `url` as `application/json`.
    pub post_json: String,
    pub no_cache: String,
    pub callback: String,
    /// Language to localize the fetched MapRoot to.
    pub hl: String,
}

pub async fn jsonp_handler(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Query(params): Query<JsonpParams>,
) -> Response {
    match respond(&state, ip, &params).await {
        Ok(response) => response,
        Err(e) => {
            debug!(status = e.status.as_u16(), error = %e, url = %params.url, "JSON proxy request failed");
            e.into_response()
        }
    }
}

async fn respond(state: &AppState, ip: IpAddr, params: &JsonpParams) -> Result<Response, ProxyError> {
    if !params.callback.is_empty() && !CALLBACK_NAME_RE.is_match(&params.callback) {
        return Err(ProxyError::new(StatusCode::BAD_REQUEST, "Invalid callback."));
    }
    let use_cache = params.no_cache.is_empty();
    let mut data = fetch_json(state, &params.url, &params.post_json, use_cache, ip).await?;
    if !params.hl.is_empty() {
        localize_map_root(&mut data, &params.hl);
    }
    let output = to_html_safe_json(&data);
    let response = if params.callback.is_empty() {
        ([(header::CONTENT_TYPE, "application/json")], output).into_response()
    } else {
        (
            [(header::CONTENT_TYPE, "application/javascript")],
            format!("{}({output})", params.callback),
        )
            .into_response()
    };
    Ok(response)
}

/// Fetches `url` (POSTing `post_json` if non-empty), parses the body as JSON
/// and caches the parsed value. Only actual fetches count against the
/// client's rate limit.
pub async fn fetch_json(
    state: &AppState,
    url: &str,
    post_json: &str,
    use_cache: bool,
    ip: IpAddr,
) -> Result<Value, ProxyError> {
    let url = sanitize_url(url)?;
    let cache_key = (url.as_str(), post_json);
    if use_cache {
        if let Some(value) = state.jsonp_cache.get(&cache_key) {
            return Ok(value);
        }
    }

    assert_rate_limit_not_exceeded(state, ip).await?;
    let request = if post_json.is_empty() {
        state.http.get(&url)
    } else {
        state
            .http
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(post_json.to_string())
    };
    let response = request.send().await.map_err(|e| {
        warn!(url = %url, error = %e, "Upstream fetch failed");
        ProxyError::new(StatusCode::BAD_GATEWAY, "Request failed.")
    })?;
    let status = response.status();
    if status != StatusCode::OK {
        return Err(ProxyError::new(status, "Request failed."));
    }
    let body = read_body(response, state.config.jsonp_max_body_bytes, &url).await?;

    let value = parse_json(&body)?;
    state.jsonp_cache.set(&cache_key, value.clone());
    Ok(value)
}

/// Reads the upstream body, giving up once it exceeds `limit` bytes.
async fn read_body(
    mut response: reqwest::Response,
    limit: usize,
    url: &str,
) -> Result<String, ProxyError> {
    let too_large = || {
        warn!(url, limit, "Upstream body too large");
        ProxyError::new(StatusCode::BAD_GATEWAY, "Response too large.")
    };
    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Err(too_large());
    }
    let mut body = Vec::new();
    loop {
        let chunk = response.chunk().await.map_err(|e| {
            warn!(url, error = %e, "Upstream body unreadable");
            ProxyError::new(StatusCode::BAD_GATEWAY, "Request failed.")
        })?;
        let Some(chunk) = chunk else {
            break;
        };
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    String::from_utf8(body).map_err(|_| ProxyError::new(StatusCode::FORBIDDEN, "Invalid JSON."))
}

/// Accepts only http(s) URLs whose host contains a dot; drops the fragment.
pub fn sanitize_url(raw: &str) -> Result<String, ProxyError> {
    let invalid = || ProxyError::new(StatusCode::BAD_REQUEST, "Missing or invalid URL.");
    let mut url = url::Url::parse(raw.trim()).map_err(|_| invalid())?;
    let host_ok = url.host_str().is_some_and(|host| host.contains('.'));
    if !matches!(url.scheme(), "http" | "https") || !host_ok {
        return Err(invalid());
    }
    url.set_fragment(None);
    Ok(url.into())
}

/// Parses JSON, or JSONP with its callback wrapper removed.
pub fn parse_json(body: &str) -> Result<Value, ProxyError> {
    let json = JSON_CALLBACK_RE
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map_or(body, |m| m.as_str());
    serde_json::from_str(json).map_err(|_| ProxyError::new(StatusCode::FORBIDDEN, "Invalid JSON."))
}

async fn assert_rate_limit_not_exceeded(state: &AppState, ip: IpAddr) -> Result<(), ProxyError> {
    let mut limiter = state.rate_limiter.lock().await;
    if limiter.len() > 1000 {
        prune_empty_entries(&mut limiter);
    }
    let entries = limiter.entry(ip).or_default();
    if check_rate_limit(entries, Instant::now(), state.config.jsonp_max_qpm) {
        Ok(())
    } else {
        warn!(ip = %ip, "JSON proxy rate limit exceeded");
        Err(ProxyError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded; please try again later.",
        ))
    }
}

/// Records a fetch at `now` unless `max_per_minute` fetches already fall
/// inside the window. Expired timestamps are pruned.
pub fn check_rate_limit(entries: &mut Vec<Instant>, now: Instant, max_per_minute: usize) -> bool {
    entries.retain(|t| now.duration_since(*t) < RATE_LIMIT_WINDOW);
    if entries.len() >= max_per_minute {
        return false;
    }
    entries.push(now);
    true
}

fn prune_empty_entries(limiter: &mut std::collections::HashMap<IpAddr, Vec<Instant>>) {
    let now = Instant::now();
    limiter.retain(|_, entries| {
        entries.retain(|t| now.duration_since(*t) < RATE_LIMIT_WINDOW);
        !entries.is_empty()
    });
}

/// Serializes with `&`, `<` and `>` escaped so the output can be embedded
/// in a `<script>` element.
pub fn to_html_safe_json(value: &Value) -> String {
    value
        .to_string()
        .replace('&', "\\u0026")
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
}

/// Merges the `lang` localization into a MapRoot and its layers, in place,
/// and discards every other localization.
pub fn localize_map_root(map_root: &mut Value, lang: &str) {
    let Some(root) = map_root.as_object_mut() else {
        return;
    };
    if let Some(localized) = pop_localized_child(root, "map_root", lang) {
        root.extend(localized);
    }
    if let Some(Value::Array(layers)) = root.get_mut("layers") {
        for layer in layers {
            localize_layer(layer, lang);
        }
    }
}

fn localize_layer(layer: &mut Value, lang: &str) {
    let Some(fields) = layer.as_object_mut() else {
        return;
    };
    if let Some(localized) = pop_localized_child(fields, "layer", lang) {
        fields.extend(localized);
    }
    if let Some(Value::Array(sublayers)) = fields.get_mut("sublayers") {
        for sublayer in sublayers {
            localize_layer(sublayer, lang);
        }
    }
}

/// Removes `localized_{field}s` from `parent` and returns the `field` object
/// of the entry whose `language` is `lang`.
fn pop_localized_child(
    parent: &mut JsonObject<String, Value>,
    field: &str,
    lang: &str,
) -> Option<JsonObject<String, Value>> {
    let Value::Array(localizations) = parent.remove(&format!("localized_{field}s"))? else {
        return None;
    };
    let mut localization = localizations
        .into_iter()
        .find(|l| l.get("language").and_then(Value::as_str) == Some(lang))?;
    match localization.get_mut(field).map(Value::take) {
        Some(Value::Object(child)) => Some(child),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_url_accepts_dotted_http_hosts() {
        assert_eq!(
            sanitize_url("http://example.com/feed?x=1#frag").unwrap(),
            "http://example.com/feed?x=1"
        );
        assert!(sanitize_url("https://a.b/").is_ok());
    }

    #[test]
    fn sanitize_url_rejects_everything_else() {
        for bad in ["", "ftp://example.com/", "http://localhost/", "javascript:alert(1)", "example.com"] {
            let err = sanitize_url(bad).unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST, "{bad}");
            assert_eq!(err.message, "Missing or invalid URL.");
        }
    }

    #[test]
    fn parse_json_strips_callback() {
        assert_eq!(parse_json("cb({\"a\": 1});\n").unwrap(), json!({"a": 1}));
        assert_eq!(parse_json("[1, 2]").unwrap(), json!([1, 2]));
        assert_eq!(parse_json("cb(\n[\n1\n]\n)").unwrap(), json!([1]));
    }

    #[test]
    fn parse_json_rejects_garbage() {
        let err = parse_json("<html>nope</html>").unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.message, "Invalid JSON.");
    }

    #[test]
    fn html_safe_json_escapes_markup() {
        let out = to_html_safe_json(&json!({"s": "<b>&</b>"}));
        assert_eq!(out, r#"{"s":"\u003cb\u003e\u0026\u003c/b\u003e"}"#);
    }

    #[test]
    fn localizes_map_root_and_nested_layers() {
        let mut root = json!({
            "title": "Hello",
            "localized_map_roots": [
                {"language": "de", "map_root": {"title": "Hallo"}},
                {"language": "fr", "map_root": {"title": "Bonjour"}}
            ],
            "layers": [{
                "title": "Layer",
                "localized_layers": [{"language": "fr", "layer": {"title": "Couche"}}],
                "sublayers": [{
                    "title": "Sub",
                    "localized_layers": [{"language": "fr", "layer": {"title": "Sous-couche"}}]
                }]
            }]
        });
        localize_map_root(&mut root, "fr");
        assert_eq!(
            root,
            json!({
                "title": "Bonjour",
                "layers": [{
                    "title": "Couche",
                    "sublayers": [{"title": "Sous-couche"}]
                }]
            })
        );
    }

    #[test]
    fn unknown_language_only_drops_localizations() {
        let mut root = json!({
            "title": "Hello",
            "localized_map_roots": [{"language": "fr", "map_root": {"title": "Bonjour"}}]
        });
        localize_map_root(&mut root, "es");
        assert_eq!(root, json!({"title": "Hello"}));
    }

    #[test]
    fn rate_limit_window_slides() {
        let start = Instant::now();
        let mut entries = Vec::new();
        assert!(check_rate_limit(&mut entries, start, 2));
        assert!(check_rate_limit(&mut entries, start, 2));
        assert!(!check_rate_limit(&mut entries, start + Duration::from_secs(30), 2));
        assert!(check_rate_limit(&mut entries, start + Duration::from_secs(61), 2));
        assert_eq!(entries.len(), 1);
    }
}

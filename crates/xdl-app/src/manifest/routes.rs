//! HTTP handlers for the manifest server

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use xdl_core::prelude::*;
use xdl_core::{read_config, LogLevel, LogRecord, LogTag};

use super::build::{build_manifest, unsigned_envelope, ManifestOwner, ManifestRequest};
use super::ServerState;
use crate::config::{read_packager_info, read_settings};
use crate::url::UrlContext;
use crate::validator::validate_and_report;

const SERVER_NAME: &str = "xdl";

pub(super) fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/", get(manifest))
        .route("/manifest", get(manifest))
        .route("/index.exp", get(manifest))
        .route("/logs", post(logs))
        .route("/shutdown", post(shutdown))
        .with_state(state)
}

async fn manifest(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    match manifest_response(&state, &headers).await {
        Ok(response) => response,
        Err(e) => {
            error!("Manifest request failed: {}", e);
            state.deps.sink.error(format!("Error serving manifest: {e}"));
            let status = StatusCode::from_u16(520).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

async fn manifest_response(state: &ServerState, headers: &HeaderMap) -> Result<Response> {
    let deps = &state.deps;
    let request = ManifestRequest {
        platform: header_str(headers, "exponent-platform").map(str::to_string),
        request_host: header_str(headers, "host").map(strip_port),
    };

    let config = read_config(&deps.root)?;
    {
        let validator = deps.validator.clone();
        let config = config.clone();
        let sink = deps.sink.clone();
        tokio::task::spawn_blocking(move || {
            validate_and_report(validator.as_ref(), &config, &sink);
        });
    }

    let ctx = UrlContext {
        root: deps.root.clone(),
        settings: read_settings(&deps.root),
        packager_info: read_packager_info(&deps.root),
        exp: config.exp.clone(),
        env: deps.url_env.clone(),
        offline: deps.offline,
    };

    let session = if deps.offline {
        None
    } else {
        deps.users.session().await
    };
    let client_id = deps.users.settings().client_id()?;
    let owner = match &session {
        Some(session) => ManifestOwner::User(session.username.clone()),
        None => ManifestOwner::Anonymous {
            client_id: client_id.clone(),
        },
    };

    let manifest = Value::Object(build_manifest(
        &ctx,
        &config,
        &request,
        &deps.developer_tool,
        &owner,
    )?);
    let manifest_string = serde_json::to_string(&manifest)?;

    let body = if headers.contains_key("exponent-accept-signature") {
        match &session {
            None => unsigned_envelope(&manifest_string),
            Some(session) => {
                let cached = state.signed_cache.lock().await.get(&manifest_string).cloned();
                match cached {
                    Some(signed) => signed,
                    None => {
                        let owner = manifest
                            .get("owner")
                            .and_then(Value::as_str)
                            .unwrap_or(session.username.as_str());
                        let slug = config.exp.slug.as_deref().unwrap_or_default();
                        let signed = deps
                            .users
                            .api_for(Some(session))
                            .sign_manifest(owner, slug, &manifest)
                            .await?;
                        state
                            .signed_cache
                            .lock()
                            .await
                            .insert(manifest_string.clone(), signed.clone());
                        signed
                    }
                }
            }
        }
    } else {
        manifest_string
    };

    let server_header = json!({
        "host": client_id,
        "server": SERVER_NAME,
        "serverVersion": env!("CARGO_PKG_VERSION"),
    })
    .to_string();

    let mut response = body.into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Ok(value) = HeaderValue::from_str(&server_header) {
        response_headers.insert("Exponent-Server", value);
    }
    Ok(response)
}

/// One entry of a device log batch
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceLogEntry {
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    body: Value,
    #[serde(default)]
    group_depth: Option<u32>,
    #[serde(default)]
    should_hide: bool,
    #[serde(default)]
    includes_stack: bool,
}

async fn logs(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> &'static str {
    let device_id = header_str(&headers, "device-id").unwrap_or_default().to_string();
    let device_name = header_str(&headers, "device-name")
        .unwrap_or_default()
        .to_string();

    match serde_json::from_slice::<Vec<DeviceLogEntry>>(&body) {
        Ok(entries) => {
            for entry in entries {
                let tag = LogTag::Device {
                    device_id: device_id.clone(),
                    device_name: device_name.clone(),
                    group_depth: entry.group_depth,
                    should_hide: entry.should_hide,
                    includes_stack: entry.includes_stack,
                };
                let level = entry
                    .level
                    .as_deref()
                    .map_or(LogLevel::Info, LogLevel::from_device);
                state
                    .deps
                    .sink
                    .emit(LogRecord::new(level, tag, device_log_message(&entry.body)));
            }
        }
        Err(e) => debug!("Ignoring malformed device log batch: {}", e),
    }
    "Success"
}

/// A device log body is a string or an array of values joined by spaces
fn device_log_message(body: &Value) -> String {
    match body {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(|part| match part {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

async fn shutdown(State(state): State<Arc<ServerState>>) -> &'static str {
    info!("Manifest server shutdown requested");
    state.shutdown_tx.send_replace(true);
    "Success"
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `host:port` → `host`, keeping bracketed IPv6 literals intact
fn strip_port(host: &str) -> String {
    if let Some(rest) = host.strip_prefix('[') {
        if let Some((addr, _)) = rest.split_once(']') {
            return addr.to_string();
        }
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name.to_string()
        }
        _ => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("192.168.1.2:19000"), "192.168.1.2");
        assert_eq!(strip_port("localhost"), "localhost");
        assert_eq!(strip_port("[::1]:19000"), "::1");
    }

    #[test]
    fn test_device_log_message() {
        assert_eq!(device_log_message(&json!("hello")), "hello");
        assert_eq!(
            device_log_message(&json!(["count", 3, {"a": true}])),
            "count 3 {\"a\":true}"
        );
    }
}

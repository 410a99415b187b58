//! Remote API client
//!
//! Every endpoint takes a JSON body and answers with either
//! `{"data": ...}` or `{"errors": [{"code": ..., "message": ...}]}`.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use xdl_core::prelude::*;

use crate::config::ApiSettings;

const SESSION_HEADER: &str = "Expo-Session";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of `auth/loginAsync`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
    pub session_secret: String,
}

/// Result of `auth/userInfo`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    pub username: String,
    #[serde(alias = "userId", alias = "user_id")]
    pub id: String,
    #[serde(default, rename = "accessToken")]
    pub access_token: Option<String>,
    #[serde(default, rename = "idToken")]
    pub id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Option<Vec<ApiErrorBody>>,
}

/// Client for `https://exp.host/--/api/v2/`
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    session_secret: Option<String>,
}

impl ApiClient {
    /// `base_url` must end in `/`
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
            session_secret: None,
        }
    }

    pub fn from_settings(settings: &ApiSettings) -> Self {
        Self::new(settings.base_url())
    }

    /// Authenticate subsequent calls with `secret`
    pub fn with_session(mut self, secret: Option<String>) -> Self {
        self.session_secret = secret;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_session(&self) -> bool {
        self.session_secret.is_some()
    }

    /// `POST {base}{method}` and unwrap the `data` envelope
    pub async fn post(&self, method: &str, body: Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, method);
        trace!("POST {}", url);

        let mut request = self.http.post(&url).json(&body);
        if let Some(secret) = &self.session_secret {
            request = request.header(SESSION_HEADER, secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::network(format!("could not reach {url}: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::network(format!("failed reading response from {url}: {e}")))?;

        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(Error::api(status.as_str(), truncate(&text)));
            }
            Err(e) => {
                return Err(Error::malformed(format!("{method}: {e}")));
            }
        };

        if let Some(first) = envelope.errors.and_then(|errors| errors.into_iter().next()) {
            return Err(Error::api(
                first.code.unwrap_or_else(|| "API_ERROR".to_string()),
                first
                    .message
                    .unwrap_or_else(|| format!("{method} failed with {status}")),
            ));
        }
        if !status.is_success() {
            return Err(Error::api(status.as_str(), format!("{method} failed")));
        }
        envelope
            .data
            .ok_or_else(|| Error::malformed(format!("{method}: response has no data")))
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResult> {
        let data = self
            .post(
                "auth/loginAsync",
                json!({"username": username, "password": password}),
            )
            .await?;
        decode("auth/loginAsync", data)
    }

    pub async fn logout(&self) -> Result<()> {
        self.post("auth/logout", json!({})).await.map(|_| ())
    }

    pub async fn user_info(&self) -> Result<UserInfo> {
        let data = self.post("auth/userInfo", json!({})).await?;
        decode("auth/userInfo", data)
    }

    /// Ask the server to sign a manifest; returns the signed envelope string
    pub async fn sign_manifest(
        &self,
        remote_username: &str,
        remote_package_name: &str,
        manifest: &Value,
    ) -> Result<String> {
        let data = self
            .post(
                "manifest/sign",
                json!({
                    "args": {
                        "remoteUsername": remote_username,
                        "remotePackageName": remote_package_name,
                    },
                    "manifest": manifest,
                }),
            )
            .await?;
        match data.get("response") {
            Some(Value::String(signed)) => Ok(signed.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(Error::malformed("manifest/sign: missing response")),
        }
    }

    pub async fn notify_alive(&self, session: Value) -> Result<()> {
        self.post(
            "development-sessions/notify-alive",
            json!({"data": {"session": session}}),
        )
        .await
        .map(|_| ())
    }
}

fn decode<T: serde::de::DeserializeOwned>(method: &str, data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| Error::malformed(format!("{method}: {e}")))
}

fn truncate(text: &str) -> String {
    const MAX: usize = 200;
    match text.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

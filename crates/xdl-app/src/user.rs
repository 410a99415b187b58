//! User session management
//!
//! [`UserManager`] caches the logged-in user in memory and mirrors it to
//! `state.json`. The cache sits behind an async mutex held across the profile
//! fetch, so concurrent callers wait for one fetch instead of issuing several.

use tokio::sync::Mutex;
use xdl_core::prelude::*;

use crate::api::ApiClient;
use crate::config::{UserAuthSession, UserSettings};

pub struct UserManager {
    settings: UserSettings,
    api: ApiClient,
    offline: bool,
    current: Mutex<Option<UserAuthSession>>,
}

impl UserManager {
    /// `api` is the unauthenticated client; sessions are attached per call
    pub fn new(settings: UserSettings, api: ApiClient, offline: bool) -> Self {
        Self {
            settings,
            api,
            offline,
            current: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &UserSettings {
        &self.settings
    }

    /// API client authenticated as `session`
    pub fn api_for(&self, session: Option<&UserAuthSession>) -> ApiClient {
        self.api
            .clone()
            .with_session(session.map(|s| s.session_secret.clone()))
    }

    /// Log in, fetch the profile and persist the session
    pub async fn login(&self, username: &str, password: &str) -> Result<UserAuthSession> {
        if self.offline {
            return Err(Error::network("cannot log in while offline"));
        }
        let mut current = self.current.lock().await;
        let login = self.api.login(username, password).await?;
        let info = self
            .api
            .clone()
            .with_session(Some(login.session_secret.clone()))
            .user_info()
            .await?;

        let session = UserAuthSession {
            username: info.username,
            user_id: info.id,
            session_secret: login.session_secret,
            access_token: info.access_token,
            id_token: info.id_token,
        };
        self.settings.set_auth(Some(&session))?;
        info!("Logged in as {}", session.username);
        *current = Some(session.clone());
        Ok(session)
    }

    /// Forget the session locally; a failed remote logout is only logged
    pub async fn logout(&self) -> Result<()> {
        let mut current = self.current.lock().await;
        let session = current.take().or_else(|| self.settings.auth());
        if let Some(session) = &session {
            if !self.offline {
                if let Err(e) = self.api_for(Some(session)).logout().await {
                    warn!("Remote logout failed: {}", e);
                }
            }
        }
        self.settings.set_auth(None)?;
        Ok(())
    }

    /// The cached or persisted session, without touching the network
    pub async fn session(&self) -> Option<UserAuthSession> {
        let current = self.current.lock().await;
        current.clone().or_else(|| self.settings.auth())
    }

    /// The current user, refreshing the profile once per manager.
    ///
    /// An unreachable server keeps the persisted session; a rejected one is
    /// cleared.
    pub async fn current_user(&self) -> Result<Option<UserAuthSession>> {
        let mut current = self.current.lock().await;
        if let Some(session) = current.as_ref() {
            return Ok(Some(session.clone()));
        }
        let Some(stored) = self.settings.auth() else {
            return Ok(None);
        };
        if self.offline {
            *current = Some(stored.clone());
            return Ok(Some(stored));
        }

        match self.api_for(Some(&stored)).user_info().await {
            Ok(info) => {
                let refreshed = UserAuthSession {
                    username: info.username,
                    user_id: info.id,
                    session_secret: stored.session_secret,
                    access_token: info.access_token.or(stored.access_token),
                    id_token: info.id_token.or(stored.id_token),
                };
                if let Err(e) = self.settings.set_auth(Some(&refreshed)) {
                    warn!("Failed to persist refreshed session: {}", e);
                }
                *current = Some(refreshed.clone());
                Ok(Some(refreshed))
            }
            Err(e @ Error::Network { .. }) => {
                warn!("Could not refresh profile, using stored session: {}", e);
                *current = Some(stored.clone());
                Ok(Some(stored))
            }
            Err(Error::Api { code, message }) => {
                info!("Stored session rejected ({}: {}), logging out", code, message);
                self.settings.set_auth(None)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn ensure_logged_in(&self) -> Result<UserAuthSession> {
        self.current_user().await?.ok_or(Error::NotLoggedIn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use tempfile::tempdir;

    async fn fake_api(calls: Arc<AtomicUsize>) -> ApiClient {
        let router = Router::new()
            .route(
                "/--/api/v2/auth/loginAsync",
                post(|| async { Json(json!({"data": {"sessionSecret": "secret-1"}})) }),
            )
            .route(
                "/--/api/v2/auth/logout",
                post(|| async { Json(json!({"data": {}})) }),
            )
            .route(
                "/--/api/v2/auth/userInfo",
                post(move |headers: HeaderMap| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        match headers.get("expo-session").and_then(|v| v.to_str().ok()) {
                            Some("revoked") => (
                                StatusCode::UNAUTHORIZED,
                                Json(json!({"errors": [{"code": "UNAUTHORIZED", "message": "bad session"}]})),
                            )
                                .into_response(),
                            _ => Json(json!({"data": {"username": "jane", "id": "u-1"}}))
                                .into_response(),
                        }
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        ApiClient::new(format!("http://{addr}/--/api/v2/"))
    }

    fn stored(secret: &str) -> UserAuthSession {
        UserAuthSession {
            username: "old-name".into(),
            user_id: "u-1".into(),
            session_secret: secret.into(),
            access_token: None,
            id_token: None,
        }
    }

    #[tokio::test]
    async fn test_login_persists_session() {
        let temp = tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = UserManager::new(
            UserSettings::new(temp.path()),
            fake_api(calls).await,
            false,
        );

        let session = manager.login("jane", "pw").await.unwrap();
        assert_eq!(session.username, "jane");
        assert_eq!(session.session_secret, "secret-1");
        assert_eq!(UserSettings::new(temp.path()).auth(), Some(session.clone()));
        assert_eq!(manager.ensure_logged_in().await.unwrap(), session);

        manager.logout().await.unwrap();
        assert!(UserSettings::new(temp.path()).auth().is_none());
        assert!(matches!(
            manager.ensure_logged_in().await.unwrap_err(),
            Error::NotLoggedIn
        ));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let temp = tempdir().unwrap();
        let settings = UserSettings::new(temp.path());
        settings.set_auth(Some(&stored("good"))).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(UserManager::new(settings, fake_api(calls.clone()).await, false));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.current_user().await })
            })
            .collect();
        for handle in handles {
            let user = handle.await.unwrap().unwrap().unwrap();
            assert_eq!(user.username, "jane");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_session_is_cleared() {
        let temp = tempdir().unwrap();
        let settings = UserSettings::new(temp.path());
        settings.set_auth(Some(&stored("revoked"))).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = UserManager::new(settings, fake_api(calls).await, false);

        assert!(manager.current_user().await.unwrap().is_none());
        assert!(UserSettings::new(temp.path()).auth().is_none());
    }

    #[tokio::test]
    async fn test_offline_uses_stored_session() {
        let temp = tempdir().unwrap();
        let settings = UserSettings::new(temp.path());
        settings.set_auth(Some(&stored("good"))).unwrap();
        let manager = UserManager::new(settings, ApiClient::new("http://127.0.0.1:9/"), true);

        let user = manager.current_user().await.unwrap().unwrap();
        assert_eq!(user.username, "old-name");
        assert!(manager.login("jane", "pw").await.is_err());
    }
}

//! Session store: the authenticated identity and its lifecycle.
//!
//! Sign-in and sign-up go to the external identity provider's password-grant
//! endpoints; the backend only ever sees the resulting bearer token. The
//! store is created once at startup and injected into everything that needs
//! the token. Identity transitions are broadcast over a watch channel so the
//! interactive surface can react; failed authentication attempts never touch
//! the current identity.

use shared::{ApiError, AuthErrorBody, AuthUser, CredentialsRequest, TokenResponse};
use tokio::sync::watch;

/// Signed-in user plus the bearer token the backend expects
#[derive(Debug, Clone)]
pub struct Identity {
    pub user: AuthUser,
    pub access_token: String,
}

pub struct SessionStore {
    auth_url: String,
    http: reqwest::Client,
    identity: Option<Identity>,
    events: watch::Sender<Option<AuthUser>>,
}

impl SessionStore {
    /// Signed-out store
    pub fn new(auth_url: impl Into<String>) -> Self {
        let (events, _) = watch::channel(None);
        Self {
            auth_url: auth_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            identity: None,
            events,
        }
    }

    /// Store resumed from a previously saved session (config file)
    pub fn from_saved(auth_url: impl Into<String>, identity: Identity) -> Self {
        let (events, _) = watch::channel(Some(identity.user.clone()));
        Self {
            auth_url: auth_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            identity: Some(identity),
            events,
        }
    }

    pub fn current(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Bearer token for backend calls, or a typed prompt-to-sign-in error
    pub fn token(&self) -> Result<&str, ApiError> {
        self.identity
            .as_ref()
            .map(|identity| identity.access_token.as_str())
            .ok_or_else(|| {
                ApiError::Authentication("not signed in; run `csvchat login`".to_string())
            })
    }

    /// Observe identity transitions; the current value is visible
    /// immediately and every sign-in/sign-out is published synchronously
    pub fn subscribe(&self) -> watch::Receiver<Option<AuthUser>> {
        self.events.subscribe()
    }

    pub async fn sign_in(&mut self, email: &str, password: &str) -> Result<&Identity, ApiError> {
        let url = format!("{}/token?grant_type=password", self.auth_url);
        self.authenticate(&url, email, password).await
    }

    pub async fn sign_up(&mut self, email: &str, password: &str) -> Result<&Identity, ApiError> {
        let url = format!("{}/signup", self.auth_url);
        self.authenticate(&url, email, password).await
    }

    /// Drops the identity and notifies subscribers. Synchronous: by the time
    /// this returns, no dependent can observe the old identity through the
    /// store.
    pub fn sign_out(&mut self) {
        if self.identity.take().is_some() {
            tracing::info!("Signed out");
        }
        self.events.send_replace(None);
    }

    async fn authenticate(
        &mut self,
        url: &str,
        email: &str,
        password: &str,
    ) -> Result<&Identity, ApiError> {
        let request = CredentialsRequest {
            email: email.to_string(),
            password: password.to_string(),
        };

        let resp = self
            .http
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<AuthErrorBody>()
                .await
                .ok()
                .and_then(AuthErrorBody::into_message)
                .unwrap_or_else(|| "Authentication failed".to_string());

            return Err(match status.as_u16() {
                400 | 401 | 422 => ApiError::Authentication(message),
                code => ApiError::Api {
                    status: code,
                    detail: message,
                },
            });
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        tracing::info!(email = %token.user.email, "Signed in");
        let identity = Identity {
            user: token.user,
            access_token: token.access_token,
        };
        self.events.send_replace(Some(identity.user.clone()));
        Ok(self.identity.insert(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved_identity() -> Identity {
        Identity {
            user: AuthUser {
                id: "u1".to_string(),
                email: "a@b.c".to_string(),
            },
            access_token: "jwt-abc".to_string(),
        }
    }

    #[test]
    fn test_signed_out_store_has_no_token() {
        let store = SessionStore::new("https://auth.example.com");
        assert!(store.current().is_none());
        assert!(matches!(
            store.token(),
            Err(ApiError::Authentication(_))
        ));
    }

    #[test]
    fn test_resumed_session_exposes_token() {
        let store = SessionStore::from_saved("https://auth.example.com", saved_identity());
        assert_eq!(store.token().unwrap(), "jwt-abc");
        assert_eq!(store.current().unwrap().user.email, "a@b.c");
    }

    #[test]
    fn test_sign_out_clears_identity_and_notifies() {
        let mut store = SessionStore::from_saved("https://auth.example.com", saved_identity());
        let events = store.subscribe();
        assert!(events.borrow().is_some());

        store.sign_out();
        assert!(store.current().is_none());
        assert!(events.borrow().is_none(), "sign-out must publish synchronously");
        assert!(store.token().is_err());
    }

    #[test]
    fn test_sign_out_when_signed_out_is_harmless() {
        let mut store = SessionStore::new("https://auth.example.com");
        store.sign_out();
        assert!(store.current().is_none());
    }

    #[test]
    fn test_subscriber_sees_initial_state() {
        let store = SessionStore::new("https://auth.example.com");
        assert!(store.subscribe().borrow().is_none());
    }
}

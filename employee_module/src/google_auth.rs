//! Google OAuth 2.0 access tokens for the Gmail channel.
//!
//! Tokens come from a refresh-token flow, or from a pre-generated
//! `GOOGLE_ACCESS_TOKEN`, and are cached until shortly before expiry.

use serde::Deserialize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error};

pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Cached tokens are refreshed this long before they expire.
const EXPIRY_BUFFER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct GoogleAuth {
    inner: Arc<RwLock<GoogleAuthInner>>,
}

#[derive(Debug)]
struct GoogleAuthInner {
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    token_url: String,
    access_token: Option<String>,
    token_expires_at: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct GoogleAuthConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    /// Pre-generated access token, used as is for one hour.
    pub access_token: Option<String>,
    pub token_url: String,
}

impl Default for GoogleAuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            refresh_token: None,
            access_token: None,
            token_url: DEFAULT_TOKEN_URL.to_string(),
        }
    }
}

impl GoogleAuthConfig {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            client_id: var("GOOGLE_CLIENT_ID"),
            client_secret: var("GOOGLE_CLIENT_SECRET"),
            refresh_token: var("GOOGLE_REFRESH_TOKEN"),
            access_token: var("GOOGLE_ACCESS_TOKEN"),
            token_url: var("GOOGLE_OAUTH_TOKEN_URL")
                .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.access_token.is_some()
            || (self.client_id.is_some()
                && self.client_secret.is_some()
                && self.refresh_token.is_some())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GoogleAuthError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    #[error("token refresh failed: {0}")]
    TokenRefreshFailed(String),
    #[error("http error: {0}")]
    HttpError(String),
    #[error("json error: {0}")]
    JsonError(String),
}

impl GoogleAuth {
    pub fn new(config: GoogleAuthConfig) -> Result<Self, GoogleAuthError> {
        if !config.is_valid() {
            return Err(GoogleAuthError::MissingCredentials(
                "Either GOOGLE_ACCESS_TOKEN or (GOOGLE_CLIENT_ID + GOOGLE_CLIENT_SECRET + GOOGLE_REFRESH_TOKEN) must be set".to_string(),
            ));
        }

        let (access_token, token_expires_at) = match config.access_token {
            Some(token) => (Some(token), Some(Instant::now() + Duration::from_secs(3600))),
            None => (None, None),
        };

        Ok(Self {
            inner: Arc::new(RwLock::new(GoogleAuthInner {
                client_id: config.client_id,
                client_secret: config.client_secret,
                refresh_token: config.refresh_token,
                token_url: config.token_url,
                access_token,
                token_expires_at,
            })),
        })
    }

    pub fn from_env() -> Result<Self, GoogleAuthError> {
        Self::new(GoogleAuthConfig::from_env())
    }

    /// A valid access token, refreshed when the cached one is about to expire.
    pub fn get_access_token(&self) -> Result<String, GoogleAuthError> {
        {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            if let (Some(token), Some(expires_at)) = (&inner.access_token, &inner.token_expires_at)
            {
                if *expires_at > Instant::now() + EXPIRY_BUFFER {
                    return Ok(token.clone());
                }
            }
        }
        self.refresh_access_token()
    }

    pub fn refresh_access_token(&self) -> Result<String, GoogleAuthError> {
        let (client_id, client_secret, refresh_token, token_url) = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            match (&inner.client_id, &inner.client_secret, &inner.refresh_token) {
                (Some(id), Some(secret), Some(refresh)) => (
                    id.clone(),
                    secret.clone(),
                    refresh.clone(),
                    inner.token_url.clone(),
                ),
                _ => {
                    return Err(GoogleAuthError::MissingCredentials(
                        "no refresh token configured".to_string(),
                    ))
                }
            }
        };
        self.refresh_via_oauth(&token_url, &client_id, &client_secret, &refresh_token)
    }

    fn refresh_via_oauth(
        &self,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<String, GoogleAuthError> {
        debug!("Refreshing Google OAuth token");

        let response = reqwest::blocking::Client::new()
            .post(token_url)
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .map_err(|e| GoogleAuthError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            error!("OAuth token refresh failed: {} - {}", status, body);
            return Err(GoogleAuthError::TokenRefreshFailed(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let token: OAuthTokenResponse = response
            .json()
            .map_err(|e| GoogleAuthError::JsonError(e.to_string()))?;
        let expires_at = Instant::now() + Duration::from_secs(token.expires_in.max(0) as u64);

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.access_token = Some(token.access_token.clone());
        inner.token_expires_at = Some(expires_at);
        debug!("Google OAuth token refreshed");
        Ok(token.access_token)
    }
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    expires_in: i64,
}

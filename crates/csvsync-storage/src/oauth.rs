//! OAuth refresh-token exchange for Dropbox and Google.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::StorageError;

pub const DROPBOX_TOKEN_URL: &str = "https://api.dropbox.com/oauth2/token";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait OAuthRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, StorageError>;
}

/// Dropbox app credentials.
pub struct DropboxOAuth {
    client: reqwest::Client,
    app_key: String,
    app_secret: String,
    token_url: String,
}

impl DropboxOAuth {
    pub fn new(app_key: &str, app_secret: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            app_key: app_key.to_string(),
            app_secret: app_secret.to_string(),
            token_url: DROPBOX_TOKEN_URL.to_string(),
        }
    }

    pub fn with_token_url(mut self, url: &str) -> Self {
        self.token_url = url.to_string();
        self
    }
}

#[async_trait]
impl OAuthRefresher for DropboxOAuth {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, StorageError> {
        exchange(
            &self.client,
            &self.token_url,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.app_key.as_str()),
                ("client_secret", self.app_secret.as_str()),
            ],
            "Dropbox",
        )
        .await
    }
}

/// Google OAuth client credentials (Gmail).
pub struct GoogleOAuth {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    token_url: String,
}

impl GoogleOAuth {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }

    pub fn with_token_url(mut self, url: &str) -> Self {
        self.token_url = url.to_string();
        self
    }
}

#[async_trait]
impl OAuthRefresher for GoogleOAuth {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, StorageError> {
        exchange(
            &self.client,
            &self.token_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ],
            "Google",
        )
        .await
    }
}

async fn exchange(
    client: &reqwest::Client,
    url: &str,
    form: &[(&str, &str)],
    label: &str,
) -> Result<TokenResponse, StorageError> {
    let resp = client
        .post(url)
        .form(form)
        .timeout(std::time::Duration::from_secs(15))
        .send()
        .await
        .map_err(|e| StorageError::TokenRefresh(format!("{label} token request failed: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        // A revoked or expired refresh token can only be fixed by a human.
        if body.contains("invalid_grant") {
            return Err(StorageError::ReauthRequired(format!(
                "{label} refresh token rejected (invalid_grant)"
            )));
        }
        return Err(StorageError::TokenRefresh(format!(
            "{label} token endpoint returned {status}: {body}"
        )));
    }

    let token: TokenResponse = resp
        .json()
        .await
        .map_err(|e| StorageError::TokenRefresh(format!("{label} token response invalid: {e}")))?;
    tracing::info!(
        "🔑 {} access token refreshed (expires in {}s)",
        label,
        token.expires_in.unwrap_or(0)
    );
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Form, Router};
    use std::collections::HashMap;

    async fn token_endpoint(Form(form): Form<HashMap<String, String>>) -> Response {
        if form.get("grant_type").map(String::as_str) != Some("refresh_token") {
            return (StatusCode::BAD_REQUEST, r#"{"error":"unsupported_grant_type"}"#).into_response();
        }
        match form.get("refresh_token").map(String::as_str) {
            Some("good") => axum::Json(serde_json::json!({
                "access_token": "new-access",
                "expires_in": 3599,
                "token_type": "Bearer"
            }))
            .into_response(),
            Some("revoked") => (
                StatusCode::BAD_REQUEST,
                r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
            )
                .into_response(),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "backend error").into_response(),
        }
    }

    async fn serve() -> String {
        let app = Router::new().route("/token", post(token_endpoint));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{addr}/token")
    }

    #[tokio::test]
    async fn test_refresh_returns_new_access_token() {
        let url = serve().await;
        let google = GoogleOAuth::new("client", "secret").with_token_url(&url);
        let token = google.refresh("good").await.unwrap();
        assert_eq!(token.access_token, "new-access");
        assert_eq!(token.expires_in, Some(3599));

        let dropbox = DropboxOAuth::new("key", "secret").with_token_url(&url);
        assert_eq!(dropbox.refresh("good").await.unwrap().access_token, "new-access");
    }

    #[tokio::test]
    async fn test_invalid_grant_requires_reauth() {
        let url = serve().await;
        let err = GoogleOAuth::new("client", "secret")
            .with_token_url(&url)
            .refresh("revoked")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ReauthRequired(_)), "{err}");
    }

    #[tokio::test]
    async fn test_other_failures_are_refresh_errors() {
        let url = serve().await;
        let err = DropboxOAuth::new("key", "secret")
            .with_token_url(&url)
            .refresh("unknown")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::TokenRefresh(_)), "{err}");
        assert!(err.to_string().contains("500"), "{err}");
    }
}

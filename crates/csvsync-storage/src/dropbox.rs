//! Dropbox provider over the HTTP API v2.
//!
//! - 429 and network errors: up to 5 retries, `Retry-After` or 2^n backoff (cap 30s)
//! - 401, or 400 mentioning a malformed/invalid token: one refresh, then retry once
//! - 409 (path lookup): not found, never retried

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csvsync_core::StorageProviderKind;
use serde::Deserialize;
use serde_json::json;

use crate::backoff::{retry_after_header, retry_transient};
use crate::error::StorageError;
use crate::oauth::OAuthRefresher;
use crate::provider::{FileInfo, StorageProvider};
use crate::token::TokenStore;

pub const DROPBOX_API_BASE: &str = "https://api.dropboxapi.com/2";
pub const DROPBOX_CONTENT_BASE: &str = "https://content.dropboxapi.com/2";
pub const DEFAULT_BASE_PATH: &str = "/backups";

pub struct DropboxStorageProvider {
    client: reqwest::Client,
    tokens: Arc<dyn TokenStore>,
    refresher: Option<Arc<dyn OAuthRefresher>>,
    refresh_token: Option<String>,
    base_path: String,
    api_base: String,
    content_base: String,
}

#[derive(Debug, Deserialize)]
struct ListFolderResponse {
    entries: Vec<ListEntry>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    #[serde(rename = ".tag")]
    tag: String,
    #[serde(default)]
    path_display: Option<String>,
    #[serde(default)]
    path_lower: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    server_modified: Option<DateTime<Utc>>,
}

impl DropboxStorageProvider {
    pub fn new(tokens: Arc<dyn TokenStore>, base_path: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            tokens,
            refresher: None,
            refresh_token: None,
            base_path: base_path
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(DEFAULT_BASE_PATH)
                .to_string(),
            api_base: DROPBOX_API_BASE.to_string(),
            content_base: DROPBOX_CONTENT_BASE.to_string(),
        }
    }

    /// Enable token refresh on 401.
    pub fn with_refresh(mut self, refresher: Arc<dyn OAuthRefresher>, refresh_token: &str) -> Self {
        self.refresher = Some(refresher);
        self.refresh_token = Some(refresh_token.to_string());
        self
    }

    pub fn with_endpoints(mut self, api_base: &str, content_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.content_base = content_base.trim_end_matches('/').to_string();
        self
    }

    /// Join `path` under the base path. Paths already under it are kept.
    pub fn full_path(&self, path: &str) -> String {
        let base = self.base_path.trim_end_matches('/');
        let already_based = !base.is_empty()
            && (path == base || path.starts_with(&format!("{base}/")));
        let joined = if already_based {
            path.to_string()
        } else {
            format!("{base}/{}", path.trim_start_matches('/'))
        };

        let mut out = String::with_capacity(joined.len() + 1);
        for segment in joined.split('/').filter(|s| !s.is_empty()) {
            out.push('/');
            out.push_str(segment);
        }
        // Dropbox addresses the root folder as "".
        out
    }

    async fn access_token(&self) -> Result<String, StorageError> {
        self.tokens
            .get(StorageProviderKind::Dropbox)
            .await
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| StorageError::Configuration("Dropbox access token is required".into()))
    }

    async fn refresh_access_token(&self) -> Result<(), StorageError> {
        let (Some(refresher), Some(refresh_token)) = (&self.refresher, &self.refresh_token) else {
            return Err(StorageError::TokenRefresh(
                "no Dropbox refresh credentials configured".into(),
            ));
        };
        let response = refresher.refresh(refresh_token).await?;
        self.tokens
            .set(StorageProviderKind::Dropbox, &response.access_token)
            .await
    }

    /// Transient retries inside, one token refresh outside.
    async fn with_auth<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, StorageError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut refreshed = false;
        loop {
            let token = self.access_token().await?;
            match retry_transient("Dropbox", operation, || f(token.clone())).await {
                Err(e) if e.is_auth() && !refreshed => {
                    tracing::warn!("🔐 Dropbox {} rejected the access token, refreshing", operation);
                    if let Err(refresh_err) = self.refresh_access_token().await {
                        tracing::warn!("⚠️ Dropbox token refresh failed: {}", refresh_err);
                        return Err(match refresh_err {
                            StorageError::ReauthRequired(_) => refresh_err,
                            _ => e,
                        });
                    }
                    refreshed = true;
                }
                other => return other,
            }
        }
    }

    async fn upload_once(&self, token: String, data: &[u8], path: &str) -> Result<(), StorageError> {
        let resp = self
            .client
            .post(format!("{}/files/upload", self.content_base))
            .bearer_auth(token)
            .header("Dropbox-API-Arg", api_arg(&json!({"path": path, "mode": "overwrite", "mute": true})))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data.to_vec())
            .send()
            .await
            .map_err(StorageError::from_reqwest)?;
        check(resp, path, false).await?;
        Ok(())
    }

    async fn download_once(&self, token: String, path: &str) -> Result<Vec<u8>, StorageError> {
        let resp = self
            .client
            .post(format!("{}/files/download", self.content_base))
            .bearer_auth(token)
            .header("Dropbox-API-Arg", api_arg(&json!({"path": path})))
            .send()
            .await
            .map_err(StorageError::from_reqwest)?;
        let resp = check(resp, path, true).await?;
        let bytes = resp.bytes().await.map_err(StorageError::from_reqwest)?;
        Ok(bytes.to_vec())
    }

    async fn delete_once(&self, token: String, path: &str) -> Result<(), StorageError> {
        let resp = self
            .client
            .post(format!("{}/files/delete_v2", self.api_base))
            .bearer_auth(token)
            .json(&json!({"path": path}))
            .send()
            .await
            .map_err(StorageError::from_reqwest)?;
        check(resp, path, true).await?;
        Ok(())
    }

    async fn list_page(
        &self,
        token: String,
        path: &str,
        cursor: Option<&str>,
    ) -> Result<ListFolderResponse, StorageError> {
        let request = match cursor {
            Some(cursor) => self
                .client
                .post(format!("{}/files/list_folder/continue", self.api_base))
                .json(&json!({"cursor": cursor})),
            None => self
                .client
                .post(format!("{}/files/list_folder", self.api_base))
                .json(&json!({"path": path, "recursive": true})),
        };
        let resp = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(StorageError::from_reqwest)?;
        let resp = check(resp, path, true).await?;
        resp.json::<ListFolderResponse>()
            .await
            .map_err(|e| StorageError::Http {
                status: 200,
                message: format!("invalid list_folder response: {e}"),
            })
    }
}

#[async_trait]
impl StorageProvider for DropboxStorageProvider {
    fn name(&self) -> &str {
        "dropbox"
    }

    async fn upload(&self, data: &[u8], path: &str) -> Result<(), StorageError> {
        let full = self.full_path(path);
        self.with_auth("upload", |token| self.upload_once(token, data, &full))
            .await?;
        tracing::info!("☁️ Dropbox upload: {} ({} bytes)", full, data.len());
        Ok(())
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full = self.full_path(path);
        let bytes = self
            .with_auth("download", |token| self.download_once(token, &full))
            .await?;
        tracing::debug!("☁️ Dropbox download: {} ({} bytes)", full, bytes.len());
        Ok(bytes)
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full = self.full_path(path);
        match self.with_auth("delete", |token| self.delete_once(token, &full)).await {
            Ok(()) => {
                tracing::info!("🗑️ Dropbox delete: {}", full);
                Ok(())
            }
            Err(StorageError::NotFound(_)) => {
                tracing::debug!("Dropbox file already absent: {}", full);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<FileInfo>, StorageError> {
        let full = self.full_path(path);
        let mut files = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = match self
                .with_auth("list", |token| self.list_page(token, &full, cursor.as_deref()))
                .await
            {
                Ok(page) => page,
                Err(StorageError::NotFound(_)) => return Ok(Vec::new()),
                Err(e) => return Err(e),
            };
            files.extend(page.entries.into_iter().filter(|e| e.tag == "file").map(|e| FileInfo {
                path: e.path_display.or(e.path_lower).unwrap_or_default(),
                size_bytes: e.size,
                modified_at: e.server_modified,
            }));
            if !page.has_more {
                break;
            }
            cursor = Some(page.cursor);
        }
        Ok(files)
    }
}

/// Map a non-success response onto the error taxonomy.
async fn check(
    resp: reqwest::Response,
    path: &str,
    conflict_is_missing: bool,
) -> Result<reqwest::Response, StorageError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = retry_after_header(resp.headers());
    let body = resp.text().await.unwrap_or_default();
    Err(match status.as_u16() {
        429 => StorageError::RateLimited {
            message: body,
            retry_after,
        },
        401 => StorageError::Auth(body),
        400 if is_token_complaint(&body) => StorageError::Auth(body),
        409 if conflict_is_missing => StorageError::NotFound(format!("{path}: {body}")),
        code => StorageError::Http {
            status: code,
            message: body,
        },
    })
}

fn is_token_complaint(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("malformed") || lower.contains("invalid")
}

/// JSON for the `Dropbox-API-Arg` header, which must be pure ASCII.
fn api_arg(value: &serde_json::Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

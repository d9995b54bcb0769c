//! Read-only provider that pulls CSV attachments out of Gmail.
//!
//! A "path" is either `messageId[:attachmentId]` or a subject pattern. A
//! subject pattern selects the newest unread match; the message is archived
//! once its attachment has been read so the next run does not pick it again.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use csvsync_core::StorageProviderKind;

use crate::backoff::retry_transient;
use crate::error::StorageError;
use crate::gate::{GateMode, GmailRequestGate};
use crate::gmail_client::{GmailClient, GmailMessage};
use crate::oauth::OAuthRefresher;
use crate::provider::{DownloadedFile, FileInfo, StorageProvider};
use crate::token::TokenStore;

/// Upper bound on messages returned by `list`.
pub const LIST_LIMIT: u32 = 10;

/// How a download path addresses a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageLocator<'a> {
    Id {
        message_id: &'a str,
        attachment_id: Option<&'a str>,
    },
    Subject(&'a str),
}

impl<'a> MessageLocator<'a> {
    /// Gmail ids are lowercase hex, 16 characters in practice.
    pub fn parse(path: &'a str) -> Self {
        let (head, tail) = match path.split_once(':') {
            Some((head, tail)) => (head, Some(tail)),
            None => (path, None),
        };
        let looks_like_id = head.len() >= 16 && head.chars().all(|c| c.is_ascii_hexdigit());
        if looks_like_id {
            MessageLocator::Id {
                message_id: head,
                attachment_id: tail.filter(|t| !t.is_empty()),
            }
        } else {
            MessageLocator::Subject(path)
        }
    }
}

pub struct GmailStorageProvider {
    client: GmailClient,
    tokens: Arc<dyn TokenStore>,
    refresher: Option<Arc<dyn OAuthRefresher>>,
    refresh_token: Option<String>,
    gate: Arc<GmailRequestGate>,
    mode: GateMode,
    subject_pattern: Option<String>,
    from_email: Option<String>,
}

impl GmailStorageProvider {
    pub fn new(tokens: Arc<dyn TokenStore>, gate: Arc<GmailRequestGate>) -> Self {
        Self {
            client: GmailClient::default(),
            tokens,
            refresher: None,
            refresh_token: None,
            gate,
            mode: GateMode::default(),
            subject_pattern: None,
            from_email: None,
        }
    }

    pub fn with_refresh(mut self, refresher: Arc<dyn OAuthRefresher>, refresh_token: &str) -> Self {
        self.refresher = Some(refresher);
        self.refresh_token = Some(refresh_token.to_string());
        self
    }

    /// Default subject pattern and sender filter.
    pub fn with_filters(mut self, subject_pattern: Option<String>, from_email: Option<String>) -> Self {
        self.subject_pattern = subject_pattern.filter(|s| !s.trim().is_empty());
        self.from_email = from_email.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_mode(mut self, mode: GateMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.client = GmailClient::new(base_url);
        self
    }

    /// Build a Gmail search query for `pattern`, falling back to the configured one.
    ///
    /// `/re/` becomes `subject:re`, anything else `subject:"pattern"`. Only
    /// unread mail is searched.
    pub fn build_query(&self, pattern: &str) -> String {
        let mut terms = Vec::new();
        let pattern = Some(pattern.trim())
            .filter(|p| !p.is_empty())
            .or(self.subject_pattern.as_deref());
        if let Some(pattern) = pattern {
            if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
                terms.push(format!("subject:{}", &pattern[1..pattern.len() - 1]));
            } else {
                terms.push(format!("subject:\"{pattern}\""));
            }
        }
        if let Some(from) = &self.from_email {
            terms.push(format!("from:{from}"));
        }
        terms.push("is:unread".to_string());
        terms.join(" ")
    }

    async fn access_token(&self) -> Result<String, StorageError> {
        self.tokens
            .get(StorageProviderKind::Gmail)
            .await
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| StorageError::Configuration("Gmail access token is required".into()))
    }

    /// Gate, transient backoff, then at most one token refresh.
    async fn call<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, StorageError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut refreshed = false;
        loop {
            let token = self.access_token().await?;
            let result = retry_transient("Gmail", operation, || {
                self.gate.execute(operation, self.mode, || f(token.clone()))
            })
            .await;
            match result {
                Err(e) if e.is_auth() && !refreshed => {
                    let (Some(refresher), Some(refresh_token)) = (&self.refresher, &self.refresh_token) else {
                        return Err(e);
                    };
                    tracing::warn!("🔐 Gmail {} rejected the access token, refreshing", operation);
                    let token = match refresher.refresh(refresh_token).await {
                        Ok(response) => response.access_token,
                        Err(StorageError::ReauthRequired(msg)) => {
                            return Err(StorageError::ReauthRequired(msg));
                        }
                        Err(refresh_err) => {
                            tracing::warn!("⚠️ Gmail token refresh failed: {}", refresh_err);
                            return Err(e);
                        }
                    };
                    if let Err(persist_err) = self.tokens.set(StorageProviderKind::Gmail, &token).await {
                        tracing::warn!("⚠️ Could not persist refreshed Gmail token: {}", persist_err);
                        return Err(e);
                    }
                    refreshed = true;
                }
                other => return other,
            }
        }
    }

    async fn get_message(&self, id: &str) -> Result<GmailMessage, StorageError> {
        self.call("messages.get", |token| async move {
            self.client.get_message(&token, id).await
        })
        .await
    }

    async fn archive(&self, id: &str) {
        let result = self
            .call("messages.modify", |token| async move {
                self.client.archive(&token, id).await
            })
            .await;
        match result {
            Ok(()) => tracing::info!("📥 Archived Gmail message {}", id),
            Err(e) => tracing::warn!("⚠️ Failed to archive Gmail message {}: {}", id, e),
        }
    }

    async fn fetch_attachment(
        &self,
        message: &GmailMessage,
        attachment_id: Option<&str>,
    ) -> Result<Vec<u8>, StorageError> {
        let attachment_id = match attachment_id {
            Some(id) => id.to_string(),
            None => {
                message
                    .first_attachment()
                    .ok_or_else(|| {
                        StorageError::NotFound(format!("no attachment in message {}", message.id))
                    })?
                    .attachment_id
            }
        };
        let message_id = message.id.as_str();
        let attachment_id = attachment_id.as_str();
        self.call("messages.attachments.get", |token| async move {
            self.client
                .get_attachment(&token, message_id, attachment_id)
                .await
        })
        .await
    }
}

#[async_trait]
impl StorageProvider for GmailStorageProvider {
    fn name(&self) -> &str {
        "gmail"
    }

    async fn upload(&self, _data: &[u8], _path: &str) -> Result<(), StorageError> {
        Err(StorageError::Unsupported {
            provider: "gmail",
            operation: "upload",
        })
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        Ok(self.download_with_metadata(path).await?.bytes)
    }

    async fn delete(&self, _path: &str) -> Result<(), StorageError> {
        Err(StorageError::Unsupported {
            provider: "gmail",
            operation: "delete",
        })
    }

    async fn list(&self, path: &str) -> Result<Vec<FileInfo>, StorageError> {
        let query = self.build_query(path);
        let query_ref = query.as_str();
        let ids = self
            .call("messages.list", |token| async move {
                self.client.search(&token, query_ref, LIST_LIMIT).await
            })
            .await?;

        let mut files = Vec::with_capacity(ids.len());
        for id in ids.iter().take(LIST_LIMIT as usize) {
            match self.get_message(id).await {
                Ok(message) => files.push(FileInfo {
                    path: message.id.clone(),
                    size_bytes: message.size_estimate,
                    modified_at: message.received_at(),
                }),
                Err(e @ StorageError::Deferred { .. }) => return Err(e),
                Err(e) => tracing::warn!("⚠️ Skipping Gmail message {}: {}", id, e),
            }
        }
        Ok(files)
    }

    async fn download_with_metadata(&self, path: &str) -> Result<DownloadedFile, StorageError> {
        let (message_id, attachment_id) = match MessageLocator::parse(path) {
            MessageLocator::Id {
                message_id,
                attachment_id,
            } => (message_id.to_string(), attachment_id),
            MessageLocator::Subject(pattern) => {
                let query = self.build_query(pattern);
                let query_ref = query.as_str();
                tracing::info!("🔎 Searching Gmail: {}", query);
                let ids = self
                    .call("messages.list", |token| async move {
                        self.client.search(&token, query_ref, 1).await
                    })
                    .await?;
                let id = ids
                    .into_iter()
                    .next()
                    .ok_or_else(|| StorageError::NoMatchingMessage(query.clone()))?;
                (id, None)
            }
        };

        let message = self.get_message(&message_id).await?;
        let bytes = self.fetch_attachment(&message, attachment_id).await?;
        tracing::info!(
            "📎 Gmail attachment downloaded: message {} ({} bytes)",
            message.id,
            bytes.len()
        );
        self.archive(&message.id).await;

        Ok(DownloadedFile {
            bytes,
            source_id: message.id.clone(),
            subject: message.subject().map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::TokenResponse;
    use crate::token::MemoryTokenStore;
    use axum::Json;
    use axum::Router;
    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    const MESSAGE_ID: &str = "18c2f0a9b7d64e21";

    #[derive(Default)]
    struct FakeGmail {
        queries: Mutex<Vec<String>>,
        archived: Mutex<Vec<String>>,
        requests: AtomicU32,
        rate_limited: bool,
        no_matches: bool,
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Bearer good")
    }

    async fn list(
        State(state): State<Arc<FakeGmail>>,
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        state.requests.fetch_add(1, Ordering::SeqCst);
        if !authorized(&headers) {
            return (StatusCode::UNAUTHORIZED, "Invalid Credentials").into_response();
        }
        if state.rate_limited {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [("retry-after", "30")],
                "User-rate limit exceeded",
            )
                .into_response();
        }
        state
            .queries
            .lock()
            .unwrap()
            .push(params.get("q").cloned().unwrap_or_default());
        if state.no_matches {
            return Json(json!({"resultSizeEstimate": 0})).into_response();
        }
        Json(json!({"messages": [{"id": MESSAGE_ID, "threadId": "t1"}]})).into_response()
    }

    async fn message(State(state): State<Arc<FakeGmail>>, Path(id): Path<String>) -> Response {
        state.requests.fetch_add(1, Ordering::SeqCst);
        Json(json!({
            "id": id,
            "internalDate": "1767312000000",
            "sizeEstimate": 2048,
            "payload": {
                "headers": [{"name": "Subject", "value": "[CSV] employees"}],
                "parts": [
                    {"mimeType": "text/plain", "body": {"size": 4}},
                    {"mimeType": "text/csv", "filename": "employees.csv",
                     "body": {"attachmentId": "att-1", "size": 14}}
                ]
            }
        }))
        .into_response()
    }

    async fn attachment(
        State(state): State<Arc<FakeGmail>>,
        Path((_id, att)): Path<(String, String)>,
    ) -> Response {
        state.requests.fetch_add(1, Ordering::SeqCst);
        let csv = format!("id,name\n{att}\n");
        Json(json!({"data": URL_SAFE_NO_PAD.encode(csv), "size": 14})).into_response()
    }

    async fn modify(
        State(state): State<Arc<FakeGmail>>,
        Path(id): Path<String>,
        Json(body): Json<serde_json::Value>,
    ) -> Response {
        assert_eq!(body["removeLabelIds"], json!(["INBOX", "UNREAD"]));
        state.archived.lock().unwrap().push(id);
        Json(json!({})).into_response()
    }

    async fn serve(state: Arc<FakeGmail>) -> String {
        let app = Router::new()
            .route("/gmail/v1/users/me/messages", get(list))
            .route("/gmail/v1/users/me/messages/{id}", get(message))
            .route(
                "/gmail/v1/users/me/messages/{id}/attachments/{att}",
                get(attachment),
            )
            .route("/gmail/v1/users/me/messages/{id}/modify", post(modify))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{addr}/gmail/v1")
    }

    struct StaticRefresher;

    #[async_trait]
    impl OAuthRefresher for StaticRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<TokenResponse, StorageError> {
            Ok(TokenResponse {
                access_token: "good".into(),
                expires_in: Some(3599),
                token_type: Some("Bearer".into()),
            })
        }
    }

    fn provider(base: &str, token: &str) -> (GmailStorageProvider, Arc<MemoryTokenStore>) {
        let tokens = Arc::new(MemoryTokenStore::new().with_token(StorageProviderKind::Gmail, token));
        let gmail = GmailStorageProvider::new(tokens.clone(), Arc::new(GmailRequestGate::new()))
            .with_base_url(base);
        (gmail, tokens)
    }

    #[test]
    fn test_locator_parsing() {
        assert_eq!(
            MessageLocator::parse("18c2f0a9b7d64e21:ANGjdJ8"),
            MessageLocator::Id {
                message_id: "18c2f0a9b7d64e21",
                attachment_id: Some("ANGjdJ8")
            }
        );
        assert_eq!(
            MessageLocator::parse("18c2f0a9b7d64e21"),
            MessageLocator::Id {
                message_id: "18c2f0a9b7d64e21",
                attachment_id: None
            }
        );
        assert_eq!(
            MessageLocator::parse("Report: daily"),
            MessageLocator::Subject("Report: daily")
        );
        assert_eq!(MessageLocator::parse("abc123"), MessageLocator::Subject("abc123"));
    }

    #[test]
    fn test_build_query() {
        let tokens = Arc::new(MemoryTokenStore::new());
        let gmail = GmailStorageProvider::new(tokens, Arc::new(GmailRequestGate::new()))
            .with_filters(Some("[CSV]".into()), Some("export@example.com".into()));
        assert_eq!(
            gmail.build_query("Employees"),
            "subject:\"Employees\" from:export@example.com is:unread"
        );
        assert_eq!(
            gmail.build_query("/CSV Import/"),
            "subject:CSV Import from:export@example.com is:unread"
        );
        assert_eq!(
            gmail.build_query(""),
            "subject:\"[CSV]\" from:export@example.com is:unread"
        );
    }

    #[tokio::test]
    async fn test_download_by_subject_archives_message() {
        let state = Arc::new(FakeGmail::default());
        let base = serve(state.clone()).await;
        let (gmail, _) = provider(&base, "good");

        let file = gmail.download_with_metadata("[CSV] employees").await.unwrap();
        assert_eq!(file.bytes, b"id,name\natt-1\n".to_vec());
        assert_eq!(file.source_id, MESSAGE_ID);
        assert_eq!(file.subject.as_deref(), Some("[CSV] employees"));
        assert_eq!(
            state.queries.lock().unwrap().clone(),
            vec!["subject:\"[CSV] employees\" is:unread".to_string()]
        );
        assert_eq!(state.archived.lock().unwrap().clone(), vec![MESSAGE_ID.to_string()]);
    }

    #[tokio::test]
    async fn test_download_by_explicit_attachment() {
        let state = Arc::new(FakeGmail::default());
        let base = serve(state.clone()).await;
        let (gmail, _) = provider(&base, "good");

        let bytes = gmail
            .download(&format!("{MESSAGE_ID}:att-9"))
            .await
            .unwrap();
        assert_eq!(bytes, b"id,name\natt-9\n".to_vec());
        assert!(state.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_match_is_distinct_error() {
        let state = Arc::new(FakeGmail {
            no_matches: true,
            ..Default::default()
        });
        let base = serve(state).await;
        let (gmail, _) = provider(&base, "good");
        assert!(matches!(
            gmail.download("Items").await,
            Err(StorageError::NoMatchingMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_unauthorized_refreshes_token() {
        let state = Arc::new(FakeGmail::default());
        let base = serve(state.clone()).await;
        let (gmail, tokens) = provider(&base, "stale");
        let gmail = gmail.with_refresh(Arc::new(StaticRefresher), "refresh");

        let files = gmail.list("[CSV] employees").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, MESSAGE_ID);
        assert_eq!(files[0].size_bytes, Some(2048));
        assert!(files[0].modified_at.is_some());
        assert_eq!(
            tokens.get(StorageProviderKind::Gmail).await.as_deref(),
            Some("good")
        );
    }

    #[tokio::test]
    async fn test_unauthorized_without_refresher_fails() {
        let base = serve(Arc::new(FakeGmail::default())).await;
        let (gmail, _) = provider(&base, "stale");
        assert!(matches!(gmail.list("x").await, Err(StorageError::Auth(_))));
    }

    #[tokio::test]
    async fn test_rate_limit_defers_following_calls() {
        let state = Arc::new(FakeGmail {
            rate_limited: true,
            ..Default::default()
        });
        let base = serve(state.clone()).await;
        let (gmail, _) = provider(&base, "good");

        let first = gmail.download("Employees").await.unwrap_err();
        assert!(matches!(first, StorageError::Deferred { .. }));
        let second = gmail.download("Employees").await.unwrap_err();
        assert!(matches!(second, StorageError::Deferred { .. }));
        assert_eq!(state.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upload_and_delete_unsupported() {
        let (gmail, _) = provider("http://127.0.0.1:9", "good");
        assert!(matches!(
            gmail.upload(b"x", "a.csv").await,
            Err(StorageError::Unsupported { operation: "upload", .. })
        ));
        assert!(matches!(
            gmail.delete("a.csv").await,
            Err(StorageError::Unsupported { operation: "delete", .. })
        ));
    }
}

//! Minimal Gmail REST v1 client: search, fetch, attachments, archive.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::backoff::retry_after_header;
use crate::error::StorageError;

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub snippet: String,
    /// Milliseconds since the epoch, as a decimal string.
    #[serde(default)]
    pub internal_date: Option<String>,
    #[serde(default)]
    pub size_estimate: Option<u64>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    #[serde(default)]
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Attachment reference found inside a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub attachment_id: String,
    pub filename: String,
}

impl GmailMessage {
    pub fn subject(&self) -> Option<&str> {
        self.payload
            .as_ref()?
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("subject"))
            .map(|h| h.value.as_str())
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        let millis = self.internal_date.as_deref()?.parse::<i64>().ok()?;
        DateTime::from_timestamp_millis(millis)
    }

    /// First attachment, depth-first, the body itself counting first.
    pub fn first_attachment(&self) -> Option<AttachmentRef> {
        let payload = self.payload.as_ref()?;
        if let Some(id) = payload.body.as_ref().and_then(|b| b.attachment_id.clone()) {
            return Some(AttachmentRef {
                attachment_id: id,
                filename: non_empty_or(&payload.filename, "attachment"),
            });
        }
        find_attachment(&payload.parts)
    }
}

fn find_attachment(parts: &[MessagePart]) -> Option<AttachmentRef> {
    for part in parts {
        if let Some(id) = part.body.as_ref().and_then(|b| b.attachment_id.as_ref()) {
            return Some(AttachmentRef {
                attachment_id: id.clone(),
                filename: non_empty_or(&part.filename, "attachment"),
            });
        }
        if let Some(nested) = find_attachment(&part.parts) {
            return Some(nested);
        }
    }
    None
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AttachmentBody {
    #[serde(default)]
    data: Option<String>,
}

pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for GmailClient {
    fn default() -> Self {
        Self::new(GMAIL_API_BASE)
    }
}

impl GmailClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/users/me/{}", self.base_url, tail)
    }

    /// Message ids matching `query`, newest first.
    pub async fn search(&self, token: &str, query: &str, max_results: u32) -> Result<Vec<String>, StorageError> {
        let max_results = max_results.to_string();
        let resp = self
            .http
            .get(self.url("messages"))
            .bearer_auth(token)
            .query(&[("q", query), ("maxResults", max_results.as_str())])
            .send()
            .await
            .map_err(StorageError::from_reqwest)?;
        let list: MessageList = parse(check(resp).await?).await?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    pub async fn get_message(&self, token: &str, id: &str) -> Result<GmailMessage, StorageError> {
        let resp = self
            .http
            .get(self.url(&format!("messages/{id}")))
            .bearer_auth(token)
            .query(&[("format", "full")])
            .send()
            .await
            .map_err(StorageError::from_reqwest)?;
        parse(check(resp).await?).await
    }

    pub async fn get_attachment(
        &self,
        token: &str,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, StorageError> {
        let resp = self
            .http
            .get(self.url(&format!("messages/{message_id}/attachments/{attachment_id}")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(StorageError::from_reqwest)?;
        let body: AttachmentBody = parse(check(resp).await?).await?;
        let data = body
            .data
            .filter(|d| !d.is_empty())
            .ok_or_else(|| StorageError::NotFound(format!("attachment {attachment_id} is empty")))?;
        URL_SAFE_NO_PAD
            .decode(data.trim_end_matches('='))
            .map_err(|e| StorageError::Http {
                status: 200,
                message: format!("attachment {attachment_id} is not valid base64: {e}"),
            })
    }

    /// Drop the INBOX and UNREAD labels so the message is not picked again.
    pub async fn archive(&self, token: &str, id: &str) -> Result<(), StorageError> {
        let resp = self
            .http
            .post(self.url(&format!("messages/{id}/modify")))
            .bearer_auth(token)
            .json(&json!({"removeLabelIds": ["INBOX", "UNREAD"]}))
            .send()
            .await
            .map_err(StorageError::from_reqwest)?;
        check(resp).await?;
        Ok(())
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, StorageError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = retry_after_header(resp.headers());
    let body = resp.text().await.unwrap_or_default();
    let lower = body.to_ascii_lowercase();
    Err(match status.as_u16() {
        429 => StorageError::RateLimited {
            message: body,
            retry_after,
        },
        403 if is_rate_limit_message(&lower) => StorageError::RateLimited {
            message: body,
            retry_after,
        },
        401 => StorageError::Auth(body),
        _ if lower.contains("invalid credentials") => StorageError::Auth(body),
        404 => StorageError::NotFound(body),
        code => StorageError::Http {
            status: code,
            message: body,
        },
    })
}

fn is_rate_limit_message(lower: &str) -> bool {
    ["rate limit", "ratelimitexceeded", "quota exceeded", "resource_exhausted"]
        .iter()
        .any(|needle| lower.contains(needle))
}

async fn parse<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, StorageError> {
    resp.json::<T>().await.map_err(|e| StorageError::Http {
        status: 200,
        message: format!("unexpected Gmail response: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(json: serde_json::Value) -> GmailMessage {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_nested_attachment_found() {
        let msg = message(json!({
            "id": "18c2f0a9b7d64e21",
            "internalDate": "1767312000000",
            "payload": {
                "mimeType": "multipart/mixed",
                "headers": [{"name": "Subject", "value": "Employees export"}],
                "parts": [
                    {"mimeType": "text/plain", "body": {"size": 10}},
                    {"mimeType": "multipart/alternative", "parts": [
                        {"mimeType": "text/csv", "filename": "employees.csv",
                         "body": {"attachmentId": "ANGjdJ8", "size": 42}}
                    ]}
                ]
            }
        }));
        assert_eq!(msg.subject(), Some("Employees export"));
        assert_eq!(
            msg.first_attachment(),
            Some(AttachmentRef {
                attachment_id: "ANGjdJ8".into(),
                filename: "employees.csv".into()
            })
        );
        assert_eq!(
            msg.received_at().map(|d| d.to_rfc3339()),
            Some("2026-01-02T00:00:00+00:00".to_string())
        );
    }

    #[test]
    fn test_message_without_attachment() {
        let msg = message(json!({
            "id": "a",
            "payload": {"parts": [{"mimeType": "text/plain", "body": {"size": 3}}]}
        }));
        assert_eq!(msg.first_attachment(), None);
        assert_eq!(msg.subject(), None);
    }

    #[test]
    fn test_rate_limit_message_detection() {
        assert!(is_rate_limit_message("user-rate limit exceeded"));
        assert!(is_rate_limit_message("{\"reason\":\"ratelimitexceeded\"}"));
        assert!(!is_rate_limit_message("insufficient permission"));
    }
}

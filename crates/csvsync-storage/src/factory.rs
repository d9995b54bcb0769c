//! Builds a provider for a [`StorageProviderKind`] from storage options.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use csvsync_core::{StorageOptions, StorageProviderKind};

use crate::dropbox::DropboxStorageProvider;
use crate::error::StorageError;
use crate::gate::{GateMode, GmailRequestGate};
use crate::gmail::GmailStorageProvider;
use crate::local::LocalStorageProvider;
use crate::oauth::{DropboxOAuth, GoogleOAuth};
use crate::provider::StorageProvider;
use crate::token::TokenStore;

#[async_trait]
pub trait ProviderFactory: Send + Sync {
    async fn create(
        &self,
        kind: StorageProviderKind,
        options: &StorageOptions,
        tokens: Arc<dyn TokenStore>,
    ) -> Result<Arc<dyn StorageProvider>, StorageError>;
}

/// Factory for the real backends. All Gmail providers share one request gate.
pub struct DefaultProviderFactory {
    local_root: PathBuf,
    gate: Arc<GmailRequestGate>,
    gate_mode: GateMode,
}

impl DefaultProviderFactory {
    /// `local_root` is used when the options carry no `base_path`.
    pub fn new(local_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            gate: Arc::new(GmailRequestGate::new()),
            gate_mode: GateMode::Defer,
        }
    }

    pub fn with_gate(mut self, gate: Arc<GmailRequestGate>, mode: GateMode) -> Self {
        self.gate = gate;
        self.gate_mode = mode;
        self
    }

    pub fn gate(&self) -> Arc<GmailRequestGate> {
        self.gate.clone()
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

async fn require_token(tokens: &dyn TokenStore, kind: StorageProviderKind) -> Result<(), StorageError> {
    match tokens.get(kind).await {
        Some(token) if !token.trim().is_empty() => Ok(()),
        _ => Err(StorageError::Configuration(format!(
            "{kind} access token is required"
        ))),
    }
}

#[async_trait]
impl ProviderFactory for DefaultProviderFactory {
    async fn create(
        &self,
        kind: StorageProviderKind,
        options: &StorageOptions,
        tokens: Arc<dyn TokenStore>,
    ) -> Result<Arc<dyn StorageProvider>, StorageError> {
        match kind {
            StorageProviderKind::Local => {
                let root = present(&options.base_path)
                    .map(|p| PathBuf::from(shellexpand::tilde(p).into_owned()))
                    .unwrap_or_else(|| self.local_root.clone());
                Ok(Arc::new(LocalStorageProvider::new(root)))
            }
            StorageProviderKind::Dropbox => {
                require_token(tokens.as_ref(), kind).await?;
                let dropbox_opts = options.dropbox();
                let mut provider =
                    DropboxStorageProvider::new(tokens, present(&options.base_path));
                match (
                    present(&dropbox_opts.refresh_token),
                    present(&dropbox_opts.app_key),
                    present(&dropbox_opts.app_secret),
                ) {
                    (Some(refresh), Some(key), Some(secret)) => {
                        provider = provider.with_refresh(Arc::new(DropboxOAuth::new(key, secret)), refresh);
                    }
                    _ => tracing::debug!("Dropbox refresh credentials incomplete; token refresh disabled"),
                }
                Ok(Arc::new(provider))
            }
            StorageProviderKind::Gmail => {
                require_token(tokens.as_ref(), kind).await?;
                let gmail_opts = options.gmail();
                let mut provider = GmailStorageProvider::new(tokens, self.gate.clone())
                    .with_mode(self.gate_mode)
                    .with_filters(gmail_opts.subject_pattern.clone(), gmail_opts.from_email.clone());
                match (
                    present(&gmail_opts.refresh_token),
                    present(&gmail_opts.client_id),
                    present(&gmail_opts.client_secret),
                ) {
                    (Some(refresh), Some(id), Some(secret)) => {
                        provider = provider.with_refresh(Arc::new(GoogleOAuth::new(id, secret)), refresh);
                    }
                    _ => tracing::debug!("Gmail refresh credentials incomplete; token refresh disabled"),
                }
                Ok(Arc::new(provider))
            }
        }
    }
}

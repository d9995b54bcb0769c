//! Access token storage for providers that refresh OAuth tokens.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use csvsync_core::{ConfigStore, StorageOptions, StorageProviderKind};

use crate::error::StorageError;

/// Where providers read their current access token and persist refreshed ones.
///
/// `set` must have durably stored the token when it returns `Ok`.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, provider: StorageProviderKind) -> Option<String>;

    async fn set(&self, provider: StorageProviderKind, token: &str) -> Result<(), StorageError>;
}

/// In-process token store.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<StorageProviderKind, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(self, provider: StorageProviderKind, token: &str) -> Self {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert(provider, token.to_string());
        }
        self
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, provider: StorageProviderKind) -> Option<String> {
        self.tokens.read().ok()?.get(&provider).cloned()
    }

    async fn set(&self, provider: StorageProviderKind, token: &str) -> Result<(), StorageError> {
        self.tokens
            .write()
            .map_err(|_| StorageError::Configuration("token store poisoned".into()))?
            .insert(provider, token.to_string());
        Ok(())
    }
}

/// Token store backed by the config document.
///
/// Reads go to the document, so tokens rotated while the daemon runs are
/// picked up. The cache only answers when the document cannot be read.
/// Refreshed tokens land in `storage.options.<provider>.access_token`,
/// never in the legacy flat keys. The write re-reads the whole document,
/// so concurrent refreshes resolve last-write-wins.
pub struct ConfigTokenStore {
    store: ConfigStore,
    cache: RwLock<HashMap<StorageProviderKind, String>>,
}

impl ConfigTokenStore {
    /// Seed the cache from already-normalized options.
    pub fn new(store: ConfigStore, options: &StorageOptions) -> Self {
        let mut cache = HashMap::new();
        for kind in [StorageProviderKind::Dropbox, StorageProviderKind::Gmail] {
            if let Some(token) = options.namespaced_access_token(kind) {
                cache.insert(kind, token);
            }
        }
        Self {
            store,
            cache: RwLock::new(cache),
        }
    }
}

#[async_trait]
impl TokenStore for ConfigTokenStore {
    async fn get(&self, provider: StorageProviderKind) -> Option<String> {
        match self.store.load() {
            Ok(config) => {
                let token = config.storage.options.namespaced_access_token(provider);
                if let Ok(mut cache) = self.cache.write() {
                    match &token {
                        Some(t) => cache.insert(provider, t.clone()),
                        None => cache.remove(&provider),
                    };
                }
                token
            }
            Err(e) => {
                tracing::warn!("⚠️ Could not read {} token from config, using cached: {}", provider, e);
                self.cache.read().ok()?.get(&provider).cloned()
            }
        }
    }

    async fn set(&self, provider: StorageProviderKind, token: &str) -> Result<(), StorageError> {
        self.store
            .update(|config| {
                config.storage.options.set_access_token(provider, token);
                Ok(())
            })
            .map_err(|e| StorageError::Configuration(format!("Failed to persist token: {e}")))?;

        self.cache
            .write()
            .map_err(|_| StorageError::Configuration("token cache poisoned".into()))?
            .insert(provider, token.to_string());
        tracing::info!("🔑 Persisted refreshed {} access token", provider);
        Ok(())
    }
}

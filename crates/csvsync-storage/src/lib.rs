//! # CSVSync Storage
//!
//! Uniform upload/download/list/delete over the places import files live.
//! Each remote provider owns its own auth refresh and rate-limit policy, so
//! callers only ever see a classified [`StorageError`].
//!
//! ```text
//! ProviderFactory (StorageProviderKind)
//!   ├── Local    → filesystem under a base dir
//!   ├── Dropbox  → HTTP API v2, 429/network backoff, 401 refresh
//!   ├── Gmail    → attachments via search, request gate, 401 refresh
//!   └── Mock     → in-memory map (tests)
//! ```

pub mod backoff;
pub mod dropbox;
pub mod error;
pub mod factory;
pub mod gate;
pub mod gmail;
pub mod gmail_client;
pub mod local;
pub mod mock;
pub mod oauth;
pub mod provider;
pub mod token;

pub use dropbox::DropboxStorageProvider;
pub use error::StorageError;
pub use factory::{DefaultProviderFactory, ProviderFactory};
pub use gate::{GateMode, GmailRequestGate};
pub use gmail::GmailStorageProvider;
pub use local::LocalStorageProvider;
pub use mock::MockStorageProvider;
pub use oauth::{DropboxOAuth, GoogleOAuth, OAuthRefresher, TokenResponse};
pub use provider::{DownloadedFile, FileInfo, StorageProvider};
pub use token::{ConfigTokenStore, MemoryTokenStore, TokenStore};

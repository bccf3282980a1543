//! Host capabilities the router dispatches to
//!
//! Each capability is an external collaborator. Synchronous ones return
//! directly and run on the bridge context; slow ones return a boxed future
//! that the bridge spawns, marshalling the completion back afterwards.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::CapabilityError;

pub type CapabilityFuture<T> = BoxFuture<'static, Result<T, CapabilityError>>;

/// Persistent, externally mutable key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CapabilityError>;
    fn put(&self, key: &str, value: &str) -> Result<(), CapabilityError>;
    fn delete(&self, key: &str) -> Result<(), CapabilityError>;
    /// Keys that changed, from this process or any other.
    fn subscribe(&self) -> broadcast::Receiver<String>;
}

pub trait Clipboard: Send + Sync {
    /// Resolves once the text is on the clipboard.
    fn set_text(&self, label: &str, text: &str) -> CapabilityFuture<()>;
}

/// Single secret gated by user presence.
pub trait SecureValueStore: Send + Sync {
    /// Start storing `value`. Completes after the presence check, in the
    /// background; errors after that point are only logged.
    fn remember(&self, value: Vec<u8>) -> Result<(), CapabilityError>;
    /// `None` when nothing has been remembered.
    fn recall(&self) -> CapabilityFuture<Option<Vec<u8>>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub account_type: String,
}

/// Outcome of asking the account provider for a token
#[derive(Debug, Clone, PartialEq)]
pub enum TokenFetch {
    Token(String),
    /// The provider needs an interactive step first. The prompt is passed
    /// through to the consent flow untouched.
    ConsentRequired(Value),
}

pub trait AccountTokenProvider: Send + Sync {
    fn fetch_token(&self, account: Account, scope: String) -> CapabilityFuture<TokenFetch>;
}

/// Writable sinks chosen through the document-creation flow
pub trait DocumentStore: Send + Sync {
    fn write(&self, location: String, bytes: Vec<u8>) -> CapabilityFuture<()>;
}

pub trait AppLauncher: Send + Sync {
    fn open_app(&self) -> Result<(), CapabilityError>;
}

/// Everything the router can reach
#[derive(Clone)]
pub struct Capabilities {
    pub storage: Arc<dyn KeyValueStore>,
    pub clipboard: Arc<dyn Clipboard>,
    pub secure_store: Arc<dyn SecureValueStore>,
    pub tokens: Arc<dyn AccountTokenProvider>,
    pub documents: Arc<dyn DocumentStore>,
    pub launcher: Arc<dyn AppLauncher>,
}

/// Stand-in for capabilities the host was not configured with.
#[derive(Debug, Clone, Copy)]
pub struct Unavailable(pub &'static str);

impl Clipboard for Unavailable {
    fn set_text(&self, _label: &str, _text: &str) -> CapabilityFuture<()> {
        let name = self.0;
        async move { Err(CapabilityError::Unsupported(name)) }.boxed()
    }
}

impl SecureValueStore for Unavailable {
    fn remember(&self, _value: Vec<u8>) -> Result<(), CapabilityError> {
        Err(CapabilityError::Unsupported(self.0))
    }

    fn recall(&self) -> CapabilityFuture<Option<Vec<u8>>> {
        let name = self.0;
        async move { Err(CapabilityError::Unsupported(name)) }.boxed()
    }
}

impl AccountTokenProvider for Unavailable {
    fn fetch_token(&self, _account: Account, _scope: String) -> CapabilityFuture<TokenFetch> {
        let name = self.0;
        async move { Err(CapabilityError::Unsupported(name)) }.boxed()
    }
}

impl AppLauncher for Unavailable {
    fn open_app(&self) -> Result<(), CapabilityError> {
        Err(CapabilityError::Unsupported(self.0))
    }
}

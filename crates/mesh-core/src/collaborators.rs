//! External capabilities the mesh relies on but does not implement:
//! authentication, AI completion and group membership.

use crate::id::ClientId;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Who the credentials belong to (user, service, key name)
    pub subject: String,
    /// If set, the credentials may only register this client id
    pub client_id: Option<ClientId>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct AuthRejected(pub String);

#[async_trait]
pub trait AuthValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<Principal, AuthRejected>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("no provider available: {0}")]
    Unavailable(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("completion failed: {0}")]
    Failed(String),
}

/// A completion request with its routing hints.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub client_id: ClientId,
    pub content: Value,
    pub provider: Option<String>,
    pub model: Option<String>,
}

pub enum CompletionOutput {
    /// The whole answer at once.
    Complete(Value),
    /// Chunks as they arrive; a chunk error aborts the stream.
    Stream(BoxStream<'static, Result<Value, ProviderError>>),
}

impl std::fmt::Debug for CompletionOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete(v) => f.debug_tuple("Complete").field(v).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionOutput, ProviderError>;
}

#[async_trait]
pub trait GroupResolver: Send + Sync {
    /// Members of `group`, or `None` if the group does not exist.
    async fn members(&self, group: &str) -> Option<HashSet<ClientId>>;
}

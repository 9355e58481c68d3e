use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::core::link::RemoteRef;

/// What kind of remote marker turns a message into a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "lowercase")]
pub enum AnnotationSource {
    /// An emoji reaction left by the token owner, keyed by emoji name.
    Reaction(String),
    /// Channel bookmarks, keyed by channel id. Not implemented by any
    /// client yet; requests for it fail with `RemoteError::Unsupported`.
    Bookmark(String),
}

impl AnnotationSource {
    pub fn key(&self) -> &str {
        match self {
            Self::Reaction(k) | Self::Bookmark(k) => k,
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Reaction(_) => "reaction",
            Self::Bookmark(_) => "bookmark",
        }
    }
}

/// The set of conversations annotations are listed from. Also the cache
/// partition key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub source: AnnotationSource,
    /// Conversation ids to keep. Empty means everything reachable.
    pub channels: Vec<String>,
}

impl Scope {
    pub fn new(source: AnnotationSource, mut channels: Vec<String>) -> Self {
        channels.sort();
        channels.dedup();
        Self { source, channels }
    }

    pub fn key(&self) -> String {
        let channels = if self.channels.is_empty() {
            "*".to_string()
        } else {
            self.channels.join(",")
        };
        format!("{}:{}@{}", self.source.kind_label(), self.source.key(), channels)
    }

    pub fn allows(&self, conversation_id: &str) -> bool {
        self.channels.is_empty() || self.channels.iter().any(|c| c == conversation_id)
    }
}

/// One annotation observed on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub remote: RemoteRef,
    pub message_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
}

fn complete_default() -> bool {
    true
}

/// Result of listing one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub annotations: Vec<Annotation>,
    /// False when paging stopped early. Missing annotations then prove
    /// nothing about removal.
    #[serde(default = "complete_default")]
    pub complete: bool,
}

impl Listing {
    pub fn full(annotations: Vec<Annotation>) -> Self {
        Self {
            annotations,
            complete: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("{0} annotations are not supported")]
    Unsupported(&'static str),
}

impl RemoteError {
    /// Faults that retrying cannot fix and that need the user to act.
    pub fn is_config_fault(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Unsupported(_))
    }
}

/// Capability to list and remove annotations on the messaging platform.
pub trait AnnotationClient {
    fn list_annotations(
        &self,
        scope: &Scope,
    ) -> impl Future<Output = Result<Listing, RemoteError>>;

    /// Remove one annotation. Succeeds if it is already gone.
    fn remove_annotation(
        &self,
        remote: &RemoteRef,
        source: &AnnotationSource,
    ) -> impl Future<Output = Result<(), RemoteError>>;
}

use std::path::PathBuf;

/// Errors surfaced to the command layer.
///
/// Transient remote failures never show up here: the sync engine folds them
/// into report warnings. Only configuration faults escape as `Auth`.
#[derive(Debug, thiserror::Error)]
pub enum TodoError {
    #[error("task #{0} not found")]
    NotFound(u32),

    #[error("{0}")]
    InvalidInput(String),

    #[error("Slack authentication failed: {0}")]
    Auth(String),

    #[error("failed to access {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid JSON: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("timed out waiting for lock {}", .0.display())]
    Lock(PathBuf),
}

pub type Result<T> = std::result::Result<T, TodoError>;

impl TodoError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}

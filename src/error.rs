use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Worker failed to respond")]
    WorkerGone,

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Prompt is empty")]
    EmptyPrompt,

    #[error("Prompt is {len} characters, the limit is {max}")]
    PromptTooLong { len: usize, max: usize },

    #[error("Nothing to retry")]
    NothingToRetry,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ChatError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ChatError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

use crate::conversation::Message;
use async_trait::async_trait;

pub mod openai;

pub use openai::OpenAiClient;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("no API key configured (set CHATPANE_API_KEY or api_key in config.toml)")]
    MissingApiKey,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("service returned no choices")]
    EmptyResponse,
    #[error("service returned an empty reply")]
    EmptyReply,
}

/// Produces the next assistant turn for a message history.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, CompletionError>;
}

/// Outcome of one exchange as presented to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Assistant(String),
    Failed(String),
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Self::Assistant(text) | Self::Failed(text) => text,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl From<Result<String, CompletionError>> for Reply {
    fn from(outcome: Result<String, CompletionError>) -> Self {
        match outcome {
            Ok(text) => Self::Assistant(text),
            Err(err) => Self::Failed(format!("Error: {err}")),
        }
    }
}

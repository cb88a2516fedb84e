//! Error types surfaced by the generation loop.

use thiserror::Error;

/// Failure payload of a generation call.
///
/// Collaborator errors never escape the loop as-is; they are flattened into
/// one of these variants together with their description.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    /// The tokenizer or model capability is missing. No iteration was attempted.
    #[error("Model or tokenizer not loaded: {0}")]
    ResourceUnavailable(String),

    /// Tokenization, a forward pass or detokenization failed mid-call.
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
}

/// Discriminant of a [`GenerationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ResourceUnavailable,
    InferenceFailed,
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ResourceUnavailable(_) => ErrorKind::ResourceUnavailable,
            Self::InferenceFailed(_) => ErrorKind::InferenceFailed,
        }
    }

    /// The underlying description, without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::ResourceUnavailable(msg) | Self::InferenceFailed(msg) => msg,
        }
    }

    pub(crate) fn inference(err: anyhow::Error) -> Self {
        Self::InferenceFailed(format!("{err:#}"))
    }
}

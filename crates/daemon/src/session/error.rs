use thiserror::Error;

/// Errors returned by session and template commands.
///
/// All variants are client errors and surface as BadRequest responses
/// carrying the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),
}

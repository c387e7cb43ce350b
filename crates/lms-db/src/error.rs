use thiserror::Error;

/// Errors surfaced by the message store operations.
#[derive(Debug, Error)]
pub enum MessageError {
    /// A required field is blank or out of bounds.
    #[error("{0}")]
    Validation(String),

    #[error("recipient not found: {0}")]
    RecipientNotFound(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The caller is not a participant of the message.
    #[error("{0}")]
    Forbidden(String),

    /// The caller's role may not address the requested recipient or audience.
    #[error("{0}")]
    PolicyViolation(String),

    #[error("no recipients matched the selected audience")]
    EmptyAudience,

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for MessageError {
    fn from(e: rusqlite::Error) -> Self {
        MessageError::Store(e.into())
    }
}

pub type Result<T> = std::result::Result<T, MessageError>;

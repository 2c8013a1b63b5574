use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

/// Everything that can go wrong while handling one session's event.
///
/// None of these close the connection: the hub reports them to the actor
/// as an `error` event and moves on to the next frame.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("authentication failed: {0}")]
    Authentication(&'static str),
    #[error("access denied")]
    AccessDenied,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("reply target does not exist in this room")]
    InvalidReference,
    #[error("storage failure: {0}")]
    Persistence(#[from] sqlx::Error),
    #[error("operation timed out")]
    Timeout,
}

impl ChatError {
    pub fn validation(reason: impl Into<String>) -> ChatError {
        ChatError::Validation(reason.into())
    }

    /// Text sent back to the client. Storage details stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::Persistence(_) => "server error".to_owned(),
            other => other.to_string(),
        }
    }

    /// Failures of the server rather than of the request.
    pub fn is_internal(&self) -> bool {
        matches!(self, ChatError::Persistence(_) | ChatError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_details_are_not_sent_to_clients() {
        let err = ChatError::from(sqlx::Error::RowNotFound);
        assert_eq!(err.client_message(), "server error");
        assert!(err.is_internal());
        assert!(err.to_string().starts_with("storage failure"));
    }

    #[test]
    fn request_errors_are_reported_verbatim() {
        assert_eq!(ChatError::NotFound("room").client_message(), "room not found");
        assert_eq!(ChatError::AccessDenied.client_message(), "access denied");
        assert!(!ChatError::InvalidReference.is_internal());
    }
}

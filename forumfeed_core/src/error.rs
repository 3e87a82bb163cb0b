use thiserror::Error;

pub type FeedResult<T> = Result<T, FeedError>;

/// Failures surfaced by feed operations.
///
/// The type is `Clone` because a coalesced page load hands the same outcome
/// to every waiting caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    /// The remote feed API could not be reached or answered with an error.
    /// Safe to retry.
    #[error("{}", fetch_message(.status, .message))]
    Fetch {
        status: Option<u16>,
        message: String,
    },

    /// Malformed input such as a partially resolved query signature.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A vote targeted a post that is not present in any cached page.
    #[error("post {0} is not loaded")]
    UnknownPost(String),
}

impl FeedError {
    pub fn fetch(message: impl std::fmt::Display) -> Self {
        FeedError::Fetch {
            status: None,
            message: message.to_string(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        FeedError::Fetch {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        FeedError::Validation(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Fetch { .. })
    }
}

fn fetch_message(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("feed API returned {code}: {message}"),
        None => format!("feed API request failed: {message}"),
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::Fetch {
            status: err.status().map(|status| status.as_u16()),
            message: err.to_string(),
        }
    }
}

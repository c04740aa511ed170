use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Model API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Model request timed out after {0}s")]
    Timeout(u64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing API credential: set {0}")]
    MissingCredential(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LlmError {
    /// Transport-level failures the caller may retry, including an unreadable
    /// response body.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RequestFailed(_)
            | LlmError::Timeout(_)
            | LlmError::InvalidResponse(_)
            | LlmError::Serialization(_) => true,
            LlmError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type LlmResult<T> = Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let garbage = serde_json::from_str::<serde_json::Value>("<html>bad gateway</html>").unwrap_err();
        assert!(LlmError::Serialization(garbage).is_retryable());
        assert!(LlmError::Timeout(120).is_retryable());
        assert!(LlmError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(LlmError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(!LlmError::Status { status: 401, body: String::new() }.is_retryable());
        assert!(!LlmError::MissingCredential("PERPLEXITY_API_KEY").is_retryable());
    }
}

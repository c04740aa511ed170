use analysis_core::ParseError;
use analysis_store::StoreError;
use llm_client::LlmError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Query is empty")]
    EmptyQuery,

    #[error("Model request failed: {0}")]
    Transport(#[from] LlmError),

    #[error("Could not read the model response: {source}")]
    Parse {
        #[source]
        source: ParseError,
        raw_completion: String,
    },

    #[error("Analysis store failed: {0}")]
    Store(#[from] StoreError),
}

impl AnalyzeError {
    /// Whether asking again later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AnalyzeError::Transport(e) => e.is_retryable(),
            AnalyzeError::Parse { .. } => true,
            AnalyzeError::EmptyQuery | AnalyzeError::Store(_) => false,
        }
    }
}

pub type AnalyzeResult<T> = Result<T, AnalyzeError>;

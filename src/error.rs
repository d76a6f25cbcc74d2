/// Application-level errors
///
/// Fatal variants abort a run before any watchlist mutation is attempted.
/// Per-item problems (`Lookup`, `Mutation`) are recorded in the run report
/// instead of being propagated out of the engine.
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Target unavailable: {0}")]
    TargetUnavailable(String),

    #[error("Lookup error: {0}")]
    Lookup(String),

    #[error("Mutation error: {message}")]
    Mutation { retryable: bool, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors that must stop the run before anything is mutated
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::MalformedInput(_)
                | AppError::SourceUnavailable(_)
                | AppError::TargetUnavailable(_)
                | AppError::Config(_)
        )
    }

    /// Whether retrying the same call may succeed (rate limits, transient network failures)
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Mutation { retryable, .. } => *retryable,
            AppError::HttpClient(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    pub fn retryable_mutation(message: impl Into<String>) -> Self {
        AppError::Mutation {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn permanent_mutation(message: impl Into<String>) -> Self {
        AppError::Mutation {
            retryable: false,
            message: message.into(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Dataset format error at line {line}: {message}")]
    DatasetFormat { line: usize, message: String },

    #[error("Dataset schema error at line {line}: {message}")]
    DatasetSchema { line: usize, message: String },

    #[error("Adapter invocation error: {0}")]
    AdapterInvocation(String),

    #[error("Metric resolution error: {0}")]
    MetricResolution(String),

    #[error("Metric '{metric}' failed: {message}")]
    MetricComputation { metric: String, message: String },

    #[error("Scoring backend error: {message}")]
    ScoringBackend { message: String, retryable: bool },

    #[error("Run cancelled after {completed} records")]
    Cancelled { completed: usize },

    #[error("Record {index}: {source}")]
    Record {
        index: usize,
        #[source]
        source: Box<EvalError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl EvalError {
    /// Scoring backend failure that may succeed on a later attempt.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::ScoringBackend { message: message.into(), retryable: true }
    }

    /// Scoring backend failure that must not be retried (auth, bad request).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::ScoringBackend { message: message.into(), retryable: false }
    }

    /// Attach the dataset index of the record being processed.
    pub fn at_record(self, index: usize) -> Self {
        Self::Record { index, source: Box::new(self) }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ScoringBackend { retryable, .. } => *retryable,
            Self::Record { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;

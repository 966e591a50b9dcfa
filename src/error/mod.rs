use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvalError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Computation error: {message}")]
    Computation { message: String },
}

/// Bad caller input, rejected before any work begins
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("No trip rows were provided")]
    NoRows,

    #[error("Invalid policy URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Trip data has no '{column}' column (looked for: {candidates})")]
    MissingColumn { column: String, candidates: String },
}

/// Expression evaluator errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("Expression is empty")]
    Empty,

    #[error("Invalid character '{ch}' at position {position}")]
    InvalidCharacter { ch: char, position: usize },

    #[error("Unbalanced parentheses")]
    UnbalancedParens,

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Malformed expression: {message}")]
    Malformed { message: String },

    #[error("Result is not a finite number: {value}")]
    InvalidResult { value: f64 },
}

/// Tabular query tool errors
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Only SELECT statements are permitted")]
    Forbidden,

    #[error("No dataset loaded; call load() before query()")]
    NotInitialized,

    #[error("Dataset has no columns")]
    EmptyDataset,

    #[error("Query timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Policy passage retriever errors
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to fetch {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Fetching {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for expression evaluation
pub type EvalResult<T> = Result<T, EvalError>;

/// Result type alias for tabular queries
pub type QueryResult<T> = Result<T, QueryError>;

/// Result type alias for policy retrieval
pub type RetrievalResult<T> = Result<T, RetrievalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Computation {
            message: "break-even undefined".to_string(),
        };
        assert_eq!(err.to_string(), "Computation error: break-even undefined");
    }

    #[test]
    fn test_validation_error_display() {
        assert_eq!(
            ValidationError::NoRows.to_string(),
            "No trip rows were provided"
        );

        let err = ValidationError::InvalidUrl {
            url: "nope".to_string(),
            reason: "relative URL without a base".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid policy URL 'nope': relative URL without a base"
        );
    }

    #[test]
    fn test_eval_error_display() {
        assert_eq!(EvalError::DivisionByZero.to_string(), "Division by zero");
        assert_eq!(
            EvalError::UnbalancedParens.to_string(),
            "Unbalanced parentheses"
        );

        let err = EvalError::InvalidCharacter {
            ch: 'x',
            position: 3,
        };
        assert_eq!(err.to_string(), "Invalid character 'x' at position 3");
    }

    #[test]
    fn test_query_error_display() {
        assert_eq!(
            QueryError::Forbidden.to_string(),
            "Only SELECT statements are permitted"
        );

        let err = QueryError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Query timed out after 5000ms");
    }

    #[test]
    fn test_retrieval_error_display() {
        let err = RetrievalError::Timeout {
            url: "https://example.com/pricing".to_string(),
            timeout_ms: 10000,
        };
        assert_eq!(
            err.to_string(),
            "Fetching https://example.com/pricing timed out after 10000ms"
        );
    }

    #[test]
    fn test_eval_error_conversion_to_app_error() {
        let app_err: AppError = EvalError::DivisionByZero.into();
        assert!(matches!(app_err, AppError::Evaluation(_)));
        assert!(app_err.to_string().contains("Division by zero"));
    }

    #[test]
    fn test_query_error_conversion_to_app_error() {
        let app_err: AppError = QueryError::NotInitialized.into();
        assert!(matches!(app_err, AppError::Query(_)));
    }

    #[test]
    fn test_validation_error_conversion_to_app_error() {
        let app_err: AppError = ValidationError::NoRows.into();
        assert!(matches!(app_err, AppError::Validation(_)));
    }
}

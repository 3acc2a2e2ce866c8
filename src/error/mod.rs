use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ArbError {
    /// Network/connectivity issues
    #[error("Network Error: {0}")]
    NetworkError(String),

    /// Exchange-specific errors (rejected orders, malformed responses, etc.)
    #[error("Exchange Error: {0}")]
    ExchangeError(String),

    /// Timeout errors for operations
    #[error("Timeout Error: {0}")]
    TimeoutError(String),

    /// Order book was not obtained in time for a safe trade decision
    #[error("Stale Order Book: {0}")]
    StaleOrderBook(String),

    /// Insufficient balance for trade execution
    #[error("Insufficient Balance: {0}")]
    InsufficientBalance(String),

    /// Errors from the external persistence collaborator
    #[error("Persistence Error: {0}")]
    PersistenceError(String),

    /// Parsing errors for exchange payloads or persisted records
    #[error("Parse Error: {0}")]
    ParseError(String),

    /// Configuration errors
    #[error("Config Error: {0}")]
    ConfigError(String),

    /// A zero or non-finite rate where a real one was required
    #[error("Invalid Rate: {0}")]
    InvalidRate(String),

    /// Trade execution errors
    #[error("Execution Error: {0}")]
    ExecutionError(String),

    /// Unknown/unclassified errors
    #[error("Unknown Error: {0}")]
    Unknown(String),
}

impl From<serde_json::Error> for ArbError {
    fn from(err: serde_json::Error) -> Self {
        ArbError::ParseError(format!("JSON serialization/deserialization error: {}", err))
    }
}

impl From<anyhow::Error> for ArbError {
    fn from(err: anyhow::Error) -> Self {
        ArbError::Unknown(format!("{}", err))
    }
}

impl ArbError {
    /// Determines if an error is recoverable through retry on a later tick
    pub fn is_recoverable(&self) -> bool {
        match self {
            ArbError::NetworkError(_) => true,
            ArbError::ExchangeError(_) => true,
            ArbError::TimeoutError(_) => true,
            ArbError::StaleOrderBook(_) => true,
            ArbError::InsufficientBalance(_) => false, // Need to wait for balance
            ArbError::PersistenceError(_) => true,
            ArbError::ParseError(_) => false, // Data format issues aren't recoverable
            ArbError::ConfigError(_) => false, // Config needs fixing
            ArbError::InvalidRate(_) => true,  // Rates refresh on the next fetch
            ArbError::ExecutionError(_) => false,
            ArbError::Unknown(_) => true, // Unknown errors might be recoverable
        }
    }

    /// Categorizes error for monitoring
    pub fn categorize(&self) -> ErrorCategory {
        match self {
            ArbError::NetworkError(_) | ArbError::TimeoutError(_) => ErrorCategory::Network,
            ArbError::ExchangeError(_) | ArbError::ExecutionError(_) => ErrorCategory::Trading,
            ArbError::StaleOrderBook(_) | ArbError::InvalidRate(_) | ArbError::ParseError(_) => {
                ErrorCategory::Data
            }
            ArbError::InsufficientBalance(_) => ErrorCategory::Balance,
            ArbError::PersistenceError(_) => ErrorCategory::Infrastructure,
            ArbError::ConfigError(_) => ErrorCategory::Configuration,
            ArbError::Unknown(_) => ErrorCategory::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCategory {
    Network,
    Trading,
    Data,
    Balance,
    Configuration,
    Infrastructure,
    Critical,
}

use thiserror::Error;

/// Application-wide error types for taxroll.
///
/// Every variant that can appear on a job is local to that job: it is
/// recorded on the job and surfaced at aggregation, never propagated to
/// sibling jobs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    /// Input URL is missing a usable `prop_id` query parameter.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// No proxy outside the bad set is available.
    #[error("Proxy pool exhausted: no usable proxy")]
    ProxyExhaustion,

    /// The user-agent list is empty.
    #[error("No user agents available")]
    NoUserAgents,

    /// Network/connection error or non-2xx response.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The fetched document did not have the expected structure.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Store query or write failed (transaction rolled back).
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Stable label used for logging and per-kind failure counts.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::MalformedInput(_) => "malformed_input",
            AppError::ProxyExhaustion => "proxy_exhaustion",
            AppError::NoUserAgents => "no_user_agents",
            AppError::NetworkError(_) | AppError::Timeout(_) => "network_error",
            AppError::ParseError(_) => "parse_error",
            AppError::PersistenceError(_) => "persistence_error",
            AppError::ConfigError(_) => "config_error",
            AppError::Generic(_) => "generic",
        }
    }

    /// Returns true if the failure happened on the wire (counts against the proxy).
    pub fn is_network(&self) -> bool {
        matches!(self, AppError::NetworkError(_) | AppError::Timeout(_))
    }
}

use thiserror::Error;

/// Errors raised while talking to the market data provider (§7: `ProviderTransient`,
/// `ProviderPermanent`, `RateLimited`, `CircuitOpen`).
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("transient provider failure for {operation}: {reason}")]
    Transient { operation: String, reason: String },

    #[error("permanent provider failure for {operation}: {reason}")]
    Permanent { operation: String, reason: String },

    #[error("rate limited on {operation}: retry after {retry_after_secs}s")]
    RateLimited {
        operation: String,
        retry_after_secs: u64,
    },

    #[error("circuit open for endpoint {endpoint}")]
    CircuitOpen { endpoint: String },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }
}

/// Errors raised by the TTL cache (§4.2).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("ttl must be greater than zero")]
    InvalidTtl,
}

/// Errors raised while loading layered configuration (§7: `ConfigInvalid`).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required configuration key: {0}")]
    MissingKey(String),
}

/// Errors raised while opening or migrating the store (§7: `StorageInit`, `StoreWrite`).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to initialize store: {0}")]
    Init(String),

    #[error("migration {version} failed: {reason}")]
    Migration { version: i64, reason: String },

    #[error("batch write failed: {0}")]
    Write(String),
}

/// Errors surfaced from the market calendar (§4.1).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("instant has no associated time zone")]
    InvalidTz,
}

/// A single exported file's failure, recorded in the exporter's run summary without
/// aborting the other exports (§7: `ExporterFailure`).
#[derive(Debug, Error)]
#[error("export of {file} failed: {reason}")]
pub struct ExporterFailure {
    pub file: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_transient_is_retryable() {
        let e = ProviderError::Transient {
            operation: "get_current_price".into(),
            reason: "timeout".into(),
        };
        assert!(e.is_retryable());
    }

    #[test]
    fn provider_permanent_is_not_retryable() {
        let e = ProviderError::Permanent {
            operation: "get_current_price".into(),
            reason: "schema".into(),
        };
        assert!(!e.is_retryable());
    }

    #[test]
    fn cache_error_formatting() {
        assert_eq!(
            CacheError::InvalidTtl.to_string(),
            "ttl must be greater than zero"
        );
    }
}

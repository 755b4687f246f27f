//! Error types for the signal engine

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the signal engine
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Data errors
    #[error("Data unavailable for {what}: {reason}")]
    DataUnavailable { what: String, reason: String },

    #[error("Insufficient history: need {need} candles, got {got}")]
    InsufficientHistory { need: usize, got: usize },

    #[error("Rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("Upstream timeout after {0}ms")]
    Timeout(u64),

    // Fatal decision errors
    #[error("No current spot price for {0}")]
    MissingSpotPrice(String),

    #[error("No timeframe data for {0}")]
    NoTimeframeData(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Shorthand for a `DataUnavailable` error
    pub fn unavailable(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::DataUnavailable {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimited(_) | Error::Timeout(_))
    }

    /// Check if this error must abort the whole decision
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::MissingSpotPrice(_) | Error::NoTimeframeData(_) | Error::Config(_)
        )
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::RateLimited("429".to_string()).is_retryable());
        assert!(Error::Timeout(5000).is_retryable());
        assert!(!Error::unavailable("RELIANCE", "empty").is_retryable());
        assert!(!Error::MissingSpotPrice("NIFTY".to_string()).is_retryable());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::MissingSpotPrice("NIFTY".to_string()).is_fatal());
        assert!(Error::NoTimeframeData("NIFTY".to_string()).is_fatal());
        assert!(!Error::unavailable("futures", "timeout").is_fatal());
        assert!(!Error::RateLimited("429".to_string()).is_fatal());
    }
}

use thiserror::Error;

use crate::weather::LocationId;

/// Main error type for the weather archive
#[derive(Error, Debug)]
pub enum WxError {
    #[error("Location not found: {location_id}")]
    NotFound { location_id: LocationId },

    #[error("Invalid request range: {message}")]
    InvalidRange { message: String },

    #[error("Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl WxError {
    /// Local validation failures are surfaced immediately and never retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            WxError::NotFound { .. } | WxError::InvalidRange { .. } | WxError::Validation(_)
        )
    }

    /// Callers may wrap acquisitions in their own retry policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            WxError::Acquisition(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Failures talking to the remote archive provider
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    #[error("Provider request timed out: {message}")]
    Timeout { message: String },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },

    #[error("Provider returned HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("Provider request failed: {message}")]
    Request { message: String },

    #[error("Invalid provider response: {message}")]
    InvalidResponse { message: String },
}

impl AcquisitionError {
    /// Short failure class used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            AcquisitionError::Timeout { .. } => "timeout",
            AcquisitionError::Connection { .. } => "connection",
            AcquisitionError::HttpStatus { .. } => "http_status",
            AcquisitionError::Request { .. } => "request",
            AcquisitionError::InvalidResponse { .. } => "invalid_response",
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            AcquisitionError::Timeout { .. } | AcquisitionError::Connection { .. } => true,
            AcquisitionError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Local persistence failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query execution failed: {query}, error: {error}")]
    QueryFailed { query: String, error: String },

    #[error("Stored data is corrupt: {message}")]
    Corruption { message: String },

    #[error("Payload encoding failed: {message}")]
    Encoding { message: String },
}

/// Result type alias for weather archive operations
pub type WxResult<T> = Result<T, WxError>;

/// Result type alias for store and cache operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::WxError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::WxError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::WxError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = AcquisitionError::HttpStatus {
            status: 400,
            message: "Parameter 'hourly' is invalid".to_string(),
        };

        assert!(error.to_string().contains("HTTP 400"));
        assert!(error.to_string().contains("hourly"));
    }

    #[test]
    fn test_error_conversion() {
        let acquisition = AcquisitionError::Timeout {
            message: "30s elapsed".to_string(),
        };
        let wx_error: WxError = acquisition.into();

        match wx_error {
            WxError::Acquisition(AcquisitionError::Timeout { .. }) => (),
            _ => panic!("Expected Acquisition error"),
        }
    }

    #[test]
    fn test_retry_classification() {
        let timeout: WxError = AcquisitionError::Timeout { message: String::new() }.into();
        let throttled: WxError = AcquisitionError::HttpStatus { status: 429, message: String::new() }.into();
        let bad_request: WxError = AcquisitionError::HttpStatus { status: 400, message: String::new() }.into();
        let not_found = WxError::NotFound { location_id: LocationId(3) };

        assert!(timeout.is_retryable());
        assert!(throttled.is_retryable());
        assert!(!bad_request.is_retryable());
        assert!(!not_found.is_retryable());
        assert!(not_found.is_validation());
    }

    #[test]
    fn test_macros() {
        let _validation_err = validation_error!("Invalid value: {}", 42);
        let _internal_err = internal_error!("Something went wrong");
        let _config_err = config_error!("Missing required field: {}", "archive_url");
    }
}

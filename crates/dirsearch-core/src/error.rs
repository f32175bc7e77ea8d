//! Error types for directory lookups.
//!
//! Every failure a search can report lives in one enum so callers can match on the
//! condition they care about, most notably [`Error::SizeLimitExceeded`], which is returned
//! alongside the partial result set rather than instead of it.

use thiserror::Error;

/// Main error type for directory operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Neither explicit credentials nor native platform support are available.
    #[error("Provided parameters are unsupported on current operating system")]
    Unsupported,

    /// The target record type cannot be materialized (for example two fields share an attribute).
    #[error("Invalid record type: {0}")]
    InvalidRecord(String),

    /// The transport connection could not be established.
    #[error("Failed to connect to {address}: {message}")]
    ConnectionFailed {
        /// Address that was dialed
        address: String,
        /// Error message
        message: String,
    },

    /// The initial bind was rejected.
    #[error("Initial bind for user {identity:?} failed: {message}")]
    BindFailed {
        /// Identity used for the bind
        identity: String,
        /// Error message
        message: String,
    },

    /// The directory stopped returning entries at the configured size limit.
    #[error("Size Limit Exceeded")]
    SizeLimitExceeded,

    /// The search request failed.
    #[error("Search failed: {0}")]
    SearchFailed(String),

    /// A native directory call returned a code outside the tolerated set.
    #[error("Native call {operation} failed with {}", native_code_name(.code))]
    Native {
        /// Native function that failed
        operation: String,
        /// Raw return code
        code: u32,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Invalid endpoint
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Specialized result type for directory operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the error code for this error type.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unsupported => "UNSUPPORTED",
            Self::InvalidRecord(_) => "INVALID_RECORD",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::BindFailed { .. } => "BIND_FAILED",
            Self::SizeLimitExceeded => "SIZE_LIMIT_EXCEEDED",
            Self::SearchFailed(_) => "SEARCH_FAILED",
            Self::Native { .. } => "NATIVE_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::InvalidEndpoint(_) => "INVALID_ENDPOINT",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if this error should be logged as a serious error.
    #[must_use]
    pub const fn should_log(&self) -> bool {
        matches!(
            self,
            Self::InternalError(_)
                | Self::ConnectionFailed { .. }
                | Self::SearchFailed(_)
                | Self::Native { .. }
        )
    }

    /// Returns true when the output already holds a usable, truncated result set.
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        matches!(self, Self::SizeLimitExceeded)
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn native_code_name(code: &u32) -> String {
    match *code {
        0x00 => "LDAP_SUCCESS".to_string(),
        0x04 => "LDAP_SIZELIMIT_EXCEEDED".to_string(),
        0x31 => "LDAP_INVALID_CREDENTIALS".to_string(),
        0x51 => "LDAP_SERVER_DOWN".to_string(),
        0x59 => "LDAP_PARAM_ERROR".to_string(),
        other => format!("UNKNOWN: {other:x}"),
    }
}

// Conversions from external error types
impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidEndpoint(err.to_string())
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::ValidationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::Unsupported.error_code(), "UNSUPPORTED");
        assert_eq!(
            Error::InvalidRecord("test".to_string()).error_code(),
            "INVALID_RECORD"
        );
        assert_eq!(
            Error::ConnectionFailed {
                address: "ldap://dc1:389".to_string(),
                message: "refused".to_string()
            }
            .error_code(),
            "CONNECTION_FAILED"
        );
        assert_eq!(
            Error::BindFailed {
                identity: "cn=admin".to_string(),
                message: "rc=49".to_string()
            }
            .error_code(),
            "BIND_FAILED"
        );
        assert_eq!(Error::SizeLimitExceeded.error_code(), "SIZE_LIMIT_EXCEEDED");
        assert_eq!(
            Error::SearchFailed("test".to_string()).error_code(),
            "SEARCH_FAILED"
        );
        assert_eq!(
            Error::Native {
                operation: "ldap_connect".to_string(),
                code: 0x51
            }
            .error_code(),
            "NATIVE_ERROR"
        );
        assert_eq!(
            Error::ConfigError("test".to_string()).error_code(),
            "CONFIG_ERROR"
        );
        assert_eq!(
            Error::ValidationError("test".to_string()).error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            Error::InvalidEndpoint("test".to_string()).error_code(),
            "INVALID_ENDPOINT"
        );
        assert_eq!(
            Error::InternalError("test".to_string()).error_code(),
            "INTERNAL_ERROR"
        );
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::Unsupported.to_string(),
            "Provided parameters are unsupported on current operating system"
        );
        assert_eq!(Error::SizeLimitExceeded.to_string(), "Size Limit Exceeded");

        let err = Error::BindFailed {
            identity: "cn=admin,dc=example,dc=com".to_string(),
            message: "invalid credentials".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Initial bind for user \"cn=admin,dc=example,dc=com\" failed: invalid credentials"
        );
    }

    #[test]
    fn test_native_code_names() {
        let err = Error::Native {
            operation: "ldap_bind_s".to_string(),
            code: 0x31,
        };
        assert_eq!(
            err.to_string(),
            "Native call ldap_bind_s failed with LDAP_INVALID_CREDENTIALS"
        );

        let err = Error::Native {
            operation: "ldap_search_s".to_string(),
            code: 0x20,
        };
        assert_eq!(err.to_string(), "Native call ldap_search_s failed with UNKNOWN: 20");
    }

    #[test]
    fn test_should_log() {
        assert!(Error::InternalError("test".to_string()).should_log());
        assert!(Error::SearchFailed("test".to_string()).should_log());
        assert!(Error::Native {
            operation: "ldap_connect".to_string(),
            code: 0x51
        }
        .should_log());

        assert!(!Error::SizeLimitExceeded.should_log());
        assert!(!Error::Unsupported.should_log());
    }

    #[test]
    fn test_only_size_limit_is_partial() {
        assert!(Error::SizeLimitExceeded.is_partial());
        assert!(!Error::SearchFailed("rc=4".to_string()).is_partial());
        assert!(!Error::Unsupported.is_partial());
    }

    #[test]
    fn test_from_url_parse_error() {
        let err = url::Url::parse("not a url").unwrap_err();
        let converted: Error = err.into();
        assert!(matches!(converted, Error::InvalidEndpoint(_)));
    }
}

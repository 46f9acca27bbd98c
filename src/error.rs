//! Gemini Proxy Error Types
//!
//! Every failure the proxy core can produce. None of them is process-fatal.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for proxy operations
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No credential could be read from any configured source
    #[error("No credentials found (searched: {})", display_paths(.searched))]
    NoCredentialsFound { searched: Vec<PathBuf> },

    /// Every token in the pool is inactive (or the pool is empty)
    #[error("No active tokens available")]
    NoActiveToken,

    /// The requested backend type is not one of the known kinds
    #[error("Unknown backend type: {0}")]
    UnknownBackendType(String),

    /// The upstream API answered with a non-success status
    #[error("Gemini API error {status}: {body}")]
    UpstreamHttp { status: u16, body: String },

    /// The upstream API answered 200 but without the expected text payload
    #[error("Malformed response from Gemini API: {0}")]
    MalformedUpstreamResponse(String),

    /// A health probe did not finish in time
    #[error("Health probe for '{backend}' timed out after {timeout:?}")]
    ProbeTimeout { backend: String, timeout: Duration },

    /// Writing a metrics snapshot failed
    #[error("Failed to persist metrics snapshot: {0}")]
    Persistence(String),

    /// A caller-supplied request could not be translated
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration errors (invalid JSON, unreadable file, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level failure talking to the upstream API
    #[error("Request failed: {0}")]
    Request(String),

    /// The upstream call exceeded its timeout
    #[error("Request timeout: {0}")]
    Timeout(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    if paths.is_empty() {
        return "none configured".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ProxyError {
    /// Whether this failure should count against the credential that was used
    pub fn is_credential_fault(&self) -> bool {
        matches!(
            self,
            ProxyError::UpstreamHttp { .. }
                | ProxyError::MalformedUpstreamResponse(_)
                | ProxyError::Request(_)
                | ProxyError::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for ProxyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProxyError::Timeout(err.to_string())
        } else if err.is_connect() {
            ProxyError::Request(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            ProxyError::MalformedUpstreamResponse(format!("Failed to decode response: {}", err))
        } else {
            ProxyError::Request(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::Config(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Config(format!("IO error: {}", err))
    }
}

/// Result type alias for proxy operations
pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_credentials_lists_paths() {
        let err = ProxyError::NoCredentialsFound {
            searched: vec![PathBuf::from("/a/tokens.txt"), PathBuf::from("/b/tokens.txt")],
        };
        let msg = err.to_string();
        assert!(msg.contains("/a/tokens.txt"));
        assert!(msg.contains("/b/tokens.txt"));

        let empty = ProxyError::NoCredentialsFound { searched: vec![] };
        assert!(empty.to_string().contains("none configured"));
    }

    #[test]
    fn test_upstream_error_display() {
        let err = ProxyError::UpstreamHttp {
            status: 429,
            body: "quota exceeded".to_string(),
        };
        assert_eq!(err.to_string(), "Gemini API error 429: quota exceeded");
    }

    #[test]
    fn test_credential_faults() {
        assert!(ProxyError::MalformedUpstreamResponse("x".into()).is_credential_fault());
        assert!(ProxyError::Timeout("x".into()).is_credential_fault());
        assert!(!ProxyError::NoActiveToken.is_credential_fault());
        assert!(!ProxyError::UnknownBackendType("x".into()).is_credential_fault());
    }

    #[test]
    fn test_io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: ProxyError = io_err.into();
        assert!(matches!(err, ProxyError::Config(_)));
        assert!(err.to_string().contains("file missing"));
    }
}

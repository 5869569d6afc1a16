//! Errors for the Hue component

use thiserror::Error;

/// Errors reported by a [`HueBridgeApi`](super::HueBridgeApi) implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HueApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Link button not pressed")]
    LinkButtonNotPressed,

    /// The bridge answered with an HTTP error
    #[error("Response error {status}: {message}")]
    Response { status: u16, message: String },

    /// The socket was closed or could not be opened
    #[error("OS error: {0}")]
    Os(String),

    #[error("Server disconnected")]
    ServerDisconnected,

    #[error("Request timed out")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

impl HueApiError {
    /// Errors worth retrying: the bridge was busy, not the request bad
    pub fn is_retryable(&self) -> bool {
        match self {
            HueApiError::Os(_) | HueApiError::ServerDisconnected => true,
            HueApiError::Response { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Errors a request retry loop handles at all (4xx included)
    pub(crate) fn is_client_error(&self) -> bool {
        matches!(
            self,
            HueApiError::Os(_) | HueApiError::ServerDisconnected | HueApiError::Response { .. }
        )
    }
}

/// Why connecting to a bridge during setup failed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HueSetupError {
    /// The stored username is no longer valid; the bridge must be linked again
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Cannot connect to the bridge")]
    CannotConnect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(HueApiError::Os("reset by peer".into()).is_retryable());
        assert!(HueApiError::ServerDisconnected.is_retryable());
        assert!(HueApiError::Response { status: 503, message: "busy".into() }.is_retryable());

        assert!(!HueApiError::Response { status: 404, message: "not found".into() }.is_retryable());
        assert!(!HueApiError::Unauthorized.is_retryable());
        assert!(!HueApiError::Timeout.is_retryable());
    }
}

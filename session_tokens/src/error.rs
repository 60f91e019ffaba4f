use std::time::Duration;

use thiserror::Error;

/// The reason a valid access token could not be produced
///
/// Every caller waiting on the same refresh attempt receives an identical
/// copy of the failure.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthFailure {
    /// The identity provider could not be reached or was unavailable
    #[error("identity provider unavailable: {message}")]
    NetworkFailure {
        /// A description of the underlying failure
        message: String,
    },
    /// The refresh attempt did not complete within its time bound
    #[error("token refresh timed out after {}ms", .timeout.as_millis())]
    Timeout {
        /// The bound which elapsed
        timeout: Duration,
    },
    /// The refresh token was rejected, expired, or revoked
    #[error("refresh token rejected by identity provider: {description}")]
    InvalidGrant {
        /// The provider's description of the rejection
        description: String,
    },
    /// The identity provider refused the request for a reason other than the grant
    #[error("identity provider rejected refresh request ({error}): {description}")]
    Rejected {
        /// The OAuth2 error code, or the HTTP status if none was provided
        error: String,
        /// The provider's description of the rejection
        description: String,
    },
    /// The identity provider returned a success response that could not be understood
    #[error("malformed token response from identity provider: {message}")]
    MalformedResponse {
        /// A description of the parse failure
        message: String,
    },
    /// There is no session to obtain a token for
    #[error("no authenticated session")]
    NotAuthenticated,
    /// The session was replaced while the refresh attempt was in flight
    #[error("session was replaced during token refresh")]
    Superseded,
    /// The refresh attempt ended without reporting an outcome
    #[error("token refresh was abandoned before completing")]
    Abandoned,
}

impl AuthFailure {
    /// Whether the session must be treated as unauthenticated
    ///
    /// Terminal failures are remembered until a new session is signed in.
    /// Any other failure may be retried by the next request for a token.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::InvalidGrant { .. } | Self::Rejected { .. } | Self::MalformedResponse { .. }
        )
    }

    /// Whether the next request for a token may attempt another refresh
    #[inline]
    pub fn is_retryable(&self) -> bool {
        !self.is_terminal() && !matches!(self, Self::NotAuthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let grant = AuthFailure::InvalidGrant {
            description: "token revoked".into(),
        };
        assert!(grant.is_terminal());
        assert!(!grant.is_retryable());

        let network = AuthFailure::NetworkFailure {
            message: "connection refused".into(),
        };
        assert!(!network.is_terminal());
        assert!(network.is_retryable());

        let timeout = AuthFailure::Timeout {
            timeout: Duration::from_secs(30),
        };
        assert!(timeout.is_retryable());
        assert_eq!(timeout.to_string(), "token refresh timed out after 30000ms");

        assert!(!AuthFailure::NotAuthenticated.is_terminal());
        assert!(!AuthFailure::NotAuthenticated.is_retryable());
    }
}

//! Token exchanges against an identity provider

use std::{error, sync::Arc};

use aliri_clock::DurationSecs;
use async_trait::async_trait;

use crate::{AccessToken, AuthFailure, RefreshToken, RefreshTokenRef};

#[cfg(feature = "oauth2")]
pub mod oauth2;

/// The tokens minted by a successful refresh exchange
#[derive(Debug)]
pub struct TokenGrant {
    /// The new access token
    pub access_token: AccessToken,

    /// A rotated refresh token, if the provider issued one
    pub refresh_token: Option<RefreshToken>,

    /// The lifetime of the new access token, relative to when it was received
    pub expires_in: DurationSecs,
}

/// An asynchronous exchange of a refresh token for new tokens
#[async_trait]
pub trait RefreshExchange: Send + Sync {
    /// The error type returned in the event that the exchange fails
    ///
    /// Errors are classified into an [`AuthFailure`] before being reported to
    /// callers of the coordinator.
    type Error: error::Error + Into<AuthFailure> + Send + Sync + 'static;

    /// Exchanges `refresh_token` for a new access token
    async fn exchange(&self, refresh_token: &RefreshTokenRef) -> Result<TokenGrant, Self::Error>;
}

#[async_trait]
impl<X: RefreshExchange + ?Sized> RefreshExchange for Arc<X> {
    type Error = X::Error;

    async fn exchange(&self, refresh_token: &RefreshTokenRef) -> Result<TokenGrant, Self::Error> {
        (**self).exchange(refresh_token).await
    }
}

use aliri_clock::{Clock, DurationSecs, UnixTime};
use serde::{Deserialize, Serialize};

use crate::{AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef, SubjectClaims};

/// An access token and refresh token held together as one unit of session state
///
/// A pair is never mutated in place. Refreshing a session produces a new pair
/// which replaces the old one wholesale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    access_token: AccessToken,
    refresh_token: RefreshToken,
    expires_at: UnixTime,
    #[serde(default)]
    claims: SubjectClaims,
}

/// Where a token pair stands relative to its expiry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The access token can be served from cache
    Fresh,
    /// The access token is still valid, but too close to expiry to hand out
    WithinMargin,
    /// The access token is no longer valid
    Expired,
}

impl TokenPair {
    /// Constructs a pair expiring at the given absolute time
    ///
    /// Claims are decoded from the access token. A token whose payload cannot
    /// be decoded yields a pair with empty claims.
    pub fn new(access_token: AccessToken, refresh_token: RefreshToken, expires_at: UnixTime) -> Self {
        let claims = match SubjectClaims::decode(&access_token) {
            Ok(claims) => claims,
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn std::error::Error),
                    "unable to decode access token claims, continuing without them"
                );
                SubjectClaims::default()
            }
        };

        Self {
            access_token,
            refresh_token,
            expires_at,
            claims,
        }
    }

    /// Constructs a pair whose lifetime starts now, according to `clock`
    pub fn issued_with_clock<C: Clock>(
        access_token: AccessToken,
        refresh_token: RefreshToken,
        lifetime: DurationSecs,
        clock: &C,
    ) -> Self {
        Self::new(access_token, refresh_token, clock.now() + lifetime)
    }

    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the refresh token
    #[inline]
    pub fn refresh_token(&self) -> &RefreshTokenRef {
        &self.refresh_token
    }

    /// Gets the time after which the access token must not be served
    #[inline]
    pub fn expires_at(&self) -> UnixTime {
        self.expires_at
    }

    /// Gets the subject claims decoded from the access token
    #[inline]
    pub fn claims(&self) -> &SubjectClaims {
        &self.claims
    }

    /// Gets the pair's status as of `time`, given a safety margin before expiry
    pub fn status_at(&self, time: UnixTime, safety_margin: DurationSecs) -> TokenStatus {
        if time >= self.expires_at {
            TokenStatus::Expired
        } else if time + safety_margin >= self.expires_at {
            TokenStatus::WithinMargin
        } else {
            TokenStatus::Fresh
        }
    }

    /// Whether the access token may be handed out at `time`
    #[inline]
    pub fn is_fresh_at(&self, time: UnixTime, safety_margin: DurationSecs) -> bool {
        matches!(self.status_at(time, safety_margin), TokenStatus::Fresh)
    }

    /// Gets a duration for how much longer the access token would be valid
    /// as of the provided time
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        if time < self.expires_at {
            self.expires_at - time
        } else {
            DurationSecs(0)
        }
    }
}

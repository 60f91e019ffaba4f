//! DTOs for interacting with an OAuth2 token endpoint

use aliri_clock::DurationSecs;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{AccessToken, ClientId, ClientIdRef, ClientSecret, ClientSecretRef, RefreshToken, RefreshTokenRef};

/// Client credentials presented alongside a refresh token
///
/// Public clients have no secret. Confidential clients must supply theirs
/// from configuration; there is no default.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    /// The client ID
    pub client_id: ClientId,

    /// The client secret, if required
    pub client_secret: Option<ClientSecret>,
}

#[derive(Debug, Serialize)]
pub(super) struct RefreshTokenRequest<'a> {
    pub grant_type: &'static str,
    pub client_id: &'a ClientIdRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<&'a ClientSecretRef>,
    pub refresh_token: &'a RefreshTokenRef,
}

#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: AccessToken,
    #[serde(default)]
    pub refresh_token: Option<RefreshToken>,
    #[serde(deserialize_with = "lenient_seconds")]
    pub expires_in: DurationSecs,
}

#[derive(Debug, Deserialize)]
pub(super) struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Some providers report `expires_in` as a string
fn lenient_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DurationSecs, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Number(n) => Ok(DurationSecs(n)),
        Seconds::Text(s) => s
            .trim()
            .parse()
            .map(DurationSecs)
            .map_err(serde::de::Error::custom),
    }
}

//! Subject claims carried in an access token's payload

use std::collections::BTreeMap;

use aliri_base64::{Base64Url, InvalidBase64Data};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::AccessTokenRef;

/// The claim holding the subject identifier
pub const SUBJECT: &str = "sub";
/// The claim holding the display name
pub const NAME: &str = "name";
/// The claim holding the email address
pub const EMAIL: &str = "email";
/// The claim holding the given name
pub const GIVEN_NAME: &str = "given_name";
/// The claim holding the family name
pub const FAMILY_NAME: &str = "family_name";
/// The claim holding the preferred username
pub const PREFERRED_USERNAME: &str = "preferred_username";

/// An error decoding the claims of an access token
///
/// These errors are advisory only. An access token whose claims cannot be
/// decoded is still a usable bearer credential.
#[derive(Debug, Error)]
pub enum ClaimsDecodeError {
    /// The token does not have the three dot-separated segments of a JWT
    #[error("access token is not a JWT")]
    NotAJwt,
    /// The payload segment is not valid URL-safe base64
    #[error("access token payload is not valid base64")]
    Base64(#[from] InvalidBase64Data),
    /// The payload segment is not a JSON object
    #[error("access token payload is not a JSON object")]
    Json(#[from] serde_json::Error),
}

/// Identity fields of the token's subject
///
/// Only scalar claims are retained. Strings are kept as-is, while numbers and
/// booleans are kept in their JSON textual form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectClaims(BTreeMap<String, String>);

impl SubjectClaims {
    /// Decodes the claims from the payload segment of an access token
    ///
    /// The token's signature is not checked. These claims are informational
    /// and must not be used to make authorization decisions.
    pub fn decode(access_token: &AccessTokenRef) -> Result<Self, ClaimsDecodeError> {
        let mut segments = access_token.as_str().split('.');
        let payload = match (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(ClaimsDecodeError::NotAJwt),
        };

        let raw = Base64Url::from_encoded(payload.trim_end_matches('='))?;
        let object: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(raw.as_slice())?;

        let claims = object
            .into_iter()
            .filter_map(|(key, value)| match value {
                serde_json::Value::String(s) => Some((key, s)),
                serde_json::Value::Number(n) => Some((key, n.to_string())),
                serde_json::Value::Bool(b) => Some((key, b.to_string())),
                _ => None,
            })
            .collect();

        Ok(Self(claims))
    }

    /// Gets an arbitrary claim
    pub fn get(&self, claim: &str) -> Option<&str> {
        self.0.get(claim).map(String::as_str)
    }

    /// The subject identifier
    pub fn subject(&self) -> Option<&str> {
        self.get(SUBJECT)
    }

    /// The display name
    pub fn name(&self) -> Option<&str> {
        self.get(NAME)
    }

    /// The email address
    pub fn email(&self) -> Option<&str> {
        self.get(EMAIL)
    }

    /// The given name
    pub fn given_name(&self) -> Option<&str> {
        self.get(GIVEN_NAME)
    }

    /// The family name
    pub fn family_name(&self) -> Option<&str> {
        self.get(FAMILY_NAME)
    }

    /// The preferred username
    pub fn preferred_username(&self) -> Option<&str> {
        self.get(PREFERRED_USERNAME)
    }

    /// Whether no claims were decoded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over all retained claims
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for SubjectClaims {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use aliri_base64::Base64Url;

    use crate::AccessToken;

    /// Builds an unsigned JWT-shaped token around the given JSON payload
    pub(crate) fn jwt_with_payload(payload: serde_json::Value) -> AccessToken {
        let header = Base64Url::from_raw(br#"{"alg":"none","typ":"JWT"}"#.to_vec());
        let body = Base64Url::from_raw(payload.to_string().into_bytes());
        AccessToken::new(format!("{}.{}.sig", header, body))
    }
}

#[cfg(test)]
mod tests {
    use super::{test_util::jwt_with_payload, *};
    use crate::AccessToken;

    #[test]
    fn decodes_identity_claims() {
        let token = jwt_with_payload(serde_json::json!({
            "sub": "f81d4fae",
            "name": "Ada Lovelace",
            "given_name": "Ada",
            "family_name": "Lovelace",
            "email": "ada@example.com",
            "email_verified": true,
            "exp": 1700000000,
            "realm_access": { "roles": ["user"] },
        }));

        let claims = SubjectClaims::decode(&token).unwrap();

        assert_eq!(claims.subject(), Some("f81d4fae"));
        assert_eq!(claims.name(), Some("Ada Lovelace"));
        assert_eq!(claims.given_name(), Some("Ada"));
        assert_eq!(claims.family_name(), Some("Lovelace"));
        assert_eq!(claims.email(), Some("ada@example.com"));
        assert_eq!(claims.get("email_verified"), Some("true"));
        assert_eq!(claims.get("exp"), Some("1700000000"));
        assert_eq!(claims.get("realm_access"), None);
        assert_eq!(claims.preferred_username(), None);
    }

    #[test]
    fn opaque_token_is_not_a_jwt() {
        let token = AccessToken::from_static("2YotnFZFEjr1zCsicMWpAA");
        assert!(matches!(
            SubjectClaims::decode(&token),
            Err(ClaimsDecodeError::NotAJwt)
        ));
    }

    #[test]
    fn four_segments_is_not_a_jwt() {
        let token = AccessToken::from_static("a.b.c.d");
        assert!(matches!(
            SubjectClaims::decode(&token),
            Err(ClaimsDecodeError::NotAJwt)
        ));
    }

    #[test]
    fn bad_base64_payload() {
        let token = AccessToken::from_static("header.!!!.sig");
        assert!(matches!(
            SubjectClaims::decode(&token),
            Err(ClaimsDecodeError::Base64(_))
        ));
    }

    #[test]
    fn non_object_payload() {
        let token = jwt_with_payload(serde_json::json!(["not", "an", "object"]));
        assert!(matches!(
            SubjectClaims::decode(&token),
            Err(ClaimsDecodeError::Json(_))
        ));
    }
}

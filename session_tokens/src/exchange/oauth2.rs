//! A refresh exchange against an OAuth2 token endpoint

use std::marker::PhantomData;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use super::{RefreshExchange, TokenGrant};
use crate::{AuthFailure, RefreshTokenRef};

pub mod dto;

const REFRESH_TOKEN_GRANT: &str = "refresh_token";
const INVALID_GRANT: &str = "invalid_grant";

/// Exchanges refresh tokens at an OAuth2 token endpoint
///
/// Credentials are sent as URL-encoded form data by default, as required by
/// RFC 6749. Some providers also accept a JSON body; see
/// [`using_json_body()`][Self::using_json_body()].
#[derive(Debug)]
pub struct OAuth2RefreshExchange<T = FormBody> {
    client: reqwest::Client,
    token_url: reqwest::Url,
    credentials: dto::ClientCredentials,
    content_type: PhantomData<fn() -> T>,
}

impl OAuth2RefreshExchange<FormBody> {
    /// Constructs a new refresh exchange
    pub fn new(
        client: reqwest::Client,
        token_url: reqwest::Url,
        credentials: dto::ClientCredentials,
    ) -> Self {
        Self {
            client,
            token_url,
            credentials,
            content_type: PhantomData,
        }
    }

    /// Configures the exchange to send credentials to
    /// the authority as a JSON body
    pub fn using_json_body(self) -> OAuth2RefreshExchange<JsonBody> {
        OAuth2RefreshExchange {
            client: self.client,
            token_url: self.token_url,
            credentials: self.credentials,
            content_type: PhantomData,
        }
    }
}

#[async_trait]
impl<T: RequestType> RefreshExchange for OAuth2RefreshExchange<T> {
    type Error = TokenRequestError;

    async fn exchange(&self, refresh_token: &RefreshTokenRef) -> Result<TokenGrant, Self::Error> {
        let request = dto::RefreshTokenRequest {
            grant_type: REFRESH_TOKEN_GRANT,
            client_id: &self.credentials.client_id,
            client_secret: self.credentials.client_secret.as_deref(),
            refresh_token,
        };

        request_token::<T>(&self.client, self.token_url.clone(), &request).await
    }
}

/// An error while attempting to refresh tokens with the authority
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// An error from the authority with an error body
    #[error("error requesting token from authority: {body}")]
    ErrorWithBody {
        /// The underlying request error
        source: reqwest::Error,
        /// The response status
        status: StatusCode,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBodyError(#[from] serde_json::Error),
    /// Unable to read the response
    #[error("error reading response body")]
    BodyReadError(#[source] reqwest::Error),
    /// Unable to send a token request to the authority
    #[error("error sending request to authority")]
    RequestSend(#[source] reqwest::Error),
}

impl From<TokenRequestError> for AuthFailure {
    fn from(error: TokenRequestError) -> Self {
        match error {
            TokenRequestError::ErrorWithBody { status, body, .. } => {
                let parsed = serde_json::from_str::<dto::ErrorResponse>(&body).ok();
                classify_error_response(status, parsed, body)
            }
            TokenRequestError::TokenBodyError(error) => AuthFailure::MalformedResponse {
                message: error.to_string(),
            },
            TokenRequestError::BodyReadError(error) | TokenRequestError::RequestSend(error) => {
                AuthFailure::NetworkFailure {
                    message: error_chain(&error),
                }
            }
        }
    }
}

fn classify_error_response(
    status: StatusCode,
    parsed: Option<dto::ErrorResponse>,
    body: String,
) -> AuthFailure {
    match parsed {
        Some(resp) if resp.error == INVALID_GRANT => AuthFailure::InvalidGrant {
            description: resp.error_description.unwrap_or(resp.error),
        },
        _ if status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS =>
        {
            AuthFailure::NetworkFailure {
                message: format!("authority responded with {}", status),
            }
        }
        Some(resp) => AuthFailure::Rejected {
            error: resp.error,
            description: resp.error_description.unwrap_or_default(),
        },
        None => AuthFailure::Rejected {
            error: status.to_string(),
            description: body,
        },
    }
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[tracing::instrument(
    err,
    skip(client, token_url, request),
    fields(
        token_url = %token_url,
        credentials.grant_type = request.grant_type,
        credentials.client_id = %request.client_id,
    ),
)]
async fn request_token<T: RequestType>(
    client: &reqwest::Client,
    token_url: reqwest::Url,
    request: &dto::RefreshTokenRequest<'_>,
) -> Result<TokenGrant, TokenRequestError> {
    tracing::trace!("requesting token from authority");

    let req = T::attach_payload(client.post(token_url), request);
    let resp = req.send().await.map_err(TokenRequestError::RequestSend)?;

    tracing::debug!(
        response.status = resp.status().as_u16(),
        "received token response from issuing authority"
    );

    if let Err(error) = resp.error_for_status_ref() {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(TokenRequestError::BodyReadError)?;
        return Err(TokenRequestError::ErrorWithBody {
            source: error,
            status,
            body,
        });
    }

    let body = resp
        .bytes()
        .await
        .map_err(TokenRequestError::BodyReadError)?;
    let resp: dto::TokenResponse = serde_json::from_slice(&body)?;

    tracing::info!(
        has_refresh_token = resp.refresh_token.is_some(),
        lifetime = resp.expires_in.0,
        "received new tokens"
    );

    Ok(TokenGrant {
        access_token: resp.access_token,
        refresh_token: resp.refresh_token,
        expires_in: resp.expires_in,
    })
}

/// A manner of attaching a serializable payload to a request
pub trait RequestType {
    /// Attaches the serializable payload to the request body
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder;
}

/// Attaches credentials to the request body as JSON
#[derive(Debug)]
pub struct JsonBody;

/// Attaches credentials to the request body as URL-encoded form data
#[derive(Debug)]
pub struct FormBody;

impl RequestType for JsonBody {
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder {
        request.json(payload)
    }
}

impl RequestType for FormBody {
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder {
        request.form(payload)
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::Result;
    use wiremock::{
        matchers::{body_string_contains, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{ClientId, ClientSecret};

    async fn exchange_for(server: &MockServer) -> Result<OAuth2RefreshExchange> {
        Ok(OAuth2RefreshExchange::new(
            reqwest::Client::new(),
            format!("{}/oauth/token", server.uri()).parse()?,
            dto::ClientCredentials {
                client_id: ClientId::from_static("portal"),
                client_secret: Some(ClientSecret::from_static("s3cret")),
            },
        ))
    }

    #[tokio::test]
    async fn sends_refresh_grant_as_form_data() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=R1"))
            .and(body_string_contains("client_id=portal"))
            .and(body_string_contains("client_secret=s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A2",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "R2",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = exchange_for(&server)
            .await?
            .exchange(RefreshTokenRef::from_str("R1"))
            .await?;

        assert_eq!(grant.access_token.as_str(), "A2");
        assert_eq!(grant.refresh_token.as_ref().map(|r| r.as_str()), Some("R2"));
        assert_eq!(grant.expires_in.0, 3600);
        Ok(())
    }

    #[tokio::test]
    async fn json_body_when_configured() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(header("content-type", "application/json"))
            .and(body_string_contains(r#""grant_type":"refresh_token""#))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "A2",
                "expires_in": 60,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let grant = exchange_for(&server)
            .await?
            .using_json_body()
            .exchange(RefreshTokenRef::from_str("R1"))
            .await?;

        assert!(grant.refresh_token.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn invalid_grant_is_terminal() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token is not active",
            })))
            .mount(&server)
            .await;

        let error = exchange_for(&server)
            .await?
            .exchange(RefreshTokenRef::from_str("R1"))
            .await
            .unwrap_err();

        assert!(matches!(error, TokenRequestError::ErrorWithBody { status, .. } if status == StatusCode::BAD_REQUEST));
        let failure = AuthFailure::from(error);
        assert_eq!(
            failure,
            AuthFailure::InvalidGrant {
                description: "Token is not active".into()
            }
        );
        assert!(failure.is_terminal());
        Ok(())
    }

    #[tokio::test]
    async fn invalid_client_is_rejected() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": "invalid_client",
            })))
            .mount(&server)
            .await;

        let error = exchange_for(&server)
            .await?
            .exchange(RefreshTokenRef::from_str("R1"))
            .await
            .unwrap_err();

        let failure = AuthFailure::from(error);
        assert_eq!(
            failure,
            AuthFailure::Rejected {
                error: "invalid_client".into(),
                description: String::new(),
            }
        );
        assert!(failure.is_terminal());
        Ok(())
    }

    #[tokio::test]
    async fn unavailable_authority_is_retryable() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let error = exchange_for(&server)
            .await?
            .exchange(RefreshTokenRef::from_str("R1"))
            .await
            .unwrap_err();

        let failure = AuthFailure::from(error);
        assert!(matches!(failure, AuthFailure::NetworkFailure { .. }));
        assert!(failure.is_retryable());
        Ok(())
    }

    #[tokio::test]
    async fn garbage_success_body_is_malformed() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let error = exchange_for(&server)
            .await?
            .exchange(RefreshTokenRef::from_str("R1"))
            .await
            .unwrap_err();

        assert!(matches!(error, TokenRequestError::TokenBodyError(_)));
        assert!(matches!(
            AuthFailure::from(error),
            AuthFailure::MalformedResponse { .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_authority_is_network_failure() -> Result<()> {
        let exchange = OAuth2RefreshExchange::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/oauth/token".parse()?,
            dto::ClientCredentials {
                client_id: ClientId::from_static("portal"),
                client_secret: None,
            },
        );

        let error = exchange
            .exchange(RefreshTokenRef::from_str("R1"))
            .await
            .unwrap_err();

        assert!(matches!(error, TokenRequestError::RequestSend(_)));
        assert!(matches!(
            AuthFailure::from(error),
            AuthFailure::NetworkFailure { .. }
        ));
        Ok(())
    }

    #[test]
    fn unparsable_client_error_is_rejected_with_status() {
        let failure = classify_error_response(StatusCode::FORBIDDEN, None, "nope".into());
        assert_eq!(
            failure,
            AuthFailure::Rejected {
                error: "403 Forbidden".into(),
                description: "nope".into(),
            }
        );
    }

    #[test]
    fn throttling_is_retryable() {
        let failure = classify_error_response(StatusCode::TOO_MANY_REQUESTS, None, String::new());
        assert!(failure.is_retryable());
    }
}

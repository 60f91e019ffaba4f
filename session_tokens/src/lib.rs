//! On-demand management of a user session's access and refresh tokens
//!
//! This library keeps a session's token pair valid for the life of a process. Consumers ask
//! a shared [`RefreshCoordinator`] for a valid token immediately before making an authorized
//! request. If the held access token is comfortably within its lifetime, it is returned
//! without any waiting. Otherwise, the coordinator exchanges the refresh token for a new
//! pair with the identity provider.
//!
//! Only one such exchange is ever in flight for a session. Requests which arrive while a
//! refresh is underway wait for that refresh, and all of them receive the same new pair or
//! the same failure. This matters when the identity provider rotates refresh tokens: two
//! concurrent exchanges of the same refresh token would revoke the session.
//!
//! # General Flow (Refresh Token)
//!
//! On application start-up, construct the exchange that will talk to the identity
//! provider's token endpoint, and a session store that will persist the session across
//! restarts. The coordinator is then warmed from the session store so that the first
//! request does not pay the cost of loading it.
//!
//! ```
//! use session_tokens::{
//!     exchange::oauth2::{dto::ClientCredentials, OAuth2RefreshExchange},
//!     persist::FileSessionStore,
//!     ClientId, RefreshCoordinator,
//! };
//!
//! # struct Opts {
//! #     client_id: ClientId,
//! #     token_url: reqwest::Url,
//! #     session_file: std::path::PathBuf,
//! # }
//! #
//! # let opts = Opts {
//! #     client_id: ClientId::from_static("test"),
//! #     token_url: reqwest::Url::parse("https://example.com/oauth/token").unwrap(),
//! #     session_file: std::path::PathBuf::from("session.json"),
//! # };
//! #
//! let exchange = OAuth2RefreshExchange::new(
//!     reqwest::Client::new(),
//!     opts.token_url,
//!     ClientCredentials {
//!         client_id: opts.client_id,
//!         client_secret: None,
//!     },
//! );
//!
//! let coordinator = RefreshCoordinator::builder(exchange)
//!     .with_session_store(FileSessionStore::new(opts.session_file))
//!     .build();
//! # /* Commented out due to this trying to interact with the world.
//!
//! coordinator.warm().await;
//!
//! let token = coordinator.valid_token().await?;
//! tracing::info!(
//!     token = format_args!("{:#?}", token.access_token()),
//!     "using access token"
//! );
//! # */
//! ```
//!
//! A refresh which fails because the identity provider rejected the refresh token is
//! terminal: the coordinator keeps returning that failure until a new session is installed
//! with [`sign_in()`][RefreshCoordinator::sign_in()]. Observers can learn of this through
//! [`session_status()`][RefreshCoordinator::session_status()]. Transient failures are
//! returned to the callers that waited on them, and the next request tries again.
//!
//! This crate includes an example of requesting tokens on demand using a file-backed session
//! store in the demos folder.
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are enabled by default:
//!
//! * `oauth2`: Provides an implementation of the OAuth2 _refresh token_ exchange.
//! * `file`: Provides a session store using the local filesystem.
//!
//! No TLS backend is enabled by default. Enable `rustls-tls` or `default-tls` to select the
//! corresponding `reqwest` backend; the demo requires `rustls-tls`.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod claims;
mod config;
mod coordinator;
mod error;
pub mod exchange;
mod pair;
pub mod persist;
mod store;
mod warm;

pub use braids::*;
pub use claims::{ClaimsDecodeError, SubjectClaims};
pub use config::CoordinatorConfig;
pub use coordinator::{RefreshCoordinator, RefreshCoordinatorBuilder, SessionStatus};
pub use error::AuthFailure;
pub use pair::{TokenPair, TokenStatus};
pub use store::CredentialStore;
pub use warm::WarmOutcome;

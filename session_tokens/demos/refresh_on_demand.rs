use std::{path::PathBuf, time::Duration};

use clap::Parser;
use session_tokens::{
    exchange::oauth2::{dto::ClientCredentials, OAuth2RefreshExchange},
    persist::FileSessionStore,
    ClientId, ClientSecret, RefreshCoordinator, SessionStatus, WarmOutcome,
};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The identity provider's token request URL
    #[arg(short, long, env)]
    token_url: reqwest::Url,

    /// The client ID of the client
    #[arg(short, long, env)]
    client_id: ClientId,

    /// The client secret, for confidential clients only
    #[arg(short = 's', long, env, hide_env_values = true)]
    client_secret: Option<ClientSecret>,

    /// The local file holding the persisted session
    #[arg(short = 'f', long, env, value_name = "FILE", default_value = ".session.json")]
    session_file: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let client = reqwest::Client::builder().https_only(true).build()?;

    let exchange = OAuth2RefreshExchange::new(
        client,
        opts.token_url,
        ClientCredentials {
            client_id: opts.client_id,
            client_secret: opts.client_secret,
        },
    );

    let coordinator = RefreshCoordinator::builder(exchange)
        .with_session_store(FileSessionStore::new(opts.session_file))
        .build();

    if let WarmOutcome::Missing = coordinator.warm().await {
        tracing::warn!("no persisted session, sign in first to create one");
    }

    let mut status = coordinator.session_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            match &*status.borrow_and_update() {
                SessionStatus::Active { claims } => {
                    tracing::info!(subject = claims.subject(), name = claims.name(), "session active")
                }
                SessionStatus::Invalidated { reason } => {
                    tracing::error!(%reason, "session invalidated, sign in again")
                }
                other => tracing::info!(status = ?other, "session status changed"),
            }
        }
    });

    let mut interval = time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;

        match coordinator.valid_token().await {
            Ok(token) => {
                let now = coordinator.config().now();
                let status = token.status_at(now, coordinator.config().safety_margin());
                tracing::debug!(
                    ?status,
                    remaining = token.until_expired_at(now).0,
                    expiry = token.expires_at().0,
                    token = format_args!("{:#?}", token.access_token()),
                    "pulled token"
                );
            }
            Err(error) if !error.is_retryable() => {
                tracing::error!(%error, "unable to obtain a valid token");
                break;
            }
            Err(error) => {
                tracing::warn!(%error, "unable to obtain a valid token, will try again");
            }
        }
    }

    Ok(())
}

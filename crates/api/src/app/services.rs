use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use tollgate_auth::{CredentialStore, Hs256AccessTokens, InMemoryCredentialStore, TokenAuthenticator};
use tollgate_core::{Clock, SystemClock};
use tollgate_infra::{PostgresCredentialStore, PostgresQuotaLedger};
use tollgate_quota::{AdmissionGate, InMemoryQuotaLedger, QuotaLedger};

use crate::config::ApiConfig;

/// Components shared by every request and by the background scheduler.
pub struct AppServices {
    pub authenticator: Arc<TokenAuthenticator>,
    pub admission: AdmissionGate,
    pub ledger: Arc<dyn QuotaLedger>,
    pub clock: Arc<dyn Clock>,
    /// Adds `Secure` to credential cookies.
    pub cookie_secure: bool,
}

impl AppServices {
    /// Wire the components over the given stores.
    pub fn new(
        config: &ApiConfig,
        store: Arc<dyn CredentialStore>,
        ledger: Arc<dyn QuotaLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let codec = Arc::new(Hs256AccessTokens::new(config.jwt_secret.as_bytes()));
        let authenticator = TokenAuthenticator::new(store, codec, clock.clone(), config.authenticator());

        Self {
            authenticator: Arc::new(authenticator),
            admission: AdmissionGate::new(ledger.clone()),
            ledger,
            clock,
            cookie_secure: config.cookie_secure,
        }
    }

    /// Process-local stores; state is lost on restart.
    pub fn in_memory(config: &ApiConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(InMemoryQuotaLedger::new()),
            clock,
        )
    }
}

/// Build services from configuration: Postgres when `DATABASE_URL` is set,
/// in-memory otherwise.
pub async fn build_services(config: &ApiConfig) -> anyhow::Result<AppServices> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let Some(url) = &config.database_url else {
        info!("DATABASE_URL not set; using in-memory stores");
        return Ok(AppServices::in_memory(config, clock));
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    tollgate_infra::migrate(&pool)
        .await
        .context("failed to apply schema")?;
    info!("using Postgres stores");

    Ok(AppServices::new(
        config,
        Arc::new(PostgresCredentialStore::new(pool.clone())),
        Arc::new(PostgresQuotaLedger::new(pool)),
        clock,
    ))
}

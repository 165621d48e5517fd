//! Process configuration from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use anyhow::{Context, anyhow};
use chrono::Duration;

use tollgate_auth::AuthenticatorConfig;
use tollgate_infra::ReplenishmentScheduler;
use tollgate_observability::LogFormat;

const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub replenish_tick: StdDuration,
    pub replenish_timeout: StdDuration,
    /// Adds `Secure` to every cookie; enable behind TLS.
    pub cookie_secure: bool,
    /// Postgres connection string; in-memory stores when unset.
    pub database_url: Option<String>,
    pub log_format: LogFormat,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let auth = AuthenticatorConfig::default();
        let scheduler = ReplenishmentScheduler::default();
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            access_ttl: auth.access_ttl,
            refresh_ttl: auth.refresh_ttl,
            replenish_tick: scheduler.tick,
            replenish_timeout: scheduler.per_license_timeout,
            cookie_secure: false,
            database_url: None,
            log_format: LogFormat::Json,
        }
    }
}

impl ApiConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let jwt_secret = lookup("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.jwt_secret);

        let access_secs: i64 = parse_or(&lookup, "ACCESS_TOKEN_TTL_SECS", defaults.access_ttl.num_seconds())?;
        let refresh_secs: i64 = parse_or(&lookup, "REFRESH_TOKEN_TTL_SECS", defaults.refresh_ttl.num_seconds())?;
        let tick_secs: u64 = parse_or(&lookup, "REPLENISH_TICK_SECS", defaults.replenish_tick.as_secs())?;
        let timeout_ms: u64 = parse_or(
            &lookup,
            "REPLENISH_TIMEOUT_MS",
            defaults.replenish_timeout.as_millis() as u64,
        )?;

        if access_secs <= 0 || refresh_secs <= 0 {
            return Err(anyhow!("token lifetimes must be positive"));
        }
        if tick_secs == 0 || timeout_ms == 0 {
            return Err(anyhow!("REPLENISH_TICK_SECS and REPLENISH_TIMEOUT_MS must be positive"));
        }

        Ok(Self {
            bind_addr: parse_or(&lookup, "BIND_ADDR", defaults.bind_addr)?,
            jwt_secret,
            access_ttl: Duration::try_seconds(access_secs)
                .context("ACCESS_TOKEN_TTL_SECS out of range")?,
            refresh_ttl: Duration::try_seconds(refresh_secs)
                .context("REFRESH_TOKEN_TTL_SECS out of range")?,
            replenish_tick: StdDuration::from_secs(tick_secs),
            replenish_timeout: StdDuration::from_millis(timeout_ms),
            cookie_secure: parse_or(&lookup, "COOKIE_SECURE", defaults.cookie_secure)?,
            database_url: lookup("DATABASE_URL").filter(|s| !s.is_empty()),
            log_format: match lookup("LOG_FORMAT") {
                Some(raw) => raw.parse().map_err(|e: String| anyhow!(e))?,
                None => defaults.log_format,
            },
        })
    }

    /// Settings that are accepted but unsafe; logged once at startup.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.jwt_secret == DEV_JWT_SECRET {
            warnings.push("JWT_SECRET not set; using insecure dev default".to_string());
        }
        if self.access_ttl >= self.refresh_ttl {
            warnings.push(format!(
                "access tokens ({}s) outlive refresh tokens ({}s)",
                self.access_ttl.num_seconds(),
                self.refresh_ttl.num_seconds()
            ));
        }
        warnings
    }

    pub fn authenticator(&self) -> AuthenticatorConfig {
        AuthenticatorConfig {
            access_ttl: self.access_ttl,
            refresh_ttl: self.refresh_ttl,
        }
    }

    pub fn scheduler(&self) -> ReplenishmentScheduler {
        ReplenishmentScheduler {
            tick: self.replenish_tick,
            per_license_timeout: self.replenish_timeout,
            ..ReplenishmentScheduler::default()
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid {name}={raw:?}: {e}")),
        None => Ok(default),
    }
}

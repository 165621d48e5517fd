use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use reqwest::header::{COOKIE, SET_COOKIE};

use tollgate_api::app::{AppServices, build_app};
use tollgate_api::config::ApiConfig;
use tollgate_auth::{
    AccessClaims, AccessTokenCodec, CredentialPair, CredentialRecord, CredentialStore,
    CredentialStoreError, Hs256AccessTokens, InMemoryCredentialStore, RefreshLookup,
    RefreshTokenHash, RotateOutcome,
};
use tollgate_core::{Clock, IdentityId, LicenseId, ManualClock, SessionId};
use tollgate_quota::{
    ConsumeOutcome, InMemoryQuotaLedger, LedgerError, License, QuotaBucket, QuotaLedger,
};

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    clock: ManualClock,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(InMemoryQuotaLedger::new()),
        )
        .await
    }

    async fn spawn_with(store: Arc<dyn CredentialStore>, ledger: Arc<dyn QuotaLedger>) -> Self {
        let config = ApiConfig {
            jwt_secret: JWT_SECRET.to_string(),
            ..ApiConfig::default()
        };
        let clock = ManualClock::starting_now();
        let services = Arc::new(AppServices::new(&config, store, ledger, Arc::new(clock.clone())));

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(services.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            clock,
            handle,
        }
    }

    async fn login(&self) -> CredentialPair {
        self.services
            .authenticator
            .login(IdentityId::new())
            .await
            .expect("login")
    }

    async fn provision(&self, id: &str, owner: IdentityId, capacity: u32) -> LicenseId {
        let license_id = LicenseId::parse(id).unwrap();
        let license = License::new(license_id.clone(), owner, capacity, 3600).unwrap();
        self.services
            .ledger
            .provision(license, self.services.clock.now())
            .await
            .expect("provision");
        license_id
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn access_cookie(pair: &CredentialPair) -> String {
    format!("accessToken={}", pair.access_token)
}

fn refresh_cookie(pair: &CredentialPair) -> String {
    format!("refreshToken={}", pair.refresh_token.as_str())
}

fn both_cookies(pair: &CredentialPair) -> String {
    format!("{}; {}", access_cookie(pair), refresh_cookie(pair))
}

fn set_cookies(res: &reqwest::Response) -> Vec<String> {
    res.headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// Value of `name` among `Set-Cookie` headers.
fn cookie_value(cookies: &[String], name: &str) -> Option<String> {
    cookies.iter().find_map(|c| {
        let first = c.split(';').next()?;
        let (n, v) = first.split_once('=')?;
        (n == name).then(|| v.to_string())
    })
}

async fn whoami(client: &reqwest::Client, srv: &TestServer, cookie: Option<&str>) -> reqwest::Response {
    let mut req = client.get(format!("{}/whoami", srv.base_url));
    if let Some(cookie) = cookie {
        req = req.header(COOKIE, cookie);
    }
    req.send().await.unwrap()
}

#[tokio::test]
async fn health_needs_no_credentials() {
    let srv = TestServer::spawn().await;

    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn requests_without_cookies_are_anonymous() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = whoami(&client, &srv, None).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert!(set_cookies(&res).is_empty());
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["authenticated"], false);
    assert!(body.get("identity_id").is_none());
}

#[tokio::test]
async fn access_cookie_resolves_identity_without_rotation() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let pair = srv.login().await;

    let res = whoami(&client, &srv, Some(&both_cookies(&pair))).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert!(set_cookies(&res).is_empty());
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["identity_id"].as_str().unwrap(), pair.identity.to_string());
}

#[tokio::test]
async fn garbage_credentials_are_anonymous_and_cleared() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = whoami(&client, &srv, Some("accessToken=not-a-jwt; refreshToken=nope")).await;

    assert_eq!(res.status(), StatusCode::OK);
    let cookies = set_cookies(&res);
    assert_eq!(cookie_value(&cookies, "accessToken").as_deref(), Some(""));
    assert_eq!(cookie_value(&cookies, "refreshToken").as_deref(), Some(""));
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["authenticated"], false);
}

#[tokio::test]
async fn expired_access_rotates_and_replayed_refresh_revokes_session() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let first = srv.login().await;

    srv.clock.advance(ChronoDuration::minutes(16));

    // Silent refresh: the stale pair is replaced via Set-Cookie.
    let res = whoami(&client, &srv, Some(&both_cookies(&first))).await;
    assert_eq!(res.status(), StatusCode::OK);
    let cookies = set_cookies(&res);
    let access2 = cookie_value(&cookies, "accessToken").expect("rotated access cookie");
    let refresh2 = cookie_value(&cookies, "refreshToken").expect("rotated refresh cookie");
    assert_ne!(access2, first.access_token);
    assert_ne!(refresh2, first.refresh_token.as_str());
    assert!(cookies.iter().all(|c| c.contains("HttpOnly")));
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["identity_id"].as_str().unwrap(), first.identity.to_string());

    // The new access token works on its own.
    let res = whoami(&client, &srv, Some(&format!("accessToken={access2}"))).await;
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["authenticated"], true);

    // Replaying the consumed refresh token is a hard failure.
    let res = whoami(&client, &srv, Some(&refresh_cookie(&first))).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let cookies = set_cookies(&res);
    assert_eq!(cookie_value(&cookies, "accessToken").as_deref(), Some(""));
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "refresh_token_reused");

    // Everything issued to the session is dead, including the rotated pair.
    let res = whoami(
        &client,
        &srv,
        Some(&format!("accessToken={access2}; refreshToken={refresh2}")),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["authenticated"], false);
}

#[tokio::test]
async fn rotated_cookie_lifetimes_follow_the_service_clock() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    srv.clock.advance(ChronoDuration::days(1));
    let first = srv.login().await;
    srv.clock.advance(ChronoDuration::minutes(16));

    let res = whoami(&client, &srv, Some(&both_cookies(&first))).await;

    let cookies = set_cookies(&res);
    let access = cookies.iter().find(|c| c.starts_with("accessToken=")).unwrap();
    let refresh = cookies.iter().find(|c| c.starts_with("refreshToken=")).unwrap();
    assert!(access.ends_with("Max-Age=900"), "{access}");
    assert!(refresh.ends_with("Max-Age=2592000"), "{refresh}");
}

#[tokio::test]
async fn every_replay_of_a_consumed_refresh_token_is_rejected() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let first = srv.login().await;
    srv.clock.advance(ChronoDuration::minutes(16));
    whoami(&client, &srv, Some(&refresh_cookie(&first))).await;

    for _ in 0..2 {
        let res = whoami(&client, &srv, Some(&refresh_cookie(&first))).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["error"], "refresh_token_reused");
    }
}

#[tokio::test]
async fn admit_counts_down_then_rate_limits_until_replenished() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let pair = srv.login().await;
    let license = srv.provision("L1", pair.identity, 2).await;
    let url = format!("{}/licenses/L1/admit", srv.base_url);

    for expected in [1u32, 0] {
        let res = client
            .post(&url)
            .header(COOKIE, access_cookie(&pair))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["x-ratelimit-remaining"], expected.to_string().as_str());
        assert_eq!(res.headers()["x-ratelimit-limit"], "2");
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["remaining"], expected);
        assert_eq!(body["capacity"], 2);
    }

    let res = client
        .post(&url)
        .header(COOKIE, access_cookie(&pair))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "quota_exhausted");

    srv.services
        .ledger
        .replenish(&license, srv.services.clock.now())
        .await
        .unwrap();

    let res = client
        .post(&url)
        .header(COOKIE, access_cookie(&pair))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-ratelimit-remaining"], "1");
}

#[tokio::test]
async fn admit_requires_session_and_ownership() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let owner = srv.login().await;
    let stranger = srv.login().await;
    srv.provision("L1", owner.identity, 5).await;

    let res = client
        .post(format!("{}/licenses/L1/admit", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .post(format!("{}/licenses/L1/admit", srv.base_url))
        .header(COOKIE, access_cookie(&stranger))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .post(format!("{}/licenses/unknown-license/admit", srv.base_url))
        .header(COOKIE, access_cookie(&owner))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "no_such_license");

    // Neither rejection charged the owner's bucket.
    let res = client
        .get(format!("{}/licenses/L1/quota", srv.base_url))
        .header(COOKIE, access_cookie(&owner))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["license_id"], "L1");
    assert_eq!(body["remaining"], 5);
    assert_eq!(body["capacity"], 5);

    let res = client
        .get(format!("{}/licenses/L1/quota", srv.base_url))
        .header(COOKIE, access_cookie(&stranger))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn logout_clears_cookies_and_ends_session() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let pair = srv.login().await;

    let res = client
        .post(format!("{}/session/logout", srv.base_url))
        .header(COOKIE, both_cookies(&pair))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    let cookies = set_cookies(&res);
    assert_eq!(cookie_value(&cookies, "accessToken").as_deref(), Some(""));
    assert_eq!(cookie_value(&cookies, "refreshToken").as_deref(), Some(""));

    let res = whoami(&client, &srv, Some(&both_cookies(&pair))).await;
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["authenticated"], false);

    let res = client
        .post(format!("{}/session/logout", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

struct DownLedger;

#[async_trait::async_trait]
impl QuotaLedger for DownLedger {
    async fn provision(&self, _: License, _: DateTime<Utc>) -> Result<QuotaBucket, LedgerError> {
        Err(LedgerError::Unavailable("down".into()))
    }
    async fn license(&self, _: &LicenseId) -> Result<Option<License>, LedgerError> {
        Err(LedgerError::Unavailable("down".into()))
    }
    async fn bucket(&self, _: &LicenseId) -> Result<Option<QuotaBucket>, LedgerError> {
        Err(LedgerError::Unavailable("down".into()))
    }
    async fn try_consume(&self, _: &LicenseId) -> Result<ConsumeOutcome, LedgerError> {
        Err(LedgerError::Unavailable("down".into()))
    }
    async fn replenish(&self, _: &LicenseId, _: DateTime<Utc>) -> Result<Option<QuotaBucket>, LedgerError> {
        Err(LedgerError::Unavailable("down".into()))
    }
    async fn due_for_replenishment(&self, _: DateTime<Utc>) -> Result<Vec<LicenseId>, LedgerError> {
        Err(LedgerError::Unavailable("down".into()))
    }
}

struct DownStore;

#[async_trait::async_trait]
impl CredentialStore for DownStore {
    async fn get(&self, _: IdentityId) -> Result<Option<CredentialRecord>, CredentialStoreError> {
        Err(CredentialStoreError::Unavailable("down".into()))
    }
    async fn put(&self, _: CredentialRecord) -> Result<(), CredentialStoreError> {
        Err(CredentialStoreError::Unavailable("down".into()))
    }
    async fn invalidate(&self, _: IdentityId, _: SessionId) -> Result<Option<CredentialRecord>, CredentialStoreError> {
        Err(CredentialStoreError::Unavailable("down".into()))
    }
    async fn lookup_refresh(&self, _: &RefreshTokenHash) -> Result<RefreshLookup, CredentialStoreError> {
        Err(CredentialStoreError::Unavailable("down".into()))
    }
    async fn rotate(
        &self,
        _: IdentityId,
        _: &RefreshTokenHash,
        _: CredentialRecord,
    ) -> Result<RotateOutcome, CredentialStoreError> {
        Err(CredentialStoreError::Unavailable("down".into()))
    }
}

#[tokio::test]
async fn ledger_outage_is_service_unavailable() {
    let srv = TestServer::spawn_with(Arc::new(InMemoryCredentialStore::new()), Arc::new(DownLedger)).await;
    let client = reqwest::Client::new();
    let pair = srv.login().await;

    let res = client
        .post(format!("{}/licenses/L1/admit", srv.base_url))
        .header(COOKIE, access_cookie(&pair))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "store_unavailable");

    let res = client
        .get(format!("{}/licenses/L1/quota", srv.base_url))
        .header(COOKIE, access_cookie(&pair))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn credential_store_outage_keeps_access_tokens_and_drops_refresh_to_anonymous() {
    let srv = TestServer::spawn_with(Arc::new(DownStore), Arc::new(InMemoryQuotaLedger::new())).await;
    let client = reqwest::Client::new();

    let now = srv.clock.now();
    let identity = IdentityId::new();
    let access = Hs256AccessTokens::new(JWT_SECRET)
        .issue(&AccessClaims::new(identity, SessionId::new(), now, now + ChronoDuration::minutes(15)))
        .unwrap();

    // Access tokens verify without the store.
    let res = whoami(&client, &srv, Some(&format!("accessToken={access}; refreshToken=r1"))).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["identity_id"].as_str().unwrap(), identity.to_string());

    // Refresh needs the store; the request continues anonymously and keeps its cookies.
    let res = whoami(&client, &srv, Some("refreshToken=r1")).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(set_cookies(&res).is_empty());
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["authenticated"], false);
}

//! Federation configuration, modeled closely on the teacher crate's own `config` module:
//! [`FederationConfig`] holds domain/client/debug settings and is cloned cheaply into
//! [`Data`] for each request; [`AppSettings`] is the bridge's own operator-facing
//! configuration (§6 "Configuration (selected)"), loaded once at startup.

use crate::error::Error;
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use std::{
    ops::Deref,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};
use url::Url;

/// Configuration for this bridge, with various federation related settings.
///
/// Construct via [`FederationConfig::builder`]. Cheap to clone: the heavy fields are behind
/// `Arc`/`Clone`-friendly types, following the teacher's `FederationConfig<T>` shape.
#[derive(Clone)]
pub struct FederationConfig<T: Clone> {
    pub(crate) domain: String,
    pub(crate) app_data: T,
    pub(crate) http_fetch_limit: u32,
    pub(crate) client: ClientWithMiddleware,
    pub(crate) request_timeout: Duration,
    pub(crate) debug: bool,
    pub(crate) url_verifier: Arc<dyn UrlVerifier + Send + Sync>,
    pub(crate) http_signature_compat: bool,
}

/// Builder for [`FederationConfig`].
pub struct FederationConfigBuilder<T: Clone> {
    domain: Option<String>,
    app_data: Option<T>,
    http_fetch_limit: u32,
    client: Option<ClientWithMiddleware>,
    request_timeout: Duration,
    debug: bool,
    url_verifier: Arc<dyn UrlVerifier + Send + Sync>,
    http_signature_compat: bool,
}

impl<T: Clone> Default for FederationConfigBuilder<T> {
    fn default() -> Self {
        FederationConfigBuilder {
            domain: None,
            app_data: None,
            http_fetch_limit: 20,
            client: None,
            request_timeout: Duration::from_secs(15),
            debug: false,
            url_verifier: Arc::new(DefaultUrlVerifier()),
            http_signature_compat: false,
        }
    }
}

impl<T: Clone> FederationConfigBuilder<T> {
    /// The domain this instance is reachable at, e.g. `bridge.example.com`.
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Application data made available to every handler through [`Data::app_data`].
    pub fn app_data(mut self, app_data: T) -> Self {
        self.app_data = Some(app_data);
        self
    }

    /// Maximum outgoing HTTP requests per incoming request, guarding against recursive fetch
    /// denial-of-service (spec §4.2, ActivityPub security considerations).
    pub fn http_fetch_limit(mut self, limit: u32) -> Self {
        self.http_fetch_limit = limit;
        self
    }

    /// Override the HTTP client, e.g. to install tracing middleware.
    pub fn client(mut self, client: ClientWithMiddleware) -> Self {
        self.client = Some(client);
        self
    }

    /// Allows `http://` and `localhost` URLs; used by tests only.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Install a custom [`UrlVerifier`], e.g. for a domain blocklist.
    pub fn url_verifier(mut self, verifier: Arc<dyn UrlVerifier + Send + Sync>) -> Self {
        self.url_verifier = verifier;
        self
    }

    /// Sign with draft-10 semantics (no `created`/`expires` pseudo-headers), required for
    /// compatibility with some Pleroma deployments.
    pub fn http_signature_compat(mut self, compat: bool) -> Self {
        self.http_signature_compat = compat;
        self
    }

    /// Finish building. Fails if `domain` or `app_data` were never set.
    pub fn build(self) -> Result<FederationConfig<T>, Error> {
        let domain = self
            .domain
            .ok_or_else(|| Error::Fatal("FederationConfig: domain is required".into()))?;
        let app_data = self
            .app_data
            .ok_or_else(|| Error::Fatal("FederationConfig: app_data is required".into()))?;
        Ok(FederationConfig {
            domain,
            app_data,
            http_fetch_limit: self.http_fetch_limit,
            client: self.client.unwrap_or_else(|| reqwest::Client::default().into()),
            request_timeout: self.request_timeout,
            debug: self.debug,
            url_verifier: self.url_verifier,
            http_signature_compat: self.http_signature_compat,
        })
    }
}

impl<T: Clone> FederationConfig<T> {
    /// Returns a new config builder with default values.
    pub fn builder() -> FederationConfigBuilder<T> {
        FederationConfigBuilder::default()
    }

    /// Create new [`Data`] from this config. Prefer using the axum extractor where possible.
    pub fn to_request_data(&self) -> Data<T> {
        Data {
            config: self.clone(),
            request_counter: Default::default(),
        }
    }

    /// Performs the security checks mandated by the ActivityPub spec on URLs before they are
    /// fetched, dereferenced, or delivered to.
    pub(crate) async fn verify_url_valid(&self, url: &Url) -> Result<(), Error> {
        match url.scheme() {
            "https" => {}
            "http" if self.debug => {}
            "http" => {
                return Err(Error::UrlVerification("http urls are only allowed in debug mode"))
            }
            _ => return Err(Error::UrlVerification("invalid url scheme")),
        }
        if self.is_local_url(url) {
            return Ok(());
        }
        if url.domain().is_none() {
            return Err(Error::UrlVerification("url must have a domain"));
        }
        if url.domain() == Some("localhost") && !self.debug {
            return Err(Error::UrlVerification("localhost is only allowed in debug mode"));
        }
        self.url_verifier
            .verify(url)
            .await
            .map_err(Error::UrlVerification)?;
        Ok(())
    }

    /// True if `url` refers to this instance (handles `host:port` forms for local testing).
    pub(crate) fn is_local_url(&self, url: &Url) -> bool {
        let mut domain = match url.host_str() {
            Some(d) => d.to_string(),
            None => return false,
        };
        if let Some(port) = url.port() {
            domain = format!("{domain}:{port}");
        }
        domain == self.domain
    }

    /// The local domain this bridge federates as.
    pub fn domain(&self) -> &str {
        &self.domain
    }
}

impl<T: Clone> Deref for FederationConfig<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.app_data
    }
}

/// Handler for validating URLs, e.g. to implement a federation blocklist.
///
/// Called before fetching remote data and before dispatching to an inbox. Returning `Err`
/// aborts processing for that URL.
#[async_trait]
pub trait UrlVerifier {
    /// Returns `Ok` iff `url` is allowed to be fetched/dispatched to.
    async fn verify(&self, url: &Url) -> Result<(), &'static str>;
}

#[derive(Clone)]
struct DefaultUrlVerifier();

#[async_trait]
impl UrlVerifier for DefaultUrlVerifier {
    async fn verify(&self, _url: &Url) -> Result<(), &'static str> {
        Ok(())
    }
}

/// Per-request federation data: gives handlers access to [`FederationConfig::app_data`] and
/// tracks outgoing HTTP fetches to cap recursive dereferencing (spec §4.2).
#[derive(Clone)]
pub struct Data<T: Clone> {
    pub(crate) config: FederationConfig<T>,
    pub(crate) request_counter: Arc<AtomicU32>,
}

impl<T: Clone> Data<T> {
    /// Returns the data stored in [`FederationConfigBuilder::app_data`].
    pub fn app_data(&self) -> &T {
        &self.config.app_data
    }

    /// The domain configured for this instance.
    pub fn domain(&self) -> &str {
        &self.config.domain
    }

    /// Total outgoing HTTP fetches performed using this `Data` instance so far.
    pub fn request_count(&self) -> u32 {
        self.request_counter.load(Ordering::Relaxed)
    }
}

impl<T: Clone> Deref for Data<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.config.app_data
    }
}

#[async_trait]
impl<S, T> axum::extract::FromRequestParts<S> for Data<T>
where
    S: Send + Sync,
    T: Clone + Send + Sync + 'static,
{
    type Rejection = (axum::http::StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<FederationConfig<T>>() {
            Some(config) => Ok(config.to_request_data()),
            None => Err((
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "missing FederationConfig extension",
            )),
        }
    }
}

/// Tower layer inserting [`FederationConfig`] into the request extensions, so [`Data`] can be
/// extracted by handlers.
#[derive(Clone)]
pub struct FederationMiddleware<T: Clone>(pub FederationConfig<T>);

impl<T: Clone> FederationMiddleware<T> {
    /// Construct a new middleware instance.
    pub fn new(config: FederationConfig<T>) -> Self {
        FederationMiddleware(config)
    }
}

impl<S, T: Clone + Send + Sync + 'static> tower::Layer<S> for FederationMiddleware<T> {
    type Service = FederationService<S, T>;

    fn layer(&self, inner: S) -> Self::Service {
        FederationService {
            inner,
            config: self.0.clone(),
        }
    }
}

/// Service produced by [`FederationMiddleware`].
#[derive(Clone)]
pub struct FederationService<S, T: Clone> {
    inner: S,
    config: FederationConfig<T>,
}

impl<S, T> tower::Service<axum::http::Request<axum::body::Body>> for FederationService<S, T>
where
    S: tower::Service<axum::http::Request<axum::body::Body>, Response = axum::response::Response>
        + Send
        + 'static,
    S::Future: Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: axum::http::Request<axum::body::Body>) -> Self::Future {
        request.extensions_mut().insert(self.config.clone());
        self.inner.call(request)
    }
}

/// Operator-facing settings, loaded once at startup via [`AppSettings::load`] (§6).
///
/// All fields are optional in the source file/environment; defaults are documented per field.
/// CLI argument parsing and environment variable wrangling beyond this struct are treated as an
/// external collaborator per spec §1 — this struct only describes the resulting shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    /// Port the HTTP surface listens on.
    pub port: u16,
    /// Hostname this bridge federates as (the AP `domain`).
    pub hostname: String,
    /// Public base URL actors/objects are minted under, e.g. `https://bridge.example.com`.
    pub public_url: String,
    pub pds: PdsSettings,
    pub db: DbSettings,
    pub firehose: FirehoseSettings,
    pub bridge: BridgeSettings,
    pub constellation: ConstellationSettings,
    pub app_view: AppViewSettings,
    /// Allows fetching/delivering to loopback and private IP ranges. Testing only.
    pub allow_private_address: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            port: 8000,
            hostname: "localhost".to_string(),
            public_url: "http://localhost:8000".to_string(),
            pds: PdsSettings::default(),
            db: DbSettings::default(),
            firehose: FirehoseSettings::default(),
            bridge: BridgeSettings::default(),
            constellation: ConstellationSettings::default(),
            app_view: AppViewSettings::default(),
            allow_private_address: false,
        }
    }
}

impl AppSettings {
    /// Loads configuration from an optional file followed by `APBRIDGE_`-prefixed environment
    /// variables, with nested keys separated by `__` (e.g. `APBRIDGE_PDS__URL`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppSettings::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder
            .add_source(
                config::Environment::with_prefix("APBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PdsSettings {
    pub url: String,
    pub admin_token: String,
}

impl Default for PdsSettings {
    fn default() -> Self {
        PdsSettings {
            url: "http://localhost:2583".to_string(),
            admin_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DbSettings {
    pub location: String,
    pub max_connections: u32,
}

impl Default for DbSettings {
    fn default() -> Self {
        DbSettings {
            location: "postgres://localhost/apbridge".to_string(),
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FirehoseSettings {
    pub enabled: bool,
    pub cursor: Option<i64>,
}

impl Default for FirehoseSettings {
    fn default() -> Self {
        FirehoseSettings {
            enabled: true,
            cursor: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    pub mastodon: BridgeAccountSettings,
    pub bluesky: BridgeAccountSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeAccountSettings {
    pub handle: String,
    pub display_name: String,
    pub description: String,
    /// Fetched and uploaded as the account's avatar blob on creation (spec §4.6). Optional: most
    /// deployments are fine with the PDS default.
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        BridgeSettings {
            mastodon: BridgeAccountSettings {
                handle: "ap.bridge".to_string(),
                display_name: "Fediverse Bridge".to_string(),
                description: "Replies from the fediverse, relayed onto this PDS.".to_string(),
                avatar_url: None,
            },
            bluesky: BridgeAccountSettings {
                handle: "bsky.bridge".to_string(),
                display_name: "Bluesky Bridge".to_string(),
                description: "Bluesky posts, relayed onto the fediverse.".to_string(),
                avatar_url: None,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConstellationSettings {
    pub url: String,
    pub poll_interval_secs: u64,
}

impl Default for ConstellationSettings {
    fn default() -> Self {
        ConstellationSettings {
            url: "https://constellation.microcosm.blue".to_string(),
            poll_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppViewSettings {
    pub url: String,
}

impl Default for AppViewSettings {
    fn default() -> Self {
        AppViewSettings {
            url: "https://public.api.bsky.app".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FederationConfig<()> {
        FederationConfig::builder()
            .domain("bridge.example")
            .app_data(())
            .build()
            .unwrap()
    }

    #[test]
    fn is_local_url_matches_configured_domain() {
        let config = config();
        assert!(config.is_local_url(&"https://bridge.example/users/did:plc:alice".parse().unwrap()));
        assert!(!config.is_local_url(&"https://elsewhere.example/users/did:plc:alice".parse().unwrap()));
    }

    #[test]
    fn is_local_url_matches_explicit_port() {
        let config = FederationConfig::builder()
            .domain("localhost:8080")
            .app_data(())
            .build()
            .unwrap();
        assert!(config.is_local_url(&"http://localhost:8080/users/did:plc:alice".parse().unwrap()));
        assert!(!config.is_local_url(&"http://localhost:9090/users/did:plc:alice".parse().unwrap()));
    }

    #[tokio::test]
    async fn verify_url_valid_rejects_http_outside_debug() {
        let config = config();
        let err = config
            .verify_url_valid(&"http://elsewhere.example/actor".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UrlVerification(_)));
    }

    #[tokio::test]
    async fn verify_url_valid_allows_https() {
        let config = config();
        assert!(config
            .verify_url_valid(&"https://elsewhere.example/actor".parse().unwrap())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn verify_url_valid_rejects_localhost_outside_debug() {
        let config = config();
        let err = config
            .verify_url_valid(&"https://localhost/actor".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UrlVerification(_)));
    }

    #[tokio::test]
    async fn verify_url_valid_allows_localhost_in_debug() {
        let config = FederationConfig::builder()
            .domain("bridge.example")
            .app_data(())
            .debug(true)
            .build()
            .unwrap();
        assert!(config
            .verify_url_valid(&"https://localhost/actor".parse().unwrap())
            .await
            .is_ok());
    }
}

//! Bidirectional federation sidecar bridging an ATProto PDS with the ActivityPub fediverse.

pub mod activity_sending;
pub mod actor_dispatcher;
pub mod bridge_accounts;
pub mod chat_client;
pub mod config;
pub mod constellation_client;
pub mod converters;
pub mod dispatcher;
pub mod engagement_notifier;
pub mod error;
pub mod external_reply_processor;
pub mod fetch;
pub mod firehose;
pub mod http_signatures;
pub mod inbox;
pub mod nonce_janitor;
pub mod pds_client;
pub mod protocol;
pub mod store;
pub mod traits;
pub mod web;

use crate::{
    bridge_accounts::BridgeAccountManager,
    chat_client::ChatClient,
    config::{AppSettings, Data, FederationConfig},
    constellation_client::ConstellationClient,
    converters::ConverterRegistry,
    dispatcher::OutboundDispatcher,
    error::Error,
    pds_client::PdsClient,
    store::{bridge_account::BridgeRole, Store},
};
use std::sync::Arc;

/// Number of concurrent outbound-delivery workers (spec §4.4).
const DISPATCHER_WORKER_COUNT: usize = 8;

/// Everything every handler/background task in this bridge shares, assembled once in
/// [`build_app_state`] and handed out as [`config::Data::app_data`].
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<AppSettings>,
    pub store: Store,
    pub pds: PdsClient,
    /// A second [`PdsClient`] pointed at the AppView's `com.atproto.repo.getRecord`, used where
    /// the PDS itself does not hold the record being read (spec §4.9).
    pub app_view: PdsClient,
    pub chat: ChatClient,
    pub constellation: ConstellationClient,
    pub converters: Arc<ConverterRegistry>,
    pub dispatcher: Arc<OutboundDispatcher>,
    pub bridge_mastodon: Arc<BridgeAccountManager>,
    pub bridge_bluesky: Arc<BridgeAccountManager>,
}

impl AppState {
    /// The manager for whichever relay identity owns `role` (spec §4.6).
    pub fn bridge_manager(&self, role: BridgeRole) -> &Arc<BridgeAccountManager> {
        match role {
            BridgeRole::Mastodon => &self.bridge_mastodon,
            BridgeRole::Bluesky => &self.bridge_bluesky,
        }
    }
}

/// Assembles the shared [`FederationConfig`] wrapping [`AppState`], matching the teacher's own
/// builder-based config assembly.
pub async fn build_app_state(settings: AppSettings) -> Result<FederationConfig<AppState>, Error> {
    let client: reqwest_middleware::ClientWithMiddleware = reqwest_middleware::ClientBuilder::new(
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(Error::from)?,
    )
    .with(reqwest_tracing::TracingMiddleware::default())
    .build();

    let store = Store::connect(&settings.db.location, settings.db.max_connections).await?;
    store.migrate().await?;

    let pds = PdsClient::new(settings.pds.url.clone(), client.clone());
    let app_view = PdsClient::new(settings.app_view.url.clone(), client.clone());
    let chat = ChatClient::new(client.clone());
    let constellation = ConstellationClient::new(settings.constellation.url.clone(), client.clone());
    let converters = Arc::new(ConverterRegistry::with_defaults());
    let dispatcher = Arc::new(OutboundDispatcher::spawn(
        store.clone(),
        client.clone(),
        DISPATCHER_WORKER_COUNT,
    ));
    let bridge_mastodon = Arc::new(BridgeAccountManager::new(
        BridgeRole::Mastodon,
        store.clone(),
        pds.clone(),
        settings.pds.admin_token.clone(),
    ));
    let bridge_bluesky = Arc::new(BridgeAccountManager::new(
        BridgeRole::Bluesky,
        store.clone(),
        pds.clone(),
        settings.pds.admin_token.clone(),
    ));

    let app_state = AppState {
        settings: Arc::new(settings.clone()),
        store,
        pds,
        app_view,
        chat,
        constellation,
        converters,
        dispatcher,
        bridge_mastodon,
        bridge_bluesky,
    };

    FederationConfig::builder()
        .domain(settings.hostname.clone())
        .app_data(app_state)
        .client(client)
        .http_fetch_limit(20)
        .debug(settings.allow_private_address)
        .build()
}

/// Shorthand used throughout handlers/background tasks.
pub type AppData = Data<AppState>;

mod backend_event;
pub mod client;
pub mod frames;
pub mod import;
pub mod listener;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use url::Url;

use hassdeck_api::config::{AppConfig, HassServer};
use hassdeck_api::event::SessionEvent;
use lightcolor::Hs;

use crate::debounce::Debouncer;
use crate::error::{ApiError, ApiResult};
use crate::health::HealthBus;
use crate::model::state::LightStateManager;

use self::backend_event::{StateSync, TurnOnSender};
use self::client::HassClient;
use self::import::{AreaGroup, HubSnapshot, Registry, ServiceCatalog};
use self::listener::HassListener;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Resolve the access token: the literal from the config wins, otherwise the
/// configured environment variable.
pub fn resolve_token(server: &HassServer) -> ApiResult<String> {
    let literal = server
        .token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = literal {
        return Ok(token.to_string());
    }

    let env = server.token_env_name();
    std::env::var(env)
        .ok()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            ApiError::service_error(format!(
                "No Home Assistant token set. Configure hass.token or env {env}"
            ))
        })
}

/// One connection to a hub, plus everything kept in sync with it.
///
/// Create with [`new`](Self::new), wrap in an [`Arc`] and call
/// [`start`](Self::start). Background tasks hold a reference to the session
/// until [`shutdown`](Self::shutdown).
pub struct HassSession {
    name: String,
    config: AppConfig,
    endpoint: Url,
    token: String,
    client: Arc<HassClient>,
    state: Arc<LightStateManager>,
    health: HealthBus,
    events: broadcast::Sender<SessionEvent>,
    registry: RwLock<Registry>,
    services: RwLock<ServiceCatalog>,
    last_refresh: Mutex<Option<DateTime<Utc>>>,
    brightness: Debouncer<String, u8>,
    hs_color: Debouncer<String, Hs>,
    color_temp: Debouncer<String, u32>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HassSession {
    pub fn new(name: &str, config: AppConfig) -> ApiResult<Self> {
        let token = resolve_token(&config.hass)?;
        let endpoint = config.hass.get_ws_url();
        let health = HealthBus::new();
        let cancel = CancellationToken::new();

        let client = Arc::new(
            HassClient::new(name, health.clone(), cancel.clone())
                .with_health_grace(config.timeouts.health_grace()),
        );

        let state = Arc::new(LightStateManager::new());
        let sender = Arc::new(TurnOnSender::new(
            client.clone(),
            state.clone(),
            config.timeouts.request(),
        ));
        let brightness: Debouncer<String, u8> =
            Debouncer::new("brightness", config.debounce.brightness(), sender.clone())?;
        let hs_color: Debouncer<String, Hs> =
            Debouncer::new("hs_color", config.debounce.hs_color(), sender.clone())?;
        let color_temp: Debouncer<String, u32> =
            Debouncer::new("color_temp", config.debounce.color_temp(), sender)?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            name: name.to_string(),
            config,
            endpoint,
            token,
            client,
            state,
            health,
            events,
            registry: RwLock::new(Registry::default()),
            services: RwLock::new(ServiceCatalog::default()),
            last_refresh: Mutex::new(None),
            brightness,
            hs_color,
            color_temp,
            cancel,
            tasks: Mutex::new(vec![]),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    #[must_use]
    pub const fn state(&self) -> &Arc<LightStateManager> {
        &self.state
    }

    #[must_use]
    pub const fn client(&self) -> &Arc<HassClient> {
        &self.client
    }

    #[must_use]
    pub const fn health(&self) -> &HealthBus {
        &self.health
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn registry(&self) -> Registry {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .has(domain, service)
    }

    #[must_use]
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self
            .last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Every known entity, grouped for display.
    #[must_use]
    pub fn area_groups(&self) -> Vec<AreaGroup> {
        let ids = self.state.entity_ids();
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .group_by_area(ids.iter().map(String::as_str))
    }

    fn notify(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Connect, load the initial state and spawn the listener and periodic
    /// refresh tasks. Calling it again only refreshes.
    pub async fn start(self: &Arc<Self>) -> ApiResult<()> {
        self.client
            .connect_and_authenticate(&self.endpoint, &self.token, self.config.timeouts.connect())
            .await?;
        self.refresh().await?;

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if tasks.is_empty() {
            tasks.push(tokio::spawn(self.clone().listen()));
            tasks.push(tokio::spawn(self.clone().refresh_loop()));
        }
        drop(tasks);

        log::info!("[{}] Session started", self.name);
        Ok(())
    }

    /// Re-fetch the full state snapshot.
    ///
    /// Cached color and brightness of known entities survive; entities the
    /// hub no longer reports are dropped.
    pub async fn refresh(&self) -> ApiResult<()> {
        self.client
            .ensure_connected(self.config.timeouts.connect())
            .await?;
        let snapshot = HubSnapshot::fetch(&self.client, self.config.timeouts.request()).await?;

        let entities = snapshot.entities();
        let keep = entities
            .iter()
            .map(|e| e.entity_id.clone())
            .collect::<BTreeSet<_>>();

        let added = self.state.initialize_states(entities);
        let removed = self.state.retain_only(&keep);
        for id in &removed {
            self.brightness.cancel(id);
            self.hs_color.cancel(id);
            self.color_temp.cancel(id);
        }

        *self.registry.write().unwrap_or_else(PoisonError::into_inner) = snapshot.registry;
        *self.services.write().unwrap_or_else(PoisonError::into_inner) = snapshot.services;
        *self
            .last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());

        log::info!(
            "[{}] Loaded {} entities ({} new, {} removed)",
            self.name,
            keep.len(),
            added.len(),
            removed.len()
        );

        for id in removed {
            self.notify(SessionEvent::EntityRemoved(id));
        }
        self.notify(SessionEvent::EntitiesReloaded);
        Ok(())
    }

    /// Listener supervisor: keeps the event subscription alive until
    /// cancelled.
    async fn listen(self: Arc<Self>) {
        let handler = Arc::new(StateSync::new(
            &self.name,
            self.state.clone(),
            self.events.clone(),
        ));
        let listener = HassListener::new(
            &self.name,
            self.endpoint.clone(),
            self.token.clone(),
            self.health.clone(),
            handler,
            self.config.timeouts.connect(),
        );
        let resync = tokio::spawn(self.clone().resync(listener.subscriptions()));
        let backoff = self.config.refresh.reconnect();

        loop {
            match listener.run(&self.cancel).await {
                Ok(()) => break,
                Err(err) => {
                    log::warn!(
                        "[{}] Event listener stopped: {err}. Retrying in {}s",
                        self.name,
                        backoff.as_secs()
                    );
                }
            }

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(backoff) => {}
            }
        }

        if let Err(err) = resync.await {
            log::debug!("[{}] Resync task ended abnormally: {err}", self.name);
        }
        log::debug!("[{}] Listener supervisor stopped", self.name);
    }

    /// Re-fetch the snapshot after every acknowledged subscription. Changes
    /// made while no subscription was active only show up this way.
    async fn resync(self: Arc<Self>, mut subscriptions: watch::Receiver<u64>) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                res = subscriptions.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }

            if let Err(err) = self.refresh().await {
                log::warn!("[{}] Resync after subscribing failed: {err}", self.name);
            }
        }
    }

    async fn refresh_loop(self: Arc<Self>) {
        let period = self.config.refresh.interval();
        if period.is_zero() {
            return;
        }

        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick completes immediately, and start() just refreshed
        tick.tick().await;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = tick.tick() => {
                    if let Err(err) = self.refresh().await {
                        log::warn!("[{}] Periodic refresh failed: {err}", self.name);
                    }
                }
            }
        }
    }

    /// Stop background work, drop pending debounced sends and close the
    /// connection.
    pub async fn shutdown(&self) {
        log::info!("[{}] Shutting down", self.name);
        self.cancel.cancel();

        self.brightness.cancel_all();
        self.hs_color.cancel_all();
        self.color_temp.cancel_all();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            if let Err(err) = task.await {
                log::debug!("[{}] Background task ended abnormally: {err}", self.name);
            }
        }

        self.client.close().await;
    }
}

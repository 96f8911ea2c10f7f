use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::sync::broadcast;

use hassdeck_api::event::{LightEvent, SessionEvent};
use lightcolor::Hs;
use lightcolor::hsv::hsb_to_rgb;
use lightcolor::kelvin;

use crate::backend::hass::HassSession;
use crate::backend::hass::client::HassClient;
use crate::backend::hass::import::{entity_domain, is_supported_entity};
use crate::backend::hass::listener::LightEventHandler;
use crate::debounce::DebounceSender;
use crate::error::{ApiError, ApiResult};
use crate::model::capabilities::ColorMode;
use crate::model::state::{EntityState, HsbState, LightStateManager};

/// Applies pushed notifications to the state manager and tells the surface.
pub(super) struct StateSync {
    name: String,
    state: Arc<LightStateManager>,
    events: broadcast::Sender<SessionEvent>,
}

impl StateSync {
    pub(super) fn new(
        name: &str,
        state: Arc<LightStateManager>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            name: name.to_string(),
            state,
            events,
        }
    }
}

impl LightEventHandler for StateSync {
    fn handle(&self, event: &LightEvent) -> ApiResult<()> {
        let entity_id = event.entity_id();
        if !is_supported_entity(entity_id) {
            return Ok(());
        }
        if self.state.apply_event(event) {
            log::trace!("[{}] {entity_id} updated by {event:?}", self.name);
            let _ = self
                .events
                .send(SessionEvent::EntityChanged(entity_id.to_string()));
        }
        Ok(())
    }

    fn removed(&self, entity_id: &str) -> ApiResult<()> {
        if self.state.remove_entity(entity_id) {
            log::info!("[{}] {entity_id} was removed from the hub", self.name);
            let _ = self
                .events
                .send(SessionEvent::EntityRemoved(entity_id.to_string()));
        }
        Ok(())
    }
}

/// Service data key and value for a color, in the light's preferred
/// encoding. Lights without an rgb family mode get `hs_color`.
fn color_payload(preferred: Option<ColorMode>, hs: Hs) -> (&'static str, Value) {
    match preferred {
        Some(ColorMode::Rgb | ColorMode::Rgbw | ColorMode::Rgbww) => {
            let rgb = hsb_to_rgb(hs.hue, hs.saturation, 100.0);
            ("rgb_color", json!(rgb.to_array()))
        }
        _ => ("hs_color", json!([hs.hue, hs.saturation])),
    }
}

/// Target of the three debouncers: each flush becomes one `light.turn_on`.
pub(super) struct TurnOnSender {
    client: Arc<HassClient>,
    state: Arc<LightStateManager>,
    timeout: Duration,
}

impl TurnOnSender {
    pub(super) const fn new(
        client: Arc<HassClient>,
        state: Arc<LightStateManager>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            state,
            timeout,
        }
    }

    async fn turn_on(&self, entity_id: &str, key: &str, value: Value) -> ApiResult<()> {
        let mut data = Map::new();
        data.insert(key.to_string(), value);
        self.client
            .call_service("light", "turn_on", entity_id, data, self.timeout)
            .await
    }
}

#[async_trait]
impl DebounceSender<String, u8> for TurnOnSender {
    async fn send(&self, entity_id: String, brightness: u8) -> ApiResult<()> {
        self.turn_on(&entity_id, "brightness", json!(brightness))
            .await
    }
}

#[async_trait]
impl DebounceSender<String, Hs> for TurnOnSender {
    async fn send(&self, entity_id: String, hs: Hs) -> ApiResult<()> {
        let preferred = self
            .state
            .capabilities(&entity_id)
            .and_then(|caps| caps.preferred_color);
        let (key, value) = color_payload(preferred, hs);
        self.turn_on(&entity_id, key, value).await
    }
}

/// Color temperature, in kelvin.
#[async_trait]
impl DebounceSender<String, u32> for TurnOnSender {
    async fn send(&self, entity_id: String, kelvin: u32) -> ApiResult<()> {
        self.turn_on(&entity_id, "color_temp_kelvin", json!(kelvin))
            .await
    }
}

/// Service names for switching an entity, per domain.
fn power_services(entity_id: &str) -> ApiResult<(&'static str, &'static str)> {
    match entity_domain(entity_id) {
        "light" | "switch" | "script" => Ok(("turn_on", "turn_off")),
        "cover" => Ok(("open_cover", "close_cover")),
        domain => Err(ApiError::service_error(format!(
            "Cannot switch {entity_id}: unsupported domain {domain:?}"
        ))),
    }
}

impl HassSession {
    fn known(&self, entity_id: &str) -> ApiResult<EntityState> {
        self.state
            .get(entity_id)
            .ok_or_else(|| ApiError::UnknownEntity(entity_id.to_string()))
    }

    fn changed(&self, entity_id: &str) {
        self.notify(SessionEvent::EntityChanged(entity_id.to_string()));
    }

    async fn call(
        &self,
        domain: &str,
        service: &str,
        entity_id: &str,
        data: Map<String, Value>,
    ) -> ApiResult<()> {
        self.client
            .ensure_connected(self.config.timeouts.connect())
            .await?;
        self.client
            .call_service(domain, service, entity_id, data, self.config.timeouts.request())
            .await
    }

    /// Immediate on/off, applied optimistically and rolled back if the hub
    /// refuses.
    async fn switch(&self, entity_id: &str, target: Option<bool>) -> ApiResult<()> {
        let entity = self.known(entity_id)?;
        let (on_service, off_service) = power_services(entity_id)?;
        let domain = entity_domain(entity_id);

        let (service, next) = match target {
            Some(true) => (on_service, true),
            Some(false) => (off_service, false),
            None => ("toggle", !entity.on),
        };

        self.state.set_on(entity_id, next)?;
        self.changed(entity_id);

        let res = self.call(domain, service, entity_id, Map::new()).await;
        if let Err(err) = &res {
            log::warn!("[{}] {domain}.{service} {entity_id} failed: {err}", self.name);
            if self.state.set_on(entity_id, entity.on).is_ok() {
                self.changed(entity_id);
            }
        }
        res
    }

    pub async fn toggle(&self, entity_id: &str) -> ApiResult<()> {
        self.switch(entity_id, None).await
    }

    pub async fn turn_on(&self, entity_id: &str) -> ApiResult<()> {
        self.switch(entity_id, Some(true)).await
    }

    pub async fn turn_off(&self, entity_id: &str) -> ApiResult<()> {
        self.switch(entity_id, Some(false)).await
    }

    /// Cache the brightness (clamped to 0-255) and schedule the send.
    /// Returns the stored value.
    pub fn set_brightness(&self, entity_id: &str, brightness: i32) -> ApiResult<u8> {
        let entity = self.known(entity_id)?;
        if !entity.capabilities.brightness {
            return Err(ApiError::unsupported(entity_id, "brightness"));
        }

        let stored = self.state.set_cached_brightness(entity_id, brightness)?;
        self.state.set_on(entity_id, stored > 0)?;
        self.brightness.set(entity_id.to_string(), stored);
        self.changed(entity_id);
        Ok(stored)
    }

    /// Step brightness from what is currently shown (0 when off).
    pub fn adjust_brightness(&self, entity_id: &str, delta: i32) -> ApiResult<u8> {
        let base = i32::from(self.state.get_effective_brightness(entity_id));
        self.set_brightness(entity_id, base.saturating_add(delta))
    }

    pub fn set_hs_color(&self, entity_id: &str, hue: f64, saturation: f64) -> ApiResult<HsbState> {
        let entity = self.known(entity_id)?;
        if !entity.capabilities.color_hs {
            return Err(ApiError::unsupported(entity_id, "hs color"));
        }

        let hsb = self.state.update_hs_color(entity_id, hue, saturation)?;
        self.state.set_on(entity_id, true)?;
        self.hs_color
            .set(entity_id.to_string(), Hs::new(hsb.hue, hsb.saturation));
        self.changed(entity_id);
        Ok(hsb)
    }

    /// Rotate the hue, wrapping around the color wheel.
    pub fn adjust_hue(&self, entity_id: &str, delta: f64) -> ApiResult<HsbState> {
        let hsb = self
            .state
            .hsb(entity_id)
            .ok_or_else(|| ApiError::UnknownEntity(entity_id.to_string()))?;
        self.set_hs_color(entity_id, hsb.hue + delta, hsb.saturation)
    }

    /// Returns the stored (range-clamped) mired value.
    pub fn set_color_temp_mired(&self, entity_id: &str, mired: u32) -> ApiResult<u32> {
        let entity = self.known(entity_id)?;
        if !entity.capabilities.color_temp {
            return Err(ApiError::unsupported(entity_id, "color temperature"));
        }

        let stored = self.state.update_color_temp(entity_id, mired)?;
        self.state.set_on(entity_id, true)?;
        self.color_temp.set(
            entity_id.to_string(),
            kelvin::mired_to_kelvin_rounded(f64::from(stored)),
        );
        self.changed(entity_id);
        Ok(stored)
    }

    pub fn set_color_temp_kelvin(&self, entity_id: &str, kelvin: u32) -> ApiResult<u32> {
        let mired = kelvin::kelvin_to_mired_rounded(f64::from(kelvin));
        self.set_color_temp_mired(entity_id, mired)
    }

    pub async fn set_cover_position(&self, entity_id: &str, position: u8) -> ApiResult<()> {
        let entity = self.known(entity_id)?;
        let features = entity.cover.map(|c| c.features).unwrap_or_default();
        if !features.can_set_position() {
            return Err(ApiError::unsupported(entity_id, "cover position"));
        }

        let position = position.min(100);
        self.state.set_cover_position(entity_id, position)?;
        self.changed(entity_id);

        let mut data = Map::new();
        data.insert("position".to_string(), json!(position));
        self.call("cover", "set_cover_position", entity_id, data)
            .await
    }

    pub async fn set_cover_tilt(&self, entity_id: &str, tilt: u8) -> ApiResult<()> {
        let entity = self.known(entity_id)?;
        let features = entity.cover.map(|c| c.features).unwrap_or_default();
        if !features.can_set_tilt() {
            return Err(ApiError::unsupported(entity_id, "cover tilt"));
        }

        let tilt = tilt.min(100);
        self.state.set_cover_tilt(entity_id, tilt)?;
        self.changed(entity_id);

        let mut data = Map::new();
        data.insert("tilt_position".to_string(), json!(tilt));
        self.call("cover", "set_cover_tilt_position", entity_id, data)
            .await
    }

    pub async fn run_script(&self, entity_id: &str) -> ApiResult<()> {
        if entity_domain(entity_id) != "script" {
            return Err(ApiError::service_error(format!(
                "{entity_id} is not a script"
            )));
        }
        self.call("script", "turn_on", entity_id, Map::new()).await
    }
}

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use hassdeck_api::event::{HealthStatus, LightEvent};
use lightcolor::{Hs, Rgb, XY, kelvin};

use crate::backend::hass::frames::{self, HassSocket, HassWsIncoming, authenticate, text_frame};
use crate::error::{ApiError, ApiResult};
use crate::health::HealthBus;
use crate::model::attributes::{self, get_u8, get_u32};

pub const STATE_CHANGED: &str = "state_changed";
const SUBSCRIBE_ID: u64 = 1;

/// Receiver of typed notifications. Every notification is delivered on its
/// own; an error from one is logged and does not stop the rest.
pub trait LightEventHandler: Send + Sync {
    fn handle(&self, event: &LightEvent) -> ApiResult<()>;

    /// The hub reported the entity gone (`new_state: null`).
    fn removed(&self, _entity_id: &str) -> ApiResult<()> {
        Ok(())
    }
}

/// Everything a single `state_changed` frame says about one entity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateDelta {
    pub entity_id: String,
    pub removed: bool,
    pub state: Option<String>,
    pub brightness: Option<u8>,
    pub mired: Option<u32>,
    pub kelvin: Option<u32>,
    pub min_mired: Option<u32>,
    pub max_mired: Option<u32>,
    pub hs: Option<Hs>,
    pub rgb: Option<Rgb>,
    pub xy: Option<XY>,
    pub cover_position: Option<u8>,
    pub cover_tilt: Option<u8>,
}

impl StateDelta {
    #[must_use]
    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map_or("", |(domain, _)| domain)
    }

    #[must_use]
    pub fn is_off(&self) -> bool {
        self.state.as_deref() == Some("off")
    }

    fn from_new_state(entity_id: String, new_state: &Map<String, Value>) -> Self {
        let empty = Map::new();
        let attrs = new_state
            .get("attributes")
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        let state = new_state
            .get("state")
            .and_then(Value::as_str)
            .map(ToString::to_string);

        let mut mired = get_u32(attrs, "color_temp");
        let mut kel = get_u32(attrs, "color_temp_kelvin");
        match (mired, kel) {
            (None, Some(k)) => mired = Some(kelvin::kelvin_to_mired_rounded(f64::from(k))),
            (Some(m), None) => kel = Some(kelvin::mired_to_kelvin_rounded(f64::from(m))),
            _ => {}
        }

        // the warmest kelvin is the largest mired value
        let min_mired = get_u32(attrs, "min_mireds").or_else(|| {
            get_u32(attrs, "max_color_temp_kelvin")
                .map(|k| kelvin::kelvin_to_mired_rounded(f64::from(k)))
        });
        let max_mired = get_u32(attrs, "max_mireds").or_else(|| {
            get_u32(attrs, "min_color_temp_kelvin")
                .map(|k| kelvin::kelvin_to_mired_rounded(f64::from(k)))
        });

        let mut delta = Self {
            entity_id,
            removed: false,
            state,
            brightness: get_u8(attrs, "brightness"),
            mired,
            kelvin: kel,
            min_mired,
            max_mired,
            hs: attrs.get("hs_color").and_then(attributes::parse_hs_color),
            rgb: attrs.get("rgb_color").and_then(attributes::parse_rgb_color),
            xy: attrs.get("xy_color").and_then(attributes::parse_xy_color),
            cover_position: get_u8(attrs, "current_position").map(|p| p.min(100)),
            cover_tilt: get_u8(attrs, "current_tilt_position").map(|p| p.min(100)),
        };

        // the hub omits brightness while a light is off
        if delta.is_off() && delta.domain() != "cover" {
            delta.brightness = Some(0);
        }

        delta
    }

    /// Typed notifications for this delta, in delivery order.
    #[must_use]
    pub fn events(&self) -> Vec<LightEvent> {
        let entity_id = || self.entity_id.clone();
        let mut events = vec![];

        match self.domain() {
            "script" => {
                if let Some(state) = &self.state {
                    events.push(LightEvent::ScriptRunning {
                        entity_id: entity_id(),
                        running: state == "on",
                    });
                }
            }
            "cover" => {
                if let Some(state) = &self.state {
                    events.push(LightEvent::CoverState {
                        entity_id: entity_id(),
                        state: state.clone(),
                    });
                }
            }
            _ => match self.state.as_deref() {
                Some("on") => events.push(LightEvent::Power {
                    entity_id: entity_id(),
                    on: true,
                }),
                Some("off") => events.push(LightEvent::Power {
                    entity_id: entity_id(),
                    on: false,
                }),
                _ => {}
            },
        }

        if let Some(brightness) = self.brightness {
            events.push(LightEvent::Brightness {
                entity_id: entity_id(),
                brightness,
            });
        }

        if self.mired.is_some()
            || self.kelvin.is_some()
            || self.min_mired.is_some()
            || self.max_mired.is_some()
        {
            events.push(LightEvent::ColorTemp {
                entity_id: entity_id(),
                mired: self.mired,
                kelvin: self.kelvin,
                min_mired: self.min_mired,
                max_mired: self.max_mired,
            });
        }

        if let Some(hs) = self.hs {
            events.push(LightEvent::HsColor {
                entity_id: entity_id(),
                hs,
            });
        } else {
            // only needed when no hs pair was sent along
            if let Some(rgb) = self.rgb {
                events.push(LightEvent::Rgb {
                    entity_id: entity_id(),
                    rgb,
                });
            }
            if let Some(xy) = self.xy {
                events.push(LightEvent::Xy {
                    entity_id: entity_id(),
                    xy,
                });
            }
        }

        if let Some(position) = self.cover_position {
            events.push(LightEvent::CoverPosition {
                entity_id: entity_id(),
                position,
            });
        }
        if let Some(tilt) = self.cover_tilt {
            events.push(LightEvent::CoverTilt {
                entity_id: entity_id(),
                tilt,
            });
        }

        events
    }
}

/// Parse a pushed frame into a delta.
///
/// Returns `None` for anything that is not a well-formed `state_changed`
/// event for our subscription.
#[must_use]
pub fn parse_state_changed(frame: &Value, subscription: Option<u64>) -> Option<StateDelta> {
    if frame.get("type").and_then(Value::as_str) != Some("event") {
        return None;
    }
    if let (Some(expected), Some(id)) = (subscription, frame.get("id").and_then(Value::as_u64)) {
        if expected != id {
            return None;
        }
    }

    let event = frame.get("event")?.as_object()?;
    if event.get("event_type").and_then(Value::as_str) != Some(STATE_CHANGED) {
        return None;
    }
    let data = event.get("data")?.as_object()?;
    let entity_id = data.get("entity_id")?.as_str()?.to_string();
    if entity_id.is_empty() {
        return None;
    }

    match data.get("new_state") {
        None | Some(Value::Null) => Some(StateDelta {
            entity_id,
            removed: true,
            ..StateDelta::default()
        }),
        Some(Value::Object(new_state)) => Some(StateDelta::from_new_state(entity_id, new_state)),
        Some(_) => None,
    }
}

/// Deliver every notification of a delta, isolating failures.
pub fn dispatch(name: &str, delta: &StateDelta, handler: &dyn LightEventHandler) {
    if delta.removed {
        if let Err(err) = handler.removed(&delta.entity_id) {
            log::warn!("[{name}] Removal handler for {} failed: {err}", delta.entity_id);
        }
        return;
    }
    for event in delta.events() {
        if let Err(err) = handler.handle(&event) {
            log::warn!("[{name}] Handler failed for {event:?}: {err}");
        }
    }
}

/// Second, independent session that only listens for pushed state changes.
///
/// Reconnecting is the caller's job: [`run`](Self::run) returns when the
/// socket goes away or when cancelled. Every acknowledged subscription bumps
/// the counter behind [`subscriptions`](Self::subscriptions).
pub struct HassListener {
    name: String,
    endpoint: Url,
    token: String,
    health: HealthBus,
    handler: Arc<dyn LightEventHandler>,
    timeout: Duration,
    subscribed: watch::Sender<u64>,
}

impl HassListener {
    #[must_use]
    pub fn new(
        name: &str,
        endpoint: Url,
        token: String,
        health: HealthBus,
        handler: Arc<dyn LightEventHandler>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: format!("{name}/events"),
            endpoint,
            token,
            health,
            handler,
            timeout,
            subscribed: watch::Sender::new(0),
        }
    }

    /// Number of successful subscriptions so far. Changes once the hub has
    /// acknowledged a subscription, before any event on it is processed.
    #[must_use]
    pub fn subscriptions(&self) -> watch::Receiver<u64> {
        self.subscribed.subscribe()
    }

    async fn open(&self) -> ApiResult<HassSocket> {
        let (mut socket, _response) = connect_async(self.endpoint.as_str()).await?;
        authenticate(&mut socket, &self.token).await?;

        let sub = json!({
            "id": SUBSCRIBE_ID,
            "type": "subscribe_events",
            "event_type": STATE_CHANGED,
        });
        socket.send(text_frame(&sub)).await?;

        loop {
            let Some(msg) = socket.next().await else {
                return Err(ApiError::ConnectionLost);
            };
            let Message::Text(text) = msg? else {
                continue;
            };
            if let Some(HassWsIncoming::Result(res)) = frames::parse_incoming(text.as_str()) {
                if res.id == SUBSCRIBE_ID {
                    res.into_result("subscribe_events failed")?;
                    break;
                }
            }
        }

        Ok(socket)
    }

    /// Connect, subscribe and process events until cancelled (`Ok`) or the
    /// connection fails (`Err`).
    pub async fn run(&self, cancel: &CancellationToken) -> ApiResult<()> {
        let mut socket = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            res = tokio::time::timeout(self.timeout, self.open()) => {
                res.map_err(|_| ApiError::Timeout)??
            }
        };

        log::info!("[{}] Subscribed to {STATE_CHANGED}", self.name);
        self.subscribed.send_modify(|count| *count += 1);
        if matches!(self.health.get(), HealthStatus::Degraded(_)) {
            self.health.set(HealthStatus::Connected);
        }

        let res = loop {
            let msg = tokio::select! {
                biased;
                () = cancel.cancelled() => break Ok(()),
                msg = socket.next() => msg,
            };
            match msg {
                Some(Ok(Message::Text(text))) => self.process(text.as_str()),
                Some(Ok(Message::Close(_))) | None => break Err(ApiError::ConnectionLost),
                Some(Ok(_)) => {}
                Some(Err(err)) => break Err(err.into()),
            }
        };

        match &res {
            Ok(()) => {
                log::debug!("[{}] Event listener cancelled", self.name);
                let _ = socket.close(None).await;
            }
            Err(err) => {
                log::warn!("[{}] Event stream ended: {err}", self.name);
                if self.health.get().is_connected() {
                    self.health
                        .set(HealthStatus::Degraded("event stream lost".to_string()));
                }
            }
        }
        res
    }

    fn process(&self, text: &str) {
        let Ok(frame) = serde_json::from_str::<Value>(text) else {
            log::trace!("[{}] Skipping non-json frame", self.name);
            return;
        };
        if let Some(delta) = parse_state_changed(&frame, Some(SUBSCRIBE_ID)) {
            dispatch(&self.name, &delta, self.handler.as_ref());
        }
    }
}

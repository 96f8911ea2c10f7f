use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use itertools::Itertools;
use serde::Deserialize;
use serde_json::{Map, Value};

use lightcolor::hsv::rgb_to_hs;
use lightcolor::kelvin;

use crate::backend::hass::client::HassClient;
use crate::error::ApiResult;
use crate::model::attributes::{self, get_str, get_u8, get_u32};
use crate::model::capabilities::{CoverFeatures, LightCapabilities};
use crate::model::state::{ColorTempState, CoverState, EntityState, HsbState};

/// Domains the surface can drive.
pub const SUPPORTED_DOMAINS: &[&str] = &["light", "switch", "cover", "script"];

pub const UNASSIGNED_AREA: &str = "unassigned";

#[must_use]
pub fn entity_domain(entity_id: &str) -> &str {
    entity_id.split_once('.').map_or("", |(domain, _)| domain)
}

#[must_use]
pub fn is_supported_entity(entity_id: &str) -> bool {
    SUPPORTED_DOMAINS.contains(&entity_domain(entity_id))
}

#[derive(Clone, Debug, Deserialize)]
pub struct HassState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl HassState {
    #[must_use]
    pub fn domain(&self) -> &str {
        entity_domain(&self.entity_id)
    }

    #[must_use]
    pub fn friendly_name(&self) -> &str {
        get_str(&self.attributes, "friendly_name").unwrap_or(&self.entity_id)
    }
}

/// Parse a `get_states` result, skipping malformed entries.
#[must_use]
pub fn parse_states(result: Value) -> Vec<HassState> {
    let Value::Array(items) = result else {
        log::warn!("get_states returned a non-array result");
        return vec![];
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<HassState>(item) {
            Ok(state) => Some(state),
            Err(err) => {
                log::debug!("Skipping malformed state entry: {err}");
                None
            }
        })
        .collect()
}

fn color_temp_state(attrs: &Map<String, Value>) -> ColorTempState {
    let to_mired = |k: u32| kelvin::kelvin_to_mired_rounded(f64::from(k));

    let min = get_u32(attrs, "min_mireds")
        .or_else(|| get_u32(attrs, "max_color_temp_kelvin").map(to_mired))
        .unwrap_or(ColorTempState::DEFAULT_MIN);
    let max = get_u32(attrs, "max_mireds")
        .or_else(|| get_u32(attrs, "min_color_temp_kelvin").map(to_mired))
        .unwrap_or(ColorTempState::DEFAULT_MAX);

    let default = ColorTempState::default();
    let current = get_u32(attrs, "color_temp")
        .or_else(|| get_u32(attrs, "color_temp_kelvin").map(to_mired))
        .unwrap_or(default.current);

    ColorTempState::new(min, max, current)
}

fn hsb_state(attrs: &Map<String, Value>) -> HsbState {
    let brightness = get_u8(attrs, "brightness").unwrap_or(HsbState::default().brightness);

    let hs = attrs
        .get("hs_color")
        .and_then(attributes::parse_hs_color)
        .or_else(|| {
            attrs
                .get("rgb_color")
                .and_then(attributes::parse_rgb_color)
                .map(rgb_to_hs)
        })
        .or_else(|| {
            attrs
                .get("xy_color")
                .and_then(attributes::parse_xy_color)
                .map(|xy| rgb_to_hs(xy.to_rgb(255)))
        });

    match hs {
        Some(hs) => HsbState::new(hs.hue, hs.saturation, brightness),
        None => HsbState {
            brightness,
            ..HsbState::default()
        },
    }
}

/// Normalise one hub state record. `None` for domains we do not drive.
#[must_use]
pub fn entity_from_state(state: &HassState) -> Option<EntityState> {
    let domain = state.domain();
    if !SUPPORTED_DOMAINS.contains(&domain) {
        return None;
    }
    let attrs = &state.attributes;

    let mut entity = EntityState::new(&state.entity_id);
    match domain {
        "light" => {
            entity.on = state.state == "on";
            entity.capabilities = LightCapabilities::from_attributes(attrs);
            entity.hsb = hsb_state(attrs);
            entity.color_temp = color_temp_state(attrs);
        }
        "cover" => {
            entity.on = !matches!(state.state.as_str(), "closed" | "unavailable" | "unknown");
            entity.cover = Some(CoverState {
                position: get_u8(attrs, "current_position").map(|p| p.min(100)),
                tilt: get_u8(attrs, "current_tilt_position").map(|p| p.min(100)),
                state: Some(state.state.clone()),
                features: CoverFeatures::from_attributes(attrs),
            });
        }
        _ => entity.on = state.state == "on",
    }
    Some(entity)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeviceEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    name_by_user: Option<String>,
    #[serde(default)]
    manufacturer: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    area_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EntityEntry {
    entity_id: String,
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    area_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AreaEntry {
    area_id: String,
    name: String,
}

fn parse_list<T: for<'de> Deserialize<'de>>(value: Value, what: &str) -> Vec<T> {
    let Value::Array(items) = value else {
        log::warn!("{what} registry is not a list");
        return vec![];
    };
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

/// Entities of one display group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AreaGroup {
    /// `None` for the synthetic unassigned bucket
    pub area_id: Option<String>,
    pub name: String,
    pub entity_ids: Vec<String>,
}

/// Registry lookup tables, used only to place entities in areas.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    devices: BTreeMap<String, DeviceInfo>,
    device_area: BTreeMap<String, String>,
    entity_device: BTreeMap<String, String>,
    entity_area: BTreeMap<String, String>,
    area_names: BTreeMap<String, String>,
}

impl Registry {
    /// Build from the `config/{device,entity,area}_registry/list` results.
    #[must_use]
    pub fn from_lists(devices: Value, entities: Value, areas: Value) -> Self {
        let mut reg = Self::default();

        for dev in parse_list::<DeviceEntry>(devices, "device") {
            if let Some(area) = dev.area_id.filter(|a| !a.is_empty()) {
                reg.device_area.insert(dev.id.clone(), area);
            }
            let name = dev
                .name_by_user
                .or(dev.name)
                .unwrap_or_else(|| dev.id.clone());
            reg.devices.insert(
                dev.id,
                DeviceInfo {
                    name,
                    manufacturer: dev.manufacturer,
                    model: dev.model,
                },
            );
        }

        for ent in parse_list::<EntityEntry>(entities, "entity") {
            if let Some(device) = ent.device_id.filter(|d| !d.is_empty()) {
                reg.entity_device.insert(ent.entity_id.clone(), device);
            }
            if let Some(area) = ent.area_id.filter(|a| !a.is_empty()) {
                reg.entity_area.insert(ent.entity_id, area);
            }
        }

        for area in parse_list::<AreaEntry>(areas, "area") {
            reg.area_names.insert(area.area_id, area.name);
        }

        reg
    }

    #[must_use]
    pub fn device_of(&self, entity_id: &str) -> Option<&DeviceInfo> {
        self.devices.get(self.entity_device.get(entity_id)?)
    }

    /// Resolved area id: the entity's own area wins over its device's. Areas
    /// missing from the area registry do not resolve, so a stale entity area
    /// falls through to the device area.
    #[must_use]
    pub fn area_of(&self, entity_id: &str) -> Option<&str> {
        let known = |area: &&String| self.area_names.contains_key(area.as_str());
        self.entity_area
            .get(entity_id)
            .filter(known)
            .or_else(|| {
                self.entity_device
                    .get(entity_id)
                    .and_then(|dev| self.device_area.get(dev))
                    .filter(known)
            })
            .map(String::as_str)
    }

    #[must_use]
    pub fn area_name(&self, area_id: &str) -> Option<&str> {
        self.area_names.get(area_id).map(String::as_str)
    }

    /// Group entities by area, sorted by area name, with the unassigned
    /// bucket last. Entity ids are sorted within each group.
    #[must_use]
    pub fn group_by_area<'a>(&self, entity_ids: impl IntoIterator<Item = &'a str>) -> Vec<AreaGroup> {
        let grouped = entity_ids
            .into_iter()
            .map(|id| (self.area_of(id).map(ToString::to_string), id.to_string()))
            .into_group_map();

        grouped
            .into_iter()
            .map(|(area_id, ids)| {
                let name = area_id
                    .as_deref()
                    .and_then(|a| self.area_name(a))
                    .unwrap_or(UNASSIGNED_AREA)
                    .to_string();
                AreaGroup {
                    area_id,
                    name,
                    entity_ids: ids.into_iter().sorted().dedup().collect(),
                }
            })
            .sorted_by(|a, b| {
                (a.area_id.is_none(), &a.name, &a.area_id)
                    .cmp(&(b.area_id.is_none(), &b.name, &b.area_id))
            })
            .collect()
    }
}

/// Which `domain.service` actions the hub offers.
#[derive(Clone, Debug, Default)]
pub struct ServiceCatalog {
    services: BTreeMap<String, BTreeSet<String>>,
}

impl ServiceCatalog {
    /// Parse a `get_services` result (`{domain: {service: {..}}}`).
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let services = value
            .as_object()
            .map(|domains| {
                domains
                    .iter()
                    .map(|(domain, services)| {
                        let names = services
                            .as_object()
                            .map(|s| s.keys().cloned().collect())
                            .unwrap_or_default();
                        (domain.clone(), names)
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { services }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    #[must_use]
    pub fn has(&self, domain: &str, service: &str) -> bool {
        self.services
            .get(domain)
            .is_some_and(|s| s.contains(service))
    }
}

/// Everything a refresh fetches in one go.
#[derive(Clone, Debug, Default)]
pub struct HubSnapshot {
    pub states: Vec<HassState>,
    pub registry: Registry,
    pub services: ServiceCatalog,
}

impl HubSnapshot {
    /// Normalised records for every supported entity.
    #[must_use]
    pub fn entities(&self) -> Vec<EntityState> {
        self.states.iter().filter_map(entity_from_state).collect()
    }

    /// Fetch states, registries and the service catalog concurrently.
    ///
    /// Only the state fetch is mandatory. Registries and services need admin
    /// rights on some installs, so their failures degrade to empty tables.
    pub async fn fetch(client: &HassClient, timeout: Duration) -> ApiResult<Self> {
        let optional = |res: ApiResult<Value>, what: &str| {
            res.unwrap_or_else(|err| {
                log::warn!("[{}] Could not fetch {what}: {err}", client.name());
                Value::Null
            })
        };

        let (states, devices, entities, areas, services) = futures::join!(
            client.request("get_states", timeout),
            client.request("config/device_registry/list", timeout),
            client.request("config/entity_registry/list", timeout),
            client.request("config/area_registry/list", timeout),
            client.request("get_services", timeout),
        );

        let states = parse_states(states?);
        let registry = Registry::from_lists(
            optional(devices, "device registry"),
            optional(entities, "entity registry"),
            optional(areas, "area registry"),
        );
        let services = ServiceCatalog::from_value(&optional(services, "service catalog"));

        Ok(Self {
            states,
            registry,
            services,
        })
    }
}

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use hassdeck_api::event::LightEvent;
use lightcolor::hsv::rgb_to_hs;
use lightcolor::{clamp_percent, kelvin, wrap_hue};

use crate::error::{ApiError, ApiResult};
use crate::model::capabilities::{CoverFeatures, LightCapabilities};

/// Cached hue (degrees), saturation (percent) and brightness (0-255).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HsbState {
    pub hue: f64,
    pub saturation: f64,
    pub brightness: u8,
}

impl HsbState {
    #[must_use]
    pub fn new(hue: f64, saturation: f64, brightness: u8) -> Self {
        Self {
            hue: wrap_hue(hue),
            saturation: clamp_percent(saturation),
            brightness,
        }
    }
}

impl Default for HsbState {
    fn default() -> Self {
        Self {
            hue: 0.0,
            saturation: 0.0,
            brightness: 255,
        }
    }
}

/// Color temperature bounds and current value, all in mireds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorTempState {
    pub min: u32,
    pub max: u32,
    pub current: u32,
}

impl ColorTempState {
    pub const DEFAULT_MIN: u32 = 153;
    pub const DEFAULT_MAX: u32 = 500;

    /// Normalised range: bounds ordered and at least 1, current clamped.
    #[must_use]
    pub fn new(min: u32, max: u32, current: u32) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        let min = min.max(1);
        let max = max.max(min);
        Self {
            min,
            max,
            current: current.clamp(min, max),
        }
    }

    #[must_use]
    pub fn with_range(self, min: u32, max: u32) -> Self {
        Self::new(min, max, self.current)
    }

    #[must_use]
    pub fn with_current(self, current: u32) -> Self {
        Self::new(self.min, self.max, current)
    }

    #[must_use]
    pub fn kelvin(&self) -> u32 {
        kelvin::mired_to_kelvin_rounded(f64::from(self.current))
    }
}

impl Default for ColorTempState {
    fn default() -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let warm = kelvin::WARM_WHITE_MIRED.round() as u32;
        Self::new(Self::DEFAULT_MIN, Self::DEFAULT_MAX, warm)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverState {
    pub position: Option<u8>,
    pub tilt: Option<u8>,
    pub state: Option<String>,
    pub features: CoverFeatures,
}

/// One controllable entity, as cached locally.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub on: bool,
    pub hsb: HsbState,
    pub color_temp: ColorTempState,
    pub capabilities: LightCapabilities,
    pub cover: Option<CoverState>,
}

impl EntityState {
    #[must_use]
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            on: false,
            hsb: HsbState::default(),
            color_temp: ColorTempState::default(),
            capabilities: LightCapabilities::ONOFF_ONLY,
            cover: None,
        }
    }

    /// Same entity with every value forced into its valid range.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.hsb = HsbState::new(self.hsb.hue, self.hsb.saturation, self.hsb.brightness);
        self.color_temp =
            ColorTempState::new(self.color_temp.min, self.color_temp.max, self.color_temp.current);
        if let Some(cover) = &mut self.cover {
            cover.position = cover.position.map(|p| p.min(100));
            cover.tilt = cover.tilt.map(|t| t.min(100));
        }
        self
    }

    #[must_use]
    pub const fn effective_brightness(&self) -> u8 {
        if self.on { self.hsb.brightness } else { 0 }
    }

    fn cover_mut(&mut self) -> &mut CoverState {
        self.cover.get_or_insert_with(CoverState::default)
    }

    /// Merge one pushed notification. Returns true if anything changed.
    fn apply_event(&mut self, event: &LightEvent) -> bool {
        let before = self.clone();
        match event {
            LightEvent::Power { on, .. } => self.on = *on,
            LightEvent::Brightness { brightness, .. } => self.hsb.brightness = *brightness,
            LightEvent::ColorTemp {
                mired,
                kelvin: kel,
                min_mired,
                max_mired,
                ..
            } => {
                let min = min_mired.unwrap_or(self.color_temp.min);
                let max = max_mired.unwrap_or(self.color_temp.max);
                self.color_temp = self.color_temp.with_range(min, max);
                let current =
                    mired.or_else(|| kel.map(|k| kelvin::kelvin_to_mired_rounded(f64::from(k))));
                if let Some(current) = current {
                    self.color_temp = self.color_temp.with_current(current);
                }
            }
            LightEvent::HsColor { hs, .. } => {
                self.hsb = HsbState::new(hs.hue, hs.saturation, self.hsb.brightness);
            }
            LightEvent::Rgb { rgb, .. } => {
                let hs = rgb_to_hs(*rgb);
                self.hsb = HsbState::new(hs.hue, hs.saturation, self.hsb.brightness);
            }
            LightEvent::Xy { xy, .. } => {
                // chroma only, brightness is tracked separately
                let hs = rgb_to_hs(xy.to_rgb(255));
                self.hsb = HsbState::new(hs.hue, hs.saturation, self.hsb.brightness);
            }
            LightEvent::CoverPosition { position, .. } => {
                self.cover_mut().position = Some((*position).min(100));
            }
            LightEvent::CoverTilt { tilt, .. } => {
                self.cover_mut().tilt = Some((*tilt).min(100));
            }
            LightEvent::CoverState { state, .. } => {
                self.cover_mut().state = Some(state.clone());
            }
            LightEvent::ScriptRunning { running, .. } => self.on = *running,
        }
        *self != before
    }
}

type Slot = Arc<Mutex<EntityState>>;

fn lock_slot(slot: &Slot) -> MutexGuard<'_, EntityState> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Authoritative in-memory cache of entity state.
///
/// Written from three directions: batch refreshes, pushed events and
/// optimistic local edits. Each entity sits behind its own lock, and the id
/// map behind a read-write lock, so a reader never sees a half-applied
/// update and removal is atomic.
#[derive(Default)]
pub struct LightStateManager {
    entities: RwLock<HashMap<String, Slot>>,
}

impl LightStateManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, entity_id: &str) -> Option<Slot> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_id)
            .cloned()
    }

    fn slot_or_insert(&self, entity_id: &str) -> Slot {
        if let Some(slot) = self.slot(entity_id) {
            return slot;
        }
        self.entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(entity_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(EntityState::new(entity_id))))
            .clone()
    }

    fn with_entity<T>(
        &self,
        entity_id: &str,
        func: impl FnOnce(&mut EntityState) -> T,
    ) -> ApiResult<T> {
        let slot = self
            .slot(entity_id)
            .ok_or_else(|| ApiError::UnknownEntity(entity_id.to_string()))?;
        let mut state = lock_slot(&slot);
        Ok(func(&mut state))
    }

    /// Load a fetched batch.
    ///
    /// Capabilities, on/off and cover data are replaced outright. Cached
    /// color and brightness of already-known entities are kept (they may hold
    /// a user adjustment that the hub has not reported back yet); only the
    /// color temperature bounds are refreshed. New entities are seeded from
    /// the batch. Returns the ids seen for the first time.
    pub fn initialize_states(&self, batch: impl IntoIterator<Item = EntityState>) -> Vec<String> {
        let mut added = vec![];
        let mut map = self.entities.write().unwrap_or_else(PoisonError::into_inner);

        for fresh in batch {
            if let Some(slot) = map.get(&fresh.entity_id) {
                let mut state = lock_slot(slot);
                state.on = fresh.on;
                state.capabilities = fresh.capabilities;
                state.cover = fresh.cover.map(|cover| CoverState {
                    position: cover.position.map(|p| p.min(100)),
                    tilt: cover.tilt.map(|t| t.min(100)),
                    ..cover
                });
                state.color_temp = state
                    .color_temp
                    .with_range(fresh.color_temp.min, fresh.color_temp.max);
            } else {
                added.push(fresh.entity_id.clone());
                map.insert(
                    fresh.entity_id.clone(),
                    Arc::new(Mutex::new(fresh.normalized())),
                );
            }
        }
        drop(map);

        added
    }

    /// Drop every entity not in `keep`. Returns the removed ids.
    pub fn retain_only(&self, keep: &BTreeSet<String>) -> Vec<String> {
        let mut map = self.entities.write().unwrap_or_else(PoisonError::into_inner);
        let removed = map
            .keys()
            .filter(|id| !keep.contains(*id))
            .cloned()
            .collect::<Vec<_>>();
        for id in &removed {
            map.remove(id);
        }
        removed
    }

    pub fn remove_entity(&self, entity_id: &str) -> bool {
        self.entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(entity_id)
            .is_some()
    }

    /// Merge a pushed event, creating the entity if it was never seen.
    pub fn apply_event(&self, event: &LightEvent) -> bool {
        let slot = self.slot_or_insert(event.entity_id());
        let mut state = lock_slot(&slot);
        state.apply_event(event)
    }

    pub fn update_hs_color(&self, entity_id: &str, hue: f64, saturation: f64) -> ApiResult<HsbState> {
        self.with_entity(entity_id, |state| {
            state.hsb = HsbState::new(hue, saturation, state.hsb.brightness);
            state.hsb
        })
    }

    /// Set the current color temperature (mireds), clamped to the entity's
    /// bounds. Returns the stored value.
    pub fn update_color_temp(&self, entity_id: &str, mired: u32) -> ApiResult<u32> {
        self.with_entity(entity_id, |state| {
            state.color_temp = state.color_temp.with_current(mired);
            state.color_temp.current
        })
    }

    /// Store a brightness, clamped to 0-255. Returns the stored value.
    pub fn set_cached_brightness(&self, entity_id: &str, brightness: i32) -> ApiResult<u8> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let brightness = brightness.clamp(0, 255) as u8;
        self.with_entity(entity_id, |state| {
            state.hsb.brightness = brightness;
            brightness
        })
    }

    pub fn set_on(&self, entity_id: &str, on: bool) -> ApiResult<()> {
        self.with_entity(entity_id, |state| state.on = on)
    }

    pub fn set_cover_position(&self, entity_id: &str, position: u8) -> ApiResult<()> {
        self.with_entity(entity_id, |state| {
            state.cover_mut().position = Some(position.min(100));
        })
    }

    pub fn set_cover_tilt(&self, entity_id: &str, tilt: u8) -> ApiResult<()> {
        self.with_entity(entity_id, |state| {
            state.cover_mut().tilt = Some(tilt.min(100));
        })
    }

    /// Brightness to display: 0 whenever the entity is off or unknown.
    #[must_use]
    pub fn get_effective_brightness(&self, entity_id: &str) -> u8 {
        self.with_entity(entity_id, |state| state.effective_brightness())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<EntityState> {
        self.with_entity(entity_id, |state| state.clone()).ok()
    }

    #[must_use]
    pub fn hsb(&self, entity_id: &str) -> Option<HsbState> {
        self.with_entity(entity_id, |state| state.hsb).ok()
    }

    #[must_use]
    pub fn color_temp(&self, entity_id: &str) -> Option<ColorTempState> {
        self.with_entity(entity_id, |state| state.color_temp).ok()
    }

    #[must_use]
    pub fn capabilities(&self, entity_id: &str) -> Option<LightCapabilities> {
        self.with_entity(entity_id, |state| state.capabilities).ok()
    }

    #[must_use]
    pub fn is_on(&self, entity_id: &str) -> bool {
        self.with_entity(entity_id, |state| state.on).unwrap_or(false)
    }

    #[must_use]
    pub fn contains(&self, entity_id: &str) -> bool {
        self.slot(entity_id).is_some()
    }

    #[must_use]
    pub fn entity_ids(&self) -> BTreeSet<String> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

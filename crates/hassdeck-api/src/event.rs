use serde::{Deserialize, Serialize};

use lightcolor::{Hs, Rgb, XY};

/// Typed change notification raised by the event listener.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LightEvent {
    Power {
        entity_id: String,
        on: bool,
    },
    Brightness {
        entity_id: String,
        brightness: u8,
    },
    ColorTemp {
        entity_id: String,
        mired: Option<u32>,
        kelvin: Option<u32>,
        min_mired: Option<u32>,
        max_mired: Option<u32>,
    },
    HsColor {
        entity_id: String,
        hs: Hs,
    },
    Rgb {
        entity_id: String,
        rgb: Rgb,
    },
    Xy {
        entity_id: String,
        xy: XY,
    },
    CoverPosition {
        entity_id: String,
        position: u8,
    },
    CoverTilt {
        entity_id: String,
        tilt: u8,
    },
    CoverState {
        entity_id: String,
        state: String,
    },
    ScriptRunning {
        entity_id: String,
        running: bool,
    },
}

impl LightEvent {
    #[must_use]
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Power { entity_id, .. }
            | Self::Brightness { entity_id, .. }
            | Self::ColorTemp { entity_id, .. }
            | Self::HsColor { entity_id, .. }
            | Self::Rgb { entity_id, .. }
            | Self::Xy { entity_id, .. }
            | Self::CoverPosition { entity_id, .. }
            | Self::CoverTilt { entity_id, .. }
            | Self::CoverState { entity_id, .. }
            | Self::ScriptRunning { entity_id, .. } => entity_id,
        }
    }
}

/// Connection health, as published on the session health bus.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    AuthFailed(String),
    Degraded(String),
}

impl HealthStatus {
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Refresh signal for the surface layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    EntityChanged(String),
    EntityRemoved(String),
    EntitiesReloaded,
}

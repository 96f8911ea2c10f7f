use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct HassServer {
    pub url: Url,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_env: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct TimeoutConfig {
    pub connect_ms: u64,
    pub request_ms: u64,
    pub health_grace_ms: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct DebounceConfig {
    pub brightness_ms: u64,
    pub hs_color_ms: u64,
    pub color_temp_ms: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct RefreshConfig {
    pub interval_secs: u64,
    pub reconnect_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    pub hass: HassServer,
    pub timeouts: TimeoutConfig,
    pub debounce: DebounceConfig,
    pub refresh: RefreshConfig,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 10_000,
            request_ms: 10_000,
            health_grace_ms: 250,
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    #[must_use]
    pub const fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    #[must_use]
    pub const fn health_grace(&self) -> Duration {
        Duration::from_millis(self.health_grace_ms)
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            brightness_ms: 150,
            hs_color_ms: 200,
            color_temp_ms: 200,
        }
    }
}

impl DebounceConfig {
    #[must_use]
    pub const fn brightness(&self) -> Duration {
        Duration::from_millis(self.brightness_ms)
    }

    #[must_use]
    pub const fn hs_color(&self) -> Duration {
        Duration::from_millis(self.hs_color_ms)
    }

    #[must_use]
    pub const fn color_temp(&self) -> Duration {
        Duration::from_millis(self.color_temp_ms)
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            reconnect_secs: 5,
        }
    }
}

impl RefreshConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub const fn reconnect(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }
}

impl HassServer {
    pub const DEFAULT_TOKEN_ENV: &'static str = "HASS_TOKEN";

    #[must_use]
    pub fn token_env_name(&self) -> &str {
        self.token_env
            .as_deref()
            .unwrap_or(Self::DEFAULT_TOKEN_ENV)
    }

    /// Websocket endpoint for the configured hub.
    ///
    /// Home Assistant serves the websocket api on `/api/websocket`, and users
    /// usually paste the frontend url (`http://host:8123`). Map the scheme to
    /// ws/wss and append the path if it is missing.
    #[must_use]
    pub fn get_ws_url(&self) -> Url {
        let mut url = self.url.clone();
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        // http(s) <-> ws(s) are all "special" schemes, so this cannot fail
        let _ = url.set_scheme(scheme);

        if !url.path().ends_with("/api/websocket") {
            if let Ok(mut path) = url.path_segments_mut() {
                path.pop_if_empty().push("api").push("websocket");
            }
        }

        url
    }
}

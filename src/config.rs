use camino::Utf8Path;
use config::{Config, ConfigError};

pub use hassdeck_api::config::*;

pub fn parse(filename: &Utf8Path) -> Result<AppConfig, ConfigError> {
    let settings = Config::builder()
        .set_default("timeouts.connect_ms", 10_000)?
        .set_default("timeouts.request_ms", 10_000)?
        .set_default("timeouts.health_grace_ms", 250)?
        .set_default("debounce.brightness_ms", 150)?
        .set_default("debounce.hs_color_ms", 200)?
        .set_default("debounce.color_temp_ms", 200)?
        .set_default("refresh.interval_secs", 300)?
        .set_default("refresh.reconnect_secs", 5)?
        .add_source(config::File::with_name(filename.as_str()))
        .build()?;

    settings.try_deserialize()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use camino::Utf8PathBuf;

    use crate::config::{AppConfig, DebounceConfig, RefreshConfig, TimeoutConfig, parse};

    fn write_config(name: &str, body: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::try_from(std::env::temp_dir())
            .unwrap()
            .join(format!("hassdeck-{}-{name}.yaml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let path = write_config("minimal", "hass:\n  url: http://hass.local:8123\n");
        let config: AppConfig = parse(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.hass.url.as_str(), "http://hass.local:8123/");
        assert_eq!(config.hass.token_env_name(), "HASS_TOKEN");
        assert_eq!(config.timeouts, TimeoutConfig::default());
        assert_eq!(config.debounce, DebounceConfig::default());
        assert_eq!(config.refresh, RefreshConfig::default());
        assert_eq!(
            config.hass.get_ws_url().as_str(),
            "ws://hass.local:8123/api/websocket"
        );
    }

    #[test]
    fn overrides_are_applied() {
        let path = write_config(
            "override",
            "hass:\n  url: wss://example.org/api/websocket\n  token_env: MY_TOKEN\n\
             debounce:\n  brightness_ms: 50\nrefresh:\n  interval_secs: 0\n",
        );
        let config = parse(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.hass.token_env_name(), "MY_TOKEN");
        assert_eq!(config.debounce.brightness_ms, 50);
        assert_eq!(config.debounce.hs_color_ms, 200);
        assert_eq!(config.refresh.interval_secs, 0);
    }

    #[test]
    fn missing_url_is_an_error() {
        let path = write_config("nourl", "timeouts:\n  connect_ms: 5\n");
        let res = parse(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(res.is_err());
    }
}

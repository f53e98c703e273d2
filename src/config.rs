use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Configs {
    pub http: HttpConfig,
    pub websocket: WebsocketConfig,
    pub mqtt: MqttDefaults,

    /// How long regular readings may sit in a buffer before the next append
    /// forces a flush. The first reading after a (re)connect always flushes.
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
}

impl Configs {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let config_content = fs::read_to_string(&path)?;
        Self::parse(&config_content)
    }

    fn parse(content: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let configs: Configs = toml::from_str(content)?;
        // rumqttc rejects keep-alive intervals under five seconds.
        if configs.mqtt.keep_alive < 5 {
            return Err(format!(
                "mqtt.keep_alive must be at least 5 seconds, got {}",
                configs.mqtt.keep_alive
            )
            .into());
        }
        Ok(configs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpConfig {
    pub server: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebsocketConfig {
    pub server: String,
}

/// Connection defaults shared by every gateway. Host, port, protocol and
/// topic come from each gateway configuration document instead.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttDefaults {
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ca_cert: Option<String>,
}

fn default_keep_alive() -> u16 {
    30
}

fn default_flush_interval() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[http]
server = "127.0.0.1:8080"

[websocket]
server = "127.0.0.1:8081"

[mqtt]
"#;

    #[test]
    fn defaults_apply_when_optional_fields_are_missing() {
        let configs = Configs::parse(BASE).unwrap();
        assert_eq!(configs.mqtt.keep_alive, 30);
        assert_eq!(configs.flush_interval_secs, 30);
        assert!(configs.mqtt.username.is_none());
    }

    #[test]
    fn sub_five_second_keep_alive_is_rejected() {
        let content = format!("{}keep_alive = 2\n", BASE);
        let err = Configs::parse(&content).unwrap_err();
        assert!(err.to_string().contains("keep_alive"));
    }

    #[test]
    fn five_second_keep_alive_is_accepted() {
        let content = format!("{}keep_alive = 5\n", BASE);
        assert_eq!(Configs::parse(&content).unwrap().mqtt.keep_alive, 5);
    }
}

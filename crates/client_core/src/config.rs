use std::{fs, path::Path, time::Duration};

use anyhow::{anyhow, Context, Result};
use tracing::warn;
use url::Url;

use crate::subscriber::AckPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_url: String,
    pub ws_url: Option<String>,
    pub request_timeout_secs: u64,
    pub reconnect_delay_ms: u64,
    pub reconnect_attempts: u32,
    pub ack_policy: AckPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:3000".into(),
            ws_url: None,
            request_timeout_secs: 10,
            reconnect_delay_ms: 1000,
            reconnect_attempts: 5,
            ack_policy: AckPolicy::default(),
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Room channel endpoint; derived from the API url unless `ws_url` is set.
    pub fn room_socket_url(&self) -> Result<Url> {
        let base = match &self.ws_url {
            Some(ws_url) => ws_url.clone(),
            None if self.api_url.starts_with("https://") => {
                self.api_url.replacen("https://", "wss://", 1)
            }
            None if self.api_url.starts_with("http://") => {
                self.api_url.replacen("http://", "ws://", 1)
            }
            None => return Err(anyhow!("api_url must start with http:// or https://")),
        };
        let raw = format!("{}/room", base.trim_end_matches('/'));
        Url::parse(&raw).with_context(|| format!("invalid room socket url: {raw}"))
    }
}

/// Defaults, then `client.toml` in the working directory, then environment.
pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(DEFAULT_CONFIG_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    config_path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(config_path) {
        match toml::from_str::<toml::Table>(&raw) {
            Ok(table) => {
                for (key, value) in &table {
                    let value = value
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| value.to_string());
                    apply(&mut settings, key, &value);
                }
            }
            Err(err) => warn!(path = %config_path.display(), "config: ignoring unreadable file: {err}"),
        }
    }

    let overrides = [
        ("CHAT_API_URL", "api_url"),
        ("APP__API_URL", "api_url"),
        ("CHAT_WS_URL", "ws_url"),
        ("APP__WS_URL", "ws_url"),
        ("APP__REQUEST_TIMEOUT_SECS", "request_timeout_secs"),
        ("APP__RECONNECT_DELAY_MS", "reconnect_delay_ms"),
        ("APP__RECONNECT_ATTEMPTS", "reconnect_attempts"),
        ("APP__ACK_POLICY", "ack_policy"),
    ];
    for (var, key) in overrides {
        if let Some(value) = env(var) {
            apply(&mut settings, key, &value);
        }
    }

    settings
}

fn apply(settings: &mut ClientSettings, key: &str, value: &str) {
    match key {
        "api_url" => settings.api_url = value.to_string(),
        "ws_url" => settings.ws_url = Some(value.to_string()),
        "request_timeout_secs" => parse_into(&mut settings.request_timeout_secs, key, value),
        "reconnect_delay_ms" => parse_into(&mut settings.reconnect_delay_ms, key, value),
        "reconnect_attempts" => parse_into(&mut settings.reconnect_attempts, key, value),
        "ack_policy" => match value.parse::<AckPolicy>() {
            Ok(policy) => settings.ack_policy = policy,
            Err(err) => warn!("config: {err}"),
        },
        other => warn!(key = other, "config: unknown setting ignored"),
    }
}

fn parse_into<T: std::str::FromStr>(slot: &mut T, key: &str, value: &str) {
    match value.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(key, value, "config: invalid value ignored"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

use std::{fs, path::Path, str::FromStr};

use anyhow::{anyhow, Context};
use peer_media::{PeerConnectionConfig, DEFAULT_ICE_SERVER};
use serde::Deserialize;
use shared::domain::UserId;
use tracing::warn;
use url::Url;

use crate::session::SessionContext;

pub const SETTINGS_FILE: &str = "chat_client.toml";

/// What to do with optimistic messages when the server reports a send error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendFailurePolicy {
    /// Leave pending messages in place; the failure is only reported.
    #[default]
    KeepPending,
    /// Drop every pending message of the open conversation.
    RetractAll,
}

impl FromStr for SendFailurePolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keep_pending" | "keep" => Ok(Self::KeepPending),
            "retract_all" | "retract" => Ok(Self::RetractAll),
            other => Err(anyhow!("unknown send failure policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_url: String,
    pub ws_url: String,
    pub access_token: Option<String>,
    pub user_id: Option<String>,
    pub ice_servers: Vec<String>,
    pub send_failure_policy: SendFailurePolicy,
    pub event_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:3000".into(),
            ws_url: "ws://127.0.0.1:3000/chat".into(),
            access_token: None,
            user_id: None,
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            send_failure_policy: SendFailurePolicy::KeepPending,
            event_buffer: 1024,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_url: Option<String>,
    ws_url: Option<String>,
    access_token: Option<String>,
    user_id: Option<String>,
    ice_servers: Option<Vec<String>>,
    send_failure_policy: Option<SendFailurePolicy>,
    event_buffer: Option<usize>,
}

impl Settings {
    pub fn session(&self) -> anyhow::Result<SessionContext> {
        let access_token = self
            .access_token
            .clone()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| anyhow!("missing access token (set CHAT_ACCESS_TOKEN)"))?;
        let user_id = self
            .user_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| anyhow!("missing user id (set CHAT_USER_ID)"))?;
        let api_base_url = Url::parse(&self.api_url)
            .with_context(|| format!("invalid api url '{}'", self.api_url))?;
        let ws_url =
            Url::parse(&self.ws_url).with_context(|| format!("invalid ws url '{}'", self.ws_url))?;
        if !matches!(ws_url.scheme(), "ws" | "wss") {
            return Err(anyhow!("ws url must start with ws:// or wss://"));
        }

        Ok(SessionContext::new(
            UserId::new(user_id),
            access_token,
            api_base_url,
            ws_url,
        ))
    }

    pub fn peer_connection_config(&self) -> PeerConnectionConfig {
        PeerConnectionConfig {
            ice_servers: self.ice_servers.clone(),
        }
    }
}

pub fn load_settings() -> Settings {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// File values override defaults; environment values override the file.
pub fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file_settings(&mut settings, file_cfg),
            Err(err) => warn!(path = %path.display(), "config: ignoring unreadable settings file: {err}"),
        }
    }

    if let Some(v) = last_present(&env, &["CHAT_API_URL", "APP__API_URL"]) {
        settings.api_url = v;
    }
    if let Some(v) = last_present(&env, &["CHAT_WS_URL", "APP__WS_URL"]) {
        settings.ws_url = v;
    }
    if let Some(v) = last_present(&env, &["CHAT_ACCESS_TOKEN", "APP__ACCESS_TOKEN"]) {
        settings.access_token = Some(v);
    }
    if let Some(v) = last_present(&env, &["CHAT_USER_ID", "APP__USER_ID"]) {
        settings.user_id = Some(v);
    }
    if let Some(v) = env("APP__ICE_SERVERS") {
        let servers: Vec<String> = v
            .split(',')
            .map(str::trim)
            .filter(|server| !server.is_empty())
            .map(str::to_string)
            .collect();
        if !servers.is_empty() {
            settings.ice_servers = servers;
        }
    }
    if let Some(v) = env("APP__SEND_FAILURE_POLICY") {
        match v.parse() {
            Ok(policy) => settings.send_failure_policy = policy,
            Err(err) => warn!("config: {err}"),
        }
    }
    if let Some(v) = env("APP__EVENT_BUFFER") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.event_buffer = parsed.max(1);
        }
    }

    settings
}

fn apply_file_settings(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.api_url {
        settings.api_url = v;
    }
    if let Some(v) = file_cfg.ws_url {
        settings.ws_url = v;
    }
    if let Some(v) = file_cfg.access_token {
        settings.access_token = Some(v);
    }
    if let Some(v) = file_cfg.user_id {
        settings.user_id = Some(v);
    }
    if let Some(v) = file_cfg.ice_servers {
        settings.ice_servers = v;
    }
    if let Some(v) = file_cfg.send_failure_policy {
        settings.send_failure_policy = v;
    }
    if let Some(v) = file_cfg.event_buffer {
        settings.event_buffer = v.max(1);
    }
}

fn last_present(env: &impl Fn(&str) -> Option<String>, keys: &[&str]) -> Option<String> {
    keys.iter().copied().filter_map(|key| env(key)).last()
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

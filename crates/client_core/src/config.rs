use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use url::Url;

use crate::error::SettingsError;

pub const DEFAULT_SETTINGS_FILE: &str = "chat_client.toml";

const DEFAULT_GREETING: &str = "Hello! I can answer questions about the city's public datasets. \
Everything I report comes from the official open-data portal.";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub require_api_key: bool,
    pub connect_timeout_secs: u64,
    pub greeting: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            api_key: None,
            require_api_key: true,
            connect_timeout_secs: 10,
            greeting: DEFAULT_GREETING.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    base_url: Option<String>,
    api_key: Option<String>,
    require_api_key: Option<bool>,
    connect_timeout_secs: Option<u64>,
    greeting: Option<String>,
}

/// Defaults, then the settings file, then the process environment.
///
/// With `path == None` the default file is optional; an explicit path must
/// exist.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, SettingsError> {
    let mut settings = Settings::default();

    let (path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_SETTINGS_FILE), false),
    };
    match fs::read_to_string(&path) {
        Ok(raw) => apply_file_settings(&mut settings, &raw, &path)?,
        Err(err) if err.kind() == io::ErrorKind::NotFound && !required => {}
        Err(source) => return Err(SettingsError::Read { path, source }),
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings.base_url = normalize_base_url(&settings.base_url)?;
    Ok(settings)
}

pub(crate) fn apply_file_settings(
    settings: &mut Settings,
    raw: &str,
    path: &Path,
) -> Result<(), SettingsError> {
    let file_cfg: FileSettings = toml::from_str(raw).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(v) = file_cfg.base_url {
        settings.base_url = v;
    }
    if let Some(v) = file_cfg.api_key {
        settings.api_key = non_empty(v);
    }
    if let Some(v) = file_cfg.require_api_key {
        settings.require_api_key = v;
    }
    if let Some(v) = file_cfg.connect_timeout_secs {
        settings.connect_timeout_secs = v;
    }
    if let Some(v) = file_cfg.greeting {
        settings.greeting = v;
    }
    Ok(())
}

pub(crate) fn apply_env_overrides(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("CHATBOT_API_BASE_URL") {
        settings.base_url = v;
    }
    if let Some(v) = var("APP__BASE_URL") {
        settings.base_url = v;
    }

    if let Some(v) = var("CHATBOT_API_KEY") {
        settings.api_key = non_empty(v);
    }
    if let Some(v) = var("APP__API_KEY") {
        settings.api_key = non_empty(v);
    }

    if let Some(v) = var("APP__REQUIRE_API_KEY") {
        if let Ok(parsed) = v.trim().parse::<bool>() {
            settings.require_api_key = parsed;
        }
    }

    if let Some(v) = var("APP__CONNECT_TIMEOUT_SECS") {
        if let Ok(parsed) = v.trim().parse::<u64>() {
            settings.connect_timeout_secs = parsed;
        }
    }
}

/// Trims whitespace and trailing slashes so paths can be appended directly.
pub fn normalize_base_url(raw_base_url: &str) -> Result<String, SettingsError> {
    let trimmed = raw_base_url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(Settings::default().base_url);
    }

    Url::parse(trimmed).map_err(|source| SettingsError::BaseUrl {
        url: trimmed.to_string(),
        source,
    })?;
    Ok(trimmed.to_string())
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim().to_string();
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

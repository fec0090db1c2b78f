use std::{fs, io::ErrorKind, path::Path};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_SETTINGS_FILE: &str = "host.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSettings {
    pub event_capacity: usize,
    pub response_fields: Vec<String>,
    pub log_filter: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            response_fields: vec!["response".into(), "value".into()],
            log_filter: "info".into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    event_capacity: Option<usize>,
    response_fields: Option<Vec<String>>,
    log_filter: Option<String>,
}

/// Defaults, then the TOML file at `path` if it exists, then `HOST__*`
/// environment overrides.
pub fn load_settings(path: impl AsRef<Path>) -> anyhow::Result<HostSettings> {
    let mut settings = HostSettings::default();

    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("invalid host settings in '{}'", path.display()))?;
            apply_file(&mut settings, file_cfg);
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read host settings '{}'", path.display()))
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut HostSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.event_capacity.filter(|v| *v > 0) {
        settings.event_capacity = v;
    }
    if let Some(v) = file_cfg.response_fields {
        settings.response_fields = v;
    }
    if let Some(v) = file_cfg.log_filter {
        settings.log_filter = v;
    }
}

fn apply_env(settings: &mut HostSettings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("HOST__EVENT_CAPACITY") {
        if let Ok(parsed) = v.trim().parse::<usize>() {
            if parsed > 0 {
                settings.event_capacity = parsed;
            }
        }
    }
    if let Some(v) = var("HOST__RESPONSE_FIELDS") {
        settings.response_fields = parse_field_list(&v);
    }
    if let Some(v) = var("HOST__LOG_FILTER") {
        if !v.trim().is_empty() {
            settings.log_filter = v.trim().to_string();
        }
    }
}

fn parse_field_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

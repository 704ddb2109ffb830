use std::{fs, path::Path};

use scan_session::{ControllerOptions, ReconcilePolicy};
use serde::Deserialize;
use tracing::warn;

pub const CONFIG_FILE: &str = "disktidy.toml";

const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:7878";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub engine_url: String,
    pub page_size: u64,
    pub move_to_trash: bool,
    pub reconcile_policy: ReconcilePolicy,
    pub event_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let options = ControllerOptions::default();
        Self {
            engine_url: DEFAULT_ENGINE_URL.into(),
            page_size: options.page_size,
            move_to_trash: options.move_to_trash,
            reconcile_policy: options.reconcile_policy,
            event_buffer: options.event_buffer,
        }
    }
}

impl Settings {
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            page_size: self.page_size.max(1),
            move_to_trash: self.move_to_trash,
            reconcile_policy: self.reconcile_policy,
            event_buffer: self.event_buffer.max(1),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    engine_url: Option<String>,
    page_size: Option<u64>,
    move_to_trash: Option<bool>,
    reconcile_policy: Option<ReconcilePolicy>,
    event_buffer: Option<usize>,
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(CONFIG_FILE) {
        apply_file(&mut settings, Path::new(CONFIG_FILE), &raw);
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());

    settings.engine_url = normalize_engine_url(&settings.engine_url);
    settings
}

fn apply_file(settings: &mut Settings, path: &Path, raw: &str) {
    let file_cfg = match toml::from_str::<FileSettings>(raw) {
        Ok(file_cfg) => file_cfg,
        Err(err) => {
            warn!("config: ignoring {}: {err}", path.display());
            return;
        }
    };

    if let Some(v) = file_cfg.engine_url {
        settings.engine_url = v;
    }
    if let Some(v) = file_cfg.page_size {
        settings.page_size = v;
    }
    if let Some(v) = file_cfg.move_to_trash {
        settings.move_to_trash = v;
    }
    if let Some(v) = file_cfg.reconcile_policy {
        settings.reconcile_policy = v;
    }
    if let Some(v) = file_cfg.event_buffer {
        settings.event_buffer = v;
    }
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("DISKTIDY_ENGINE_URL") {
        settings.engine_url = v;
    }
    if let Some(v) = var("APP__ENGINE_URL") {
        settings.engine_url = v;
    }

    if let Some(v) = var("APP__PAGE_SIZE") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.page_size = parsed;
        }
    }

    if let Some(v) = var("APP__MOVE_TO_TRASH") {
        match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => settings.move_to_trash = true,
            "0" | "false" | "no" => settings.move_to_trash = false,
            other => warn!("config: ignoring APP__MOVE_TO_TRASH={other}"),
        }
    }

    if let Some(v) = var("APP__RECONCILE_POLICY") {
        match v.parse::<ReconcilePolicy>() {
            Ok(policy) => settings.reconcile_policy = policy,
            Err(err) => warn!("config: {err}"),
        }
    }

    if let Some(v) = var("APP__EVENT_BUFFER") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.event_buffer = parsed;
        }
    }
}

pub fn normalize_engine_url(raw_engine_url: &str) -> String {
    let raw_engine_url = raw_engine_url.trim();

    if raw_engine_url.is_empty() {
        return DEFAULT_ENGINE_URL.to_string();
    }

    let with_scheme = if raw_engine_url.contains("://") {
        raw_engine_url.to_string()
    } else {
        format!("http://{raw_engine_url}")
    };

    with_scheme.trim_end_matches('/').to_string()
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

use std::{fs, time::Duration};

use serde::Deserialize;
use shared::domain::COMPLETE_STEP;
use tracing::warn;

const SETTINGS_FILE: &str = "server.toml";

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_bind: String,
    pub app_name: String,
    pub app_version: String,
    pub use_k8s: bool,
    pub step_interval: Duration,
    pub rollout_steps: Vec<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "0.0.0.0:8090".into(),
            app_name: "SkyCanary".into(),
            app_version: "stable".into(),
            use_k8s: false,
            step_interval: Duration::from_millis(2000),
            rollout_steps: vec![10, 25, 50, 75, 100],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    app_name: Option<String>,
    app_version: Option<String>,
    use_k8s: Option<bool>,
    step_interval_ms: Option<u64>,
    rollout_steps: Option<Vec<u32>>,
}

pub fn load_settings() -> Settings {
    let raw = fs::read_to_string(SETTINGS_FILE).ok();
    load_settings_from(raw.as_deref(), |key| std::env::var(key).ok())
}

/// Applies defaults, then `server.toml` contents, then environment overrides.
pub(crate) fn load_settings_from(
    file_contents: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    let mut settings = Settings::default();

    if let Some(raw) = file_contents {
        match toml::from_str::<FileSettings>(raw) {
            Ok(file_cfg) => apply_file_settings(&mut settings, file_cfg),
            Err(error) => warn!(%error, file = SETTINGS_FILE, "ignoring unreadable settings file"),
        }
    }

    if let Some(port) = env("PORT") {
        match port.trim().parse::<u16>() {
            Ok(port) => settings.server_bind = format!("0.0.0.0:{port}"),
            Err(_) => warn!(%port, "ignoring invalid PORT"),
        }
    }
    if let Some(v) = env("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = env("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Some(v) = env("APP_NAME") {
        settings.app_name = v;
    }
    if let Some(v) = env("APP__APP_NAME") {
        settings.app_name = v;
    }

    if let Some(v) = env("APP_VERSION") {
        settings.app_version = v;
    }
    if let Some(v) = env("APP__APP_VERSION") {
        settings.app_version = v;
    }

    if let Some(v) = env("USE_K8S") {
        settings.use_k8s = v == "1";
    }

    if let Some(v) = env("APP__STEP_INTERVAL_MS") {
        match v.parse::<u64>() {
            Ok(ms) if ms > 0 => settings.step_interval = Duration::from_millis(ms),
            _ => warn!(value = %v, "ignoring invalid APP__STEP_INTERVAL_MS"),
        }
    }

    if let Some(v) = env("APP__ROLLOUT_STEPS") {
        match parse_steps(&v) {
            Some(steps) => settings.rollout_steps = steps,
            None => warn!(value = %v, "ignoring invalid APP__ROLLOUT_STEPS"),
        }
    }

    settings
}

fn apply_file_settings(settings: &mut Settings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.bind_addr {
        settings.server_bind = v;
    }
    if let Some(v) = file_cfg.app_name {
        settings.app_name = v;
    }
    if let Some(v) = file_cfg.app_version {
        settings.app_version = v;
    }
    if let Some(v) = file_cfg.use_k8s {
        settings.use_k8s = v;
    }
    match file_cfg.step_interval_ms {
        Some(ms) if ms > 0 => settings.step_interval = Duration::from_millis(ms),
        Some(_) => warn!("ignoring zero step_interval_ms in settings file"),
        None => {}
    }
    if let Some(steps) = file_cfg.rollout_steps {
        if valid_steps(&steps) {
            settings.rollout_steps = steps;
        } else {
            warn!(?steps, "ignoring invalid rollout_steps in settings file");
        }
    }
}

/// Parses a comma separated step list such as `10,25,50,75,100`.
pub(crate) fn parse_steps(raw: &str) -> Option<Vec<u32>> {
    let steps = raw
        .split(',')
        .map(|part| part.trim().parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;
    valid_steps(&steps).then_some(steps)
}

/// Steps must be non-decreasing, within 0..=100, and finish the rollout.
pub(crate) fn valid_steps(steps: &[u32]) -> bool {
    let Some(last) = steps.last() else {
        return false;
    };
    *last == COMPLETE_STEP
        && steps.iter().all(|step| *step <= COMPLETE_STEP)
        && steps.windows(2).all(|pair| pair[0] <= pair[1])
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

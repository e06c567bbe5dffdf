//! Settings loading: defaults → file deep-merge → env overrides.

use std::env;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::Result;
use crate::types::Fdc3Settings;

/// Default settings file location (`~/.fdc3/settings.json`).
#[must_use]
pub fn settings_path() -> PathBuf {
    let home = env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
    home.join(".fdc3").join("settings.json")
}

/// Deep-merge `overlay` onto `base`.
///
/// Objects merge key-by-key recursively; any other value in `overlay`
/// replaces the base value wholesale (arrays included).
#[must_use]
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => overlay_val,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Load settings from the default path with env overrides.
pub fn load_settings() -> Result<Fdc3Settings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific file, deep-merged over compiled defaults,
/// then apply `FDC3_*` env overrides. A missing file is not an error — the
/// file layer is simply skipped.
pub fn load_settings_from_path(path: &Path) -> Result<Fdc3Settings> {
    let mut merged = serde_json::to_value(Fdc3Settings::default())?;

    if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        let file_layer: Value = serde_json::from_str(&raw)?;
        merged = deep_merge(merged, file_layer);
    }

    let mut settings: Fdc3Settings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Apply `FDC3_*` environment overrides (highest priority).
fn apply_env_overrides(settings: &mut Fdc3Settings) {
    if let Some(port) = env_parse::<u16>("FDC3_WS_PORT") {
        settings.server.ws_port = port;
    }
    if let Ok(addr) = env::var("FDC3_BIND_ADDR") {
        settings.server.bind_addr = addr;
    }
    if let Some(ms) = env_parse::<u64>("FDC3_INTENT_ACK_TIMEOUT_MS") {
        settings.broker.intent_ack_timeout_ms = ms;
    }
    if let Some(flag) = env_parse::<bool>("FDC3_DEBUG_RECOVERY") {
        settings.broker.debug_recovery = flag;
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(key, raw, "ignoring unparseable env override");
                None
            }
        },
        Err(_) => None,
    }
}

//! # fdc3-settings
//!
//! Configuration management with layered sources for the FDC3 agent.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`Fdc3Settings::default()`]
//! 2. **User file** — `~/.fdc3/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `FDC3_*` overrides (highest priority)
//!
//! The global singleton is reloadable so an operator can edit the file and
//! signal the server without a restart.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

/// Global settings singleton.
///
/// `RwLock<Option<Arc<..>>>` rather than `OnceLock` so the cached value can
/// be swapped on reload. Reads are cheap (shared lock + `Arc::clone`).
static SETTINGS: RwLock<Option<Arc<Fdc3Settings>>> = RwLock::new(None);

/// Get the global settings instance.
///
/// Loads from disk on first access; later calls return the cached value.
/// If loading fails, compiled defaults are used. Returns an `Arc` so callers
/// hold a consistent snapshot across a concurrent reload.
pub fn get_settings() -> Arc<Fdc3Settings> {
    {
        let guard = SETTINGS.read();
        if let Some(ref s) = *guard {
            return Arc::clone(s);
        }
    }

    let mut guard = SETTINGS.write();
    // Another thread may have initialized while we waited for the lock.
    if let Some(ref s) = *guard {
        return Arc::clone(s);
    }

    let settings = Arc::new(match load_settings() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            Fdc3Settings::default()
        }
    });
    *guard = Some(Arc::clone(&settings));
    settings
}

/// Initialize the global settings with a specific value.
///
/// Replaces any previously cached settings. Used by tests and by server
/// startup when a settings path is given on the command line.
pub fn init_settings(settings: Fdc3Settings) {
    let mut guard = SETTINGS.write();
    *guard = Some(Arc::new(settings));
}

/// Reload settings from a specific file path and swap the global cache.
pub fn reload_settings_from_path(path: &Path) {
    let new = Arc::new(match load_settings_from_path(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, ?path, "failed to reload settings, falling back to defaults");
            Fdc3Settings::default()
        }
    });
    let mut guard = SETTINGS.write();
    *guard = Some(new);
    tracing::info!(?path, "settings reloaded from disk");
}

#[cfg(test)]
pub(crate) fn reset_settings() {
    let mut guard = SETTINGS.write();
    *guard = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests that mutate the global SETTINGS static hold this lock to avoid
    /// racing each other (Rust runs tests in parallel threads).
    static SETTINGS_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn init_settings_sets_custom_value() {
        let _lock = SETTINGS_MUTEX.lock().unwrap();
        reset_settings();
        let mut custom = Fdc3Settings::default();
        custom.server.ws_port = 9999;
        init_settings(custom);
        assert_eq!(get_settings().server.ws_port, 9999);
        reset_settings();
    }

    #[test]
    fn reload_from_path_updates_cached_value() {
        let _lock = SETTINGS_MUTEX.lock().unwrap();
        reset_settings();
        init_settings(Fdc3Settings::default());
        assert!(!get_settings().broker.debug_recovery);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"broker": {"debugRecovery": true}}"#).unwrap();

        reload_settings_from_path(&path);
        let updated = get_settings();
        assert!(updated.broker.debug_recovery);
        // Deep merge preserves siblings
        assert_eq!(updated.broker.intent_ack_timeout_ms, 60_000);
        reset_settings();
    }

    #[test]
    fn snapshot_isolation_across_reload() {
        let _lock = SETTINGS_MUTEX.lock().unwrap();
        reset_settings();
        init_settings(Fdc3Settings::default());
        let snapshot = get_settings();

        let mut new = Fdc3Settings::default();
        new.server.ws_port = 5555;
        init_settings(new);

        assert_eq!(snapshot.server.ws_port, 4475);
        assert_eq!(get_settings().server.ws_port, 5555);
        reset_settings();
    }
}

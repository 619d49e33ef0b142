//! Configuration accessor for per-root server settings.
//!
//! Settings live in a layered read-only key-value source owned by the host.
//! A [`ServerConfig`] is a snapshot taken at session start; it is never
//! refreshed behind the session's back — picking up edited settings requires
//! an explicit restart.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::host::ProjectRoot;

/// `oraide.server.exePath` — explicit server executable override.
pub const EXE_PATH_KEY: &str = "oraide.server.exePath";

/// `oraide.server.shouldLogToFile` — duplicate server stderr to a log file.
pub const LOG_TO_FILE_KEY: &str = "oraide.server.shouldLogToFile";

/// Read-only lookup into the host's layered configuration.
///
/// Implementations resolve `key` for the given root, applying whatever layer
/// precedence the host defines. Absent keys return `None`; [`ServerConfig`]
/// supplies the documented defaults.
pub trait SettingsSource: Send + Sync {
    fn get(&self, root: &ProjectRoot, key: &str) -> Option<serde_json::Value>;
}

/// Two-layer in-memory source: per-root values override global ones.
#[derive(Debug, Default)]
pub struct LayeredSettings {
    global: HashMap<String, serde_json::Value>,
    per_root: HashMap<PathBuf, HashMap<String, serde_json::Value>>,
}

impl LayeredSettings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_global(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.global.insert(key.into(), value);
    }

    pub fn set_for_root(
        &mut self,
        root: &ProjectRoot,
        key: impl Into<String>,
        value: serde_json::Value,
    ) {
        self.per_root
            .entry(root.path().to_path_buf())
            .or_default()
            .insert(key.into(), value);
    }
}

impl SettingsSource for LayeredSettings {
    fn get(&self, root: &ProjectRoot, key: &str) -> Option<serde_json::Value> {
        self.per_root
            .get(root.path())
            .and_then(|layer| layer.get(key))
            .or_else(|| self.global.get(key))
            .cloned()
    }
}

/// Per-root settings snapshot consumed by the launcher and logger.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// If set, the server is spawned from this path instead of resolving the
    /// well-known name on the search path.
    pub exe_override: Option<PathBuf>,
    /// Whether to duplicate the server's stderr to a log file in the root.
    pub log_to_file: bool,
}

impl ServerConfig {
    /// Load the snapshot for `root`. Pure read; absent or mistyped keys fall
    /// back to the defaults (no override, logging disabled).
    #[must_use]
    pub fn load(root: &ProjectRoot, source: &dyn SettingsSource) -> Self {
        let exe_override = source
            .get(root, EXE_PATH_KEY)
            .and_then(|v| v.as_str().map(PathBuf::from));
        let log_to_file = source
            .get(root, LOG_TO_FILE_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Self {
            exe_override,
            log_to_file,
        }
    }

    /// The section of the settings namespace exposed to the server for
    /// configuration synchronization (`workspace/configuration` replies).
    #[must_use]
    pub fn as_section_value(&self) -> serde_json::Value {
        serde_json::json!({
            "server": {
                "exePath": self.exe_override.as_ref().map(|p| p.display().to_string()),
                "shouldLogToFile": self.log_to_file,
            }
        })
    }
}

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "FLOWSTATE_CONFIG";
pub const DB_ENV: &str = "FLOWSTATE_DB";
pub const DEBUG_ENV: &str = "FLOWSTATE_DEBUG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoordinatorConfig {
    pub database_path: PathBuf,
    pub broadcast_capacity: usize,
    pub request_queue_capacity: usize,
    pub debug: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("flowstate.sqlite3"),
            broadcast_capacity: 64,
            request_queue_capacity: 128,
            debug: false,
        }
    }
}

/// Result of reading the config file. A file that does not parse is not an
/// error: defaults are used and the parse error is kept so the caller can
/// report it once logging is up.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: CoordinatorConfig,
    pub ignored: Option<String>,
}

impl CoordinatorConfig {
    /// Reads the file named by `FLOWSTATE_CONFIG` (if any) and applies the
    /// environment overrides on top.
    pub fn load() -> Result<LoadedConfig> {
        let mut loaded = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => LoadedConfig {
                config: Self::default(),
                ignored: None,
            },
        };
        loaded.config.apply_overrides(
            std::env::var(DB_ENV).ok(),
            std::env::var(DEBUG_ENV).ok(),
        );
        Ok(loaded)
    }

    /// A missing file yields defaults. An unreadable file is an error.
    pub fn from_file(path: &Path) -> Result<LoadedConfig> {
        if !path.exists() {
            return Ok(LoadedConfig {
                config: Self::default(),
                ignored: None,
            });
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Ok(match serde_json::from_str(&contents) {
            Ok(config) => LoadedConfig {
                config,
                ignored: None,
            },
            Err(err) => LoadedConfig {
                config: Self::default(),
                ignored: Some(format!("malformed config {}: {err}", path.display())),
            },
        })
    }

    fn apply_overrides(&mut self, db_path: Option<String>, debug: Option<String>) {
        if let Some(path) = db_path.filter(|p| !p.trim().is_empty()) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(value) = debug {
            self.debug = value == "1" || value.eq_ignore_ascii_case("true");
        }
    }
}

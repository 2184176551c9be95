//! Service configuration: TOML file + CLI overrides + runtime patches.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use tabhub_core::limits::{DEFAULT_PORT, MAX_TABS_PER_BROWSER};
use tabhub_core::{HubError, HubResult};

/// Marker reported by the HTTP surface so a second launch can tell this
/// service apart from a stranger squatting on the port.
pub const APP_NAME: &str = "tabhub";

/// Log levels accepted from the config file and the config API.
const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub log: LogSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_max_tabs")]
    pub max_tabs_per_browser: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_dir: default_data_dir(),
            max_tabs_per_browser: default_max_tabs(),
        }
    }
}

/// `[log]` section of the config TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_data_dir() -> String {
    "~/.tabhub/data".to_string()
}
fn default_max_tabs() -> usize {
    MAX_TABS_PER_BROWSER
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved runtime settings (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub data_dir: PathBuf,
    pub log_level: String,
    pub max_tabs_per_browser: usize,
    /// Where changes made through the config API are persisted.
    pub config_path: PathBuf,
}

/// Settings shared across handlers; the config API mutates them at runtime.
pub type SharedSettings = Arc<RwLock<Settings>>;

/// Partial update accepted by `POST /config`.
///
/// Field spellings match the extension-facing JSON. Unknown keys are
/// ignored; `_restart` requests a listener restart without changing any
/// values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    pub port: Option<u16>,
    pub data_folder: Option<String>,
    pub log_level: Option<String>,
    pub max_tabs_per_browser: Option<i64>,
    #[serde(rename = "_restart")]
    pub restart: Option<bool>,
}

/// What a successfully applied patch changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatchOutcome {
    /// The listener must rebind on a new port.
    pub port_changed: bool,
    /// The reply should tell the caller a restart is required.
    pub restart_needed: bool,
    /// The stores must be re-homed.
    pub data_dir_changed: bool,
}

impl Settings {
    /// Load config from the TOML file, then apply CLI overrides.
    pub fn load(
        config_path: &Path,
        cli_port: Option<u16>,
        cli_data_dir: Option<&str>,
        cli_log_level: Option<&str>,
    ) -> HubResult<Self> {
        let expanded = expand_tilde(config_path);
        let file_config = if expanded.exists() {
            let content = std::fs::read_to_string(&expanded)?;
            toml::from_str::<ConfigFile>(&content)
                .map_err(|e| HubError::Config(format!("config parse error: {e}")))?
        } else {
            ConfigFile::default()
        };

        // Merge CLI overrides
        let port = cli_port.unwrap_or(file_config.server.port);
        let data_dir = cli_data_dir
            .map(|s| s.to_string())
            .unwrap_or(file_config.server.data_dir);
        let log_level = cli_log_level
            .map(|s| s.to_string())
            .unwrap_or(file_config.log.level);

        Ok(Self {
            port,
            data_dir: expand_tilde_str(&data_dir),
            log_level,
            max_tabs_per_browser: file_config.server.max_tabs_per_browser,
            config_path: expanded,
        })
    }

    /// Merge a runtime patch, applying the same bounds the config file
    /// gets: port in the user range, tab cap sane, level known.
    pub fn apply_patch(&mut self, patch: &ConfigPatch) -> HubResult<PatchOutcome> {
        if patch.restart.is_some() {
            return Ok(PatchOutcome {
                port_changed: false,
                restart_needed: true,
                data_dir_changed: false,
            });
        }

        let new_port = patch.port.unwrap_or(self.port);
        if new_port < 1024 {
            return Err(HubError::Config(format!(
                "port {new_port} outside allowed range 1024-65535"
            )));
        }

        let new_max = match patch.max_tabs_per_browser {
            Some(requested) if !(1..=10_000).contains(&requested) => {
                warn!(requested, "tab cap out of range, resetting to default");
                MAX_TABS_PER_BROWSER
            }
            Some(requested) => requested as usize,
            None => self.max_tabs_per_browser,
        };

        let new_level = match &patch.log_level {
            Some(level) if LOG_LEVELS.contains(&level.as_str()) => level.clone(),
            Some(level) => {
                warn!(level = %level, "unknown log level, falling back to info");
                "info".to_string()
            }
            None => self.log_level.clone(),
        };

        let new_data_dir = match &patch.data_folder {
            Some(dir) => expand_tilde_str(dir),
            None => self.data_dir.clone(),
        };

        let outcome = PatchOutcome {
            port_changed: new_port != self.port,
            restart_needed: new_port != self.port || new_level != self.log_level,
            data_dir_changed: new_data_dir != self.data_dir,
        };

        self.port = new_port;
        self.max_tabs_per_browser = new_max;
        self.log_level = new_level;
        self.data_dir = new_data_dir;

        Ok(outcome)
    }

    /// Persist the current values to the config file atomically.
    pub fn save(&self) -> HubResult<()> {
        let file = ConfigFile {
            server: ServerSection {
                port: self.port,
                data_dir: self.data_dir.display().to_string(),
                max_tabs_per_browser: self.max_tabs_per_browser,
            },
            log: LogSection {
                level: self.log_level.clone(),
            },
        };
        let content = toml::to_string_pretty(&file)
            .map_err(|e| HubError::Config(format!("config serialize error: {e}")))?;

        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.config_path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.config_path)?;
        Ok(())
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if s.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&s[2..]);
        }
    }
    PathBuf::from(s)
}

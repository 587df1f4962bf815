use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};
use std::time::Duration;

use crate::engine::EngineConfig;
use crate::manager::SessionConfig;
use crate::reformatter::SchedulerConfig;

pub const CURRENT_VERSION: u32 = 2;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "dotweaver";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Sections that may hold a built map at once
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Extra pages a partial run regenerates before the views are released
    #[serde(default = "default_safety_margin")]
    pub safety_margin: u32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_cells_per_line")]
    pub cells_per_line: usize,

    #[serde(default = "default_lines_per_page")]
    pub lines_per_page: usize,

    /// Blocks per section when importing plain text
    #[serde(default = "default_section_size")]
    pub section_size: usize,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_window_size() -> usize {
    crate::sections::DEFAULT_WINDOW_SIZE
}

fn default_safety_margin() -> u32 {
    crate::reformatter::DEFAULT_SAFETY_MARGIN
}

fn default_poll_interval_ms() -> u64 {
    3000
}

fn default_cells_per_line() -> usize {
    40
}

fn default_lines_per_page() -> usize {
    25
}

fn default_section_size() -> usize {
    50
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            window_size: default_window_size(),
            safety_margin: default_safety_margin(),
            poll_interval_ms: default_poll_interval_ms(),
            cells_per_line: default_cells_per_line(),
            lines_per_page: default_lines_per_page(),
            section_size: default_section_size(),
        }
    }
}

impl From<&Settings> for SessionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            window_size: settings.window_size.max(1),
            scheduler: SchedulerConfig {
                poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
                safety_margin: settings.safety_margin,
            },
            engine: EngineConfig {
                cells_per_line: settings.cells_per_line.max(1),
                lines_per_page: settings.lines_per_page.max(1),
            },
        }
    }
}

static SETTINGS: LazyLock<RwLock<Settings>> = LazyLock::new(|| RwLock::new(Settings::default()));
/// File the current settings came from; `save_settings` writes back to it
static SETTINGS_PATH: LazyLock<RwLock<Option<PathBuf>>> = LazyLock::new(|| RwLock::new(None));

fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

pub fn load_settings() {
    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return;
    };
    if path.exists() {
        load_settings_from_path(&path);
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        if let Ok(settings) = SETTINGS.read() {
            save_settings_to_file(&settings, &path);
        }
    }
}

/// Load settings from an explicit file, e.g. `--config`
pub fn load_settings_from_path(path: &Path) {
    match fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<Settings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");
                if let Ok(mut loaded_from) = SETTINGS_PATH.write() {
                    *loaded_from = Some(path.to_path_buf());
                }

                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings);
                    save_settings_to_file(&settings, path);
                }

                if let Ok(mut global) = SETTINGS.write() {
                    *global = settings;
                }
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
        }
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    // v1 stored the poll interval in seconds
    if settings.version < 2 && settings.poll_interval_ms < 100 {
        settings.poll_interval_ms *= 1000;
    }

    settings.version = CURRENT_VERSION;
}

pub fn save_settings() {
    let loaded_from = SETTINGS_PATH.read().ok().and_then(|p| p.clone());
    let Some(path) = loaded_from.or_else(preferred_config_path) else {
        warn!("Could not determine config directory, cannot save settings");
        return;
    };

    if let Ok(settings) = SETTINGS.read() {
        save_settings_to_file(&settings, &path);
    }
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    match serde_yaml::to_string(settings) {
        Ok(body) => {
            let content = format!("{SETTINGS_HEADER}{body}");
            match fs::write(path, content) {
                Ok(()) => debug!("Saved settings to {path:?}"),
                Err(e) => error!("Failed to save settings to {path:?}: {e}"),
            }
        }
        Err(e) => error!("Failed to serialize settings: {e}"),
    }
}

const SETTINGS_HEADER: &str = r"# dotweaver settings
#
# window_size       sections kept rendered at once
# safety_margin     extra braille pages regenerated before the views repaint
# poll_interval_ms  how often the idle reformat worker checks for shutdown
# cells_per_line    braille cells per line
# lines_per_page    braille lines per page
# section_size      blocks per section when importing plain text

";

// Public API for accessing/modifying settings

#[must_use]
pub fn get_settings() -> Settings {
    SETTINGS.read().map(|s| s.clone()).unwrap_or_default()
}

/// Session configuration derived from the current settings
#[must_use]
pub fn session_config() -> SessionConfig {
    SessionConfig::from(&get_settings())
}

pub fn get_section_size() -> usize {
    SETTINGS
        .read()
        .map(|s| s.section_size)
        .unwrap_or_else(|_| default_section_size())
}

pub fn set_safety_margin(pages: u32) {
    if let Ok(mut settings) = SETTINGS.write() {
        settings.safety_margin = pages;
    }
    save_settings();
}

pub fn set_window_size(sections: usize) {
    if let Ok(mut settings) = SETTINGS.write() {
        settings.window_size = sections.max(1);
    }
    save_settings();
}

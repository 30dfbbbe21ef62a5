//! Settings parser for .windlass/config.toml

use super::types::Settings;
use crate::common::prelude::*;
use std::path::Path;

const CONFIG_FILENAME: &str = "config.toml";
const WINDLASS_DIR: &str = ".windlass";

/// Load settings from .windlass/config.toml
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings(project_path: &Path) -> Settings {
    let config_path = project_path.join(WINDLASS_DIR).join(CONFIG_FILENAME);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Create a default config file in the .windlass/ directory
pub fn init_config_dir(project_path: &Path) -> Result<()> {
    let windlass_dir = project_path.join(WINDLASS_DIR);

    if !windlass_dir.exists() {
        std::fs::create_dir_all(&windlass_dir)
            .map_err(|e| Error::config(format!("Failed to create .windlass dir: {}", e)))?;
    }

    let config_path = windlass_dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        let default_content = r#"# Windlass Configuration

[watcher]
min_rest_ms = 200       # quiet period before a change batch is emitted
max_batch_ms = 10000    # flush a batch at this age even without a quiet period

[build]
browser = "auto"        # "auto" opens the first deployed service; "off" never does

[display]
refresh_interval_ms = 1000
max_changed_files_to_print = 5
"#;
        std::fs::write(&config_path, default_content)
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
    }

    Ok(())
}

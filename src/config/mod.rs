//! Configuration layer: `.windlass/config.toml` settings

pub mod settings;
pub mod types;

pub use settings::{init_config_dir, load_settings};
pub use types::{BrowserMode, BuildSettings, DisplaySettings, Settings, WatcherSettings};

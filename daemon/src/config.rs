use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::LazyLock;

use crate::management::LaunchConfig;
use crate::storage::file::{Config, FileIoWithBackup};

pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
/// immutable through full lifetime of app, unless restart app.
pub struct AppConfig {
    /// Holds the template directory and every instance directory.
    pub servers_root: PathBuf,
    pub template_name: String,
    pub launch: LaunchConfig,
    pub auto_start: bool,
    pub shutdown_timeout_secs: u64,
    /// Unpacked server installation used when the template is missing.
    pub template_source: Option<PathBuf>,
    /// Written as `version.txt` when the installation has none.
    pub template_version: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            servers_root: PathBuf::from("servers"),
            template_name: "bedServer".to_string(),
            launch: LaunchConfig::default(),
            auto_start: false,
            shutdown_timeout_secs: 60,
            template_source: None,
            template_version: None,
        }
    }
}

impl FileIoWithBackup for AppConfig {}

impl Config for AppConfig {
    type ConfigType = AppConfig;
}

impl AppConfig {
    fn load() -> AppConfig {
        match Self::load_config_or_default(CONFIG_FILE_NAME, Self::default) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("could not load {}, using defaults: {:#}", CONFIG_FILE_NAME, err);
                Self::default()
            }
        }
    }
}

static APP_CONFIG: LazyLock<AppConfig> = LazyLock::new(AppConfig::load);

impl AppConfig {
    pub fn get() -> &'static AppConfig {
        &APP_CONFIG
    }
}

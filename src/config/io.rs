use std::env;
use std::path::{Path, PathBuf};
use directories_next::ProjectDirs;
use log::info;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use serde_json;
use std::str;

use crate::config::types::ScaleConfig;
use crate::error::ConfigError;

pub const CONFIG_PATH_VAR: &str = "FELICITA_SCALE_CONFIG";

// creates a path to felicita-scale.json in an os dependent standard directory, such as
// ~/.config/felicita-scale on linux.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("io", "btscale", "felicita-scale").map(|dirs| {
        dirs.config_dir().join("felicita-scale.json")
    })
}

/// An explicit path wins over the environment, which wins over the local config directory.
pub fn get_config_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path);
    }

    if let Ok(path) = env::var(CONFIG_PATH_VAR) {
        return Ok(PathBuf::from(path));
    }

    get_local_config_path().ok_or(ConfigError::NoConfigPath)
}

pub async fn read(path: &Path) -> Result<ScaleConfig, ConfigError> {
    info!("Reading config file {}", path.to_string_lossy());
    let mut file = File::open(path).await?;

    let mut content = vec![];
    file.read_to_end(&mut content).await?;

    if content.is_empty() {
        return Ok(ScaleConfig::default());
    }

    let content = str::from_utf8(&content)?;
    Ok(serde_json::from_str(content)?)
}

/// Reads the config, using the defaults if the file does not exist yet.
pub async fn load(explicit: Option<PathBuf>) -> Result<ScaleConfig, ConfigError> {
    let path = get_config_path(explicit)?;

    match read(&path).await {
        Ok(config) => Ok(config),
        Err(err) if err.is_file_not_found_error() => {
            info!("Config file not found, using defaults");
            Ok(ScaleConfig::default())
        },
        Err(err) => Err(err),
    }
}

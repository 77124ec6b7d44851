use crate::{MediaDiffError, RunConfig};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "mediadiff.toml";

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: RunConfig,
    pub path: PathBuf,
    pub exists: bool,
}

/// Load a run configuration from a TOML file
pub fn load_config(path: &Path) -> Result<RunConfig, MediaDiffError> {
    let data = fs::read_to_string(path).map_err(|e| MediaDiffError::io(path, e))?;
    toml::from_str(&data).map_err(|e| MediaDiffError::Config(e.to_string()))
}

/// Load the user's default configuration, falling back to built-in defaults
pub fn load_default_config() -> Result<LoadedConfig, MediaDiffError> {
    let path = default_config_path()?;
    let exists = path.exists();

    let config = if exists {
        load_config(&path)?
    } else {
        RunConfig::default()
    };

    Ok(LoadedConfig {
        config,
        path,
        exists,
    })
}

pub fn default_config_path() -> Result<PathBuf, MediaDiffError> {
    let dirs = ProjectDirs::from("", "rationalenterprise", "mediadiff")
        .ok_or_else(|| MediaDiffError::Config("Unable to determine config directory".to_string()))?;
    Ok(dirs.config_dir().join(CONFIG_FILE_NAME))
}

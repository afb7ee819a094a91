use std::path::PathBuf;

use anyhow::{Result, anyhow};
use directories::UserDirs;

const APP_DIR: &str = "grupos";
const CONFIG_FILE: &str = "config.toml";

trait ConfigPath {
    fn get_root_path() -> Result<PathBuf>;
}

pub(crate) struct UserConfig();
impl ConfigPath for UserConfig {
    /// `~/.config/grupos`. As a matter of taste this forces the XDG layout
    /// on every platform.
    fn get_root_path() -> Result<PathBuf> {
        let home_dir = UserDirs::new()
            .map(|d| d.home_dir().to_path_buf())
            .ok_or_else(|| anyhow!("Failed to get home directory"))?;
        Ok(home_dir.join(".config").join(APP_DIR))
    }
}
impl UserConfig {
    /// Location of the user's config file. Nothing is created.
    pub(crate) fn config_file() -> Result<PathBuf> {
        Ok(Self::get_root_path()?.join(CONFIG_FILE))
    }
}

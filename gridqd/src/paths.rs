//! Cross-platform application paths

use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self, String> {
        let data_dir = Self::get_data_dir()?;
        Self::at(data_dir)
    }

    /// Use an explicit directory instead of the OS data dir.
    pub fn at(data_dir: impl AsRef<Path>) -> Result<Self, String> {
        let data_dir = data_dir.as_ref().to_path_buf();

        // Ensure directory exists
        fs::create_dir_all(&data_dir)
            .map_err(|e| format!("Failed to create data directory {:?}: {}", data_dir, e))?;

        Ok(Self { data_dir })
    }

    fn get_data_dir() -> Result<PathBuf, String> {
        if let Some(dir) = std::env::var_os("GRIDQ_DATA_DIR") {
            return Ok(PathBuf::from(dir));
        }
        let base = dirs::data_dir().ok_or("Could not determine data directory")?;
        Ok(base.join("gridq"))
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn network_file(&self) -> PathBuf {
        self.data_dir.join("network.gqi")
    }
}

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Overrides the base directory for config and credentials
pub const HOME_ENV: &str = "NLM_HOME";

/// Application directories following the XDG base directory layout
#[derive(Debug, Clone)]
pub struct Directories {
    /// Config directory (~/.config/nlm)
    pub config: PathBuf,

    /// Data directory (~/.local/share/nlm)
    pub data: PathBuf,

    /// Config file path
    pub config_file: PathBuf,

    /// Browser storage state holding the session cookies
    pub storage_state: PathBuf,
}

impl Directories {
    /// Resolve directories from `NLM_HOME`, falling back to XDG paths.
    ///
    /// # Errors
    ///
    /// Returns an error if `NLM_HOME` is unset and the system's project
    /// directories cannot be determined.
    pub fn new() -> Result<Self> {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::with_base(PathBuf::from(home)));
        }

        let project = ProjectDirs::from("", "", "nlm")
            .ok_or_else(|| Error::Config("Failed to determine project directories".into()))?;

        let config = project.config_dir().to_path_buf();
        let data = project.data_dir().to_path_buf();

        Ok(Self {
            config_file: config.join("config.json"),
            storage_state: config.join("storage_state.json"),
            config,
            data,
        })
    }

    #[must_use]
    pub fn with_base(base: PathBuf) -> Self {
        Self {
            config_file: base.join("config.json"),
            storage_state: base.join("storage_state.json"),
            config: base.clone(),
            data: base,
        }
    }

    /// Log file location: a bare file name lands in the data directory,
    /// anything with a directory component is used as given.
    #[must_use]
    pub fn log_path(&self, file: &Path) -> PathBuf {
        match file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => file.to_path_buf(),
            _ => self.data.join(file),
        }
    }

    /// Ensure all directories exist.
    ///
    /// # Errors
    ///
    /// Returns an error if any directory cannot be created.
    pub fn ensure_exists(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config)?;
        std::fs::create_dir_all(&self.data)?;
        Ok(())
    }
}

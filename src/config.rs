//! Runtime configuration resolved from CLI flags and environment variables.

use crate::error::Result;
use clap::ValueEnum;
use std::path::{Path, PathBuf};

/// Name of the per-user configuration directory under `$HOME`.
pub const CONFIG_DIR_NAME: &str = ".ipatool";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub config_dir: PathBuf,
    pub format: OutputFormat,
    pub interactive: bool,
    /// Overrides the MAC-derived device GUID.
    pub guid: Option<String>,
}

impl Config {
    pub fn new(
        config_dir: Option<PathBuf>,
        format: OutputFormat,
        non_interactive: bool,
        guid: Option<String>,
    ) -> Self {
        Self {
            config_dir: config_dir.unwrap_or_else(default_config_dir),
            format,
            interactive: !non_interactive,
            guid: guid.filter(|g| !g.trim().is_empty()),
        }
    }

    /// Creates the configuration directory if needed (owner-only on unix).
    pub fn ensure_config_dir(&self) -> Result<&Path> {
        if !self.config_dir.exists() {
            std::fs::create_dir_all(&self.config_dir)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(
                    &self.config_dir,
                    std::fs::Permissions::from_mode(0o700),
                )?;
            }
        }
        Ok(&self.config_dir)
    }
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

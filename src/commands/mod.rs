//! Command implementations for the ipatool CLI
//!
//! - **auth**: login, stored account info, revocation
//! - **query**: catalog lookup and search
//! - **purchase**: license acquisition
//! - **download**: package download and sinf injection
//! - **versions**: version listing, history and per-version metadata
//! - **utils**: shared output and resolution helpers (internal)

pub mod auth;
pub mod download;
pub mod purchase;
pub mod query;
pub mod versions;
pub(crate) mod utils;

pub use auth::{auth_info, login, revoke};
pub use download::{DownloadArgs, download};
pub use purchase::purchase;
pub use query::{lookup, search};
pub use versions::{get_version_metadata, list_versions, version_history};

use crate::appstore::AppStore;
use crate::config::{Config, OutputFormat};
use crate::http::HttpClient;
use crate::keychain::FileKeychain;
use crate::machine::SystemMachine;
use crate::progress;
use std::sync::Arc;

/// Everything a command needs: the store client and the resolved config.
pub struct Session {
    pub store: AppStore,
    pub config: Config,
}

impl Session {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.ensure_config_dir()?;

        let transport = Arc::new(HttpClient::new()?);
        let keychain = Arc::new(FileKeychain::new(&config.config_dir));
        let mut store = AppStore::new(transport, keychain, Arc::new(SystemMachine));
        if let Some(guid) = &config.guid {
            store = store.with_guid(guid.clone());
        }

        Ok(Self { store, config })
    }

    pub fn json(&self) -> bool {
        self.config.format == OutputFormat::Json
    }

    /// Spinners and bars only in interactive text mode on a terminal.
    pub fn show_progress(&self) -> bool {
        !self.json() && progress::should_show_progress(self.config.interactive)
    }
}

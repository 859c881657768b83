//! App Store private-protocol client.
//!
//! [`AppStore`] owns the collaborators every operation needs (transport,
//! credential store, device identity) but no session state: the [`Account`]
//! is passed explicitly into each call, and operations that silently
//! re-authenticate hand the refreshed account back in their output.
//!
//! Operations live in one submodule each:
//!
//! - **account**: login state machine, stored account info, revocation
//! - **lookup**: public catalog lookup and search
//! - **purchase**: free-app license acquisition
//! - **download**: signed download descriptor, resumable transfer, repackaging
//! - **versions**: version history, version listing, per-version metadata

pub mod account;
pub mod app;
pub mod download;
pub mod lookup;
pub mod purchase;
pub mod storefront;
pub mod versions;

pub use account::{Account, LoginFailure, LoginResult, LoginStep};
pub use app::App;
pub use download::{DownloadOptions, DownloadOutput, DownloadProgress, Sinf};
pub use lookup::SearchOutput;
pub use purchase::{PurchaseOutcome, PurchaseOutput};
pub use versions::{
    DEFAULT_VERSION_COUNT, MAX_CONCURRENT_REQUESTS, VersionDetails, VersionHistoryInfo,
    VersionHistoryOutput, VersionList, VersionMetadata, VersionOrder, VersionSelection,
};

use crate::error::{Result, StoreError};
use crate::http::{RawResponse, Transport};
use crate::keychain::Keychain;
use crate::machine::{Machine, guid_from_mac};
use std::sync::{Arc, OnceLock};
use tracing::debug;

pub const FAILURE_TYPE_INVALID_CREDENTIALS: &str = "-5000";
pub const FAILURE_TYPE_PASSWORD_TOKEN_EXPIRED: &str = "2034";
pub const FAILURE_TYPE_LICENSE_NOT_FOUND: &str = "9610";
pub const FAILURE_TYPE_TEMPORARILY_UNAVAILABLE: &str = "2059";

pub const CUSTOMER_MESSAGE_BAD_LOGIN: &str = "MZFinance.BadLogin.Configurator_message";
pub const CUSTOMER_MESSAGE_ACCOUNT_DISABLED: &str = "Your account is disabled.";
pub const CUSTOMER_MESSAGE_SUBSCRIPTION_REQUIRED: &str = "Subscription Required";

pub const PRICING_PARAMETER_APP_STORE: &str = "STDQ";
pub const PRICING_PARAMETER_APPLE_ARCADE: &str = "GAME";

pub const HTTP_HEADER_STORE_FRONT: &str = "X-Set-Apple-Store-Front";

/// Credential store key of the serialized [`Account`].
pub const ACCOUNT_KEY: &str = "account";

const GENERIC_FAILURE_MESSAGE: &str = "something went wrong";

/// Base URLs of the private and public APIs.
#[derive(Debug, Clone)]
pub struct Endpoints {
    /// Authentication host used when no 2FA code is supplied.
    pub auth: String,
    /// Authentication host used with a 2FA code.
    pub auth_with_code: String,
    pub purchase: String,
    pub download: String,
    /// Public iTunes catalog API.
    pub catalog: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            auth: "https://p25-buy.itunes.apple.com".to_string(),
            auth_with_code: "https://p71-buy.itunes.apple.com".to_string(),
            purchase: "https://buy.itunes.apple.com".to_string(),
            download: "https://p25-buy.itunes.apple.com".to_string(),
            catalog: "https://itunes.apple.com".to_string(),
        }
    }
}

impl Endpoints {
    /// Points every API at a single base URL (mock servers).
    pub fn single(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            auth: base.clone(),
            auth_with_code: base.clone(),
            purchase: base.clone(),
            download: base.clone(),
            catalog: base,
        }
    }

    pub fn authenticate_url(&self, auth_code_supplied: bool, guid: &str) -> String {
        let host = if auth_code_supplied {
            &self.auth_with_code
        } else {
            &self.auth
        };
        format!("{host}/WebObjects/MZFinance.woa/wa/authenticate?guid={guid}")
    }

    pub fn purchase_url(&self) -> String {
        format!("{}/WebObjects/MZBuy.woa/wa/buyProduct", self.purchase)
    }

    pub fn download_url(&self, guid: &str) -> String {
        format!(
            "{}/WebObjects/MZFinance.woa/wa/volumeStoreDownloadProduct?guid={guid}",
            self.download
        )
    }

    pub fn lookup_url(&self) -> String {
        format!("{}/lookup", self.catalog)
    }

    pub fn search_url(&self) -> String {
        format!("{}/search", self.catalog)
    }
}

pub struct AppStore {
    transport: Arc<dyn Transport>,
    keychain: Arc<dyn Keychain>,
    machine: Arc<dyn Machine>,
    endpoints: Endpoints,
    guid: OnceLock<String>,
}

impl AppStore {
    pub fn new(
        transport: Arc<dyn Transport>,
        keychain: Arc<dyn Keychain>,
        machine: Arc<dyn Machine>,
    ) -> Self {
        Self {
            transport,
            keychain,
            machine,
            endpoints: Endpoints::default(),
            guid: OnceLock::new(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Uses a fixed device GUID instead of deriving one from the MAC address.
    pub fn with_guid(self, guid: impl Into<String>) -> Self {
        let _ = self.guid.set(guid.into());
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn keychain(&self) -> &dyn Keychain {
        self.keychain.as_ref()
    }

    /// Device GUID, derived from the MAC address on first use.
    pub fn guid(&self) -> Result<String> {
        if let Some(guid) = self.guid.get() {
            return Ok(guid.clone());
        }

        let mac = self.machine.mac_address()?;
        let guid = guid_from_mac(&mac);
        debug!(%mac, %guid, "derived device guid");

        Ok(self.guid.get_or_init(|| guid).clone())
    }
}

/// Error for a response carrying a failure code or unexpected shape.
pub(crate) fn server_error(customer_message: &str, response: &RawResponse) -> StoreError {
    let message = if customer_message.is_empty() {
        GENERIC_FAILURE_MESSAGE.to_string()
    } else {
        customer_message.to_string()
    };

    StoreError::Server {
        message,
        metadata: Box::new(response.dump()),
    }
}

//! Error taxonomy for App Store operations.
//!
//! Callers branch on the variant, never on the message text. Errors that come
//! from a decoded server response carry a [`ResponseDump`] for diagnostics;
//! the dump is deliberately left out of `Display`.

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Snapshot of a server response, kept for verbose logging.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResponseDump {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: serde_json::Value,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to decode property list: {0}")]
    Plist(#[from] plist::Error),

    #[error("Malformed package archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("auth code is required")]
    AuthCodeRequired,

    #[error("account is disabled")]
    AccountDisabled(Box<ResponseDump>),

    #[error("too many login attempts")]
    TooManyAttempts(Box<ResponseDump>),

    #[error("password token is expired")]
    PasswordTokenExpired,

    #[error("license required")]
    LicenseRequired,

    #[error("account already has a license for this app")]
    LicenseExists,

    #[error("item is temporarily unavailable")]
    TemporarilyUnavailable,

    #[error("subscription required")]
    SubscriptionRequired,

    #[error("purchasing or downloading paid apps is not supported")]
    PaidApp,

    #[error("country code mapping for store front ({0}) was not found")]
    InvalidStoreFront(String),

    #[error("app not found")]
    AppNotFound,

    #[error("credentials not found; log in with `ipatool auth login`")]
    CredentialsNotFound,

    #[error("failed to read mac address: {0}")]
    MacAddress(String),

    #[error("could not read bundle name")]
    BundleNotFound,

    #[error("package lists {paths} signature paths but {sinfs} sinfs were supplied")]
    SinfCountMismatch { paths: usize, sinfs: usize },

    #[error("no sinf data available for this package")]
    MissingSinf,

    #[error("invalid package: {0}")]
    InvalidPackage(String),

    #[error("{message}")]
    Server {
        message: String,
        metadata: Box<ResponseDump>,
    },
}

impl StoreError {
    /// Raw server response attached to this error, if any.
    pub fn metadata(&self) -> Option<&ResponseDump> {
        match self {
            StoreError::AccountDisabled(dump)
            | StoreError::TooManyAttempts(dump)
            | StoreError::Server { metadata: dump, .. } => Some(dump),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

//! Historical builds of an app: identifier listing, per-build metadata and
//! the concurrent version-history fetch.

use super::download::DownloadItem;
use super::{Account, App, AppStore, server_error};
use crate::error::{Result, StoreError};
use crate::http::RawResponse;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::time::SystemTime;
use tracing::{debug, info};

/// In-flight per-version requests during a history fetch.
pub const MAX_CONCURRENT_REQUESTS: usize = 5;

/// Builds selected by `Latest(0)` and by the CLI when no count is given.
pub const DEFAULT_VERSION_COUNT: usize = 10;

const VERSION_IDENTIFIERS_KEY: &str = "softwareVersionExternalIdentifiers";
const LATEST_IDENTIFIER_KEY: &str = "softwareVersionExternalIdentifier";
const SHORT_VERSION_KEY: &str = "bundleShortVersionString";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelection {
    All,
    /// At most this many identifiers from the requested end of the history.
    /// Zero means [`DEFAULT_VERSION_COUNT`].
    Latest(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionOrder {
    OldestFirst,
    #[default]
    NewestFirst,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionHistoryInfo {
    pub app: App,
    /// Every known build identifier, oldest first.
    pub version_identifiers: Vec<String>,
    pub latest_version: String,
    pub latest_version_identifier: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDetails {
    pub version_id: String,
    pub version_string: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VersionHistoryOutput {
    pub account: Account,
    pub info: VersionHistoryInfo,
    /// In selection order, regardless of completion order.
    pub details: Vec<VersionDetails>,
}

#[derive(Debug, Clone)]
pub struct VersionList {
    pub account: Account,
    pub external_version_identifiers: Vec<String>,
    pub latest_external_version_id: String,
}

#[derive(Debug, Clone)]
pub struct VersionMetadata {
    pub account: Account,
    pub display_version: String,
    pub release_date: DateTime<Utc>,
}

/// Picks identifiers from an oldest-first history.
pub fn select_versions(
    identifiers: &[String],
    selection: VersionSelection,
    order: VersionOrder,
) -> Vec<String> {
    let count = match selection {
        VersionSelection::All => identifiers.len(),
        VersionSelection::Latest(0) => DEFAULT_VERSION_COUNT.min(identifiers.len()),
        VersionSelection::Latest(n) => n.min(identifiers.len()),
    };

    match order {
        VersionOrder::OldestFirst => identifiers[..count].to_vec(),
        VersionOrder::NewestFirst => identifiers[identifiers.len() - count..]
            .iter()
            .rev()
            .cloned()
            .collect(),
    }
}

impl AppStore {
    /// Lists every external version identifier plus the latest one.
    pub async fn list_versions(&self, account: &Account, app: &App) -> Result<VersionList> {
        let (account, item, response) = self.request_item_renewing(account, app, None).await?;

        let identifiers = version_identifiers(&item)
            .ok_or_else(|| server_error("failed to read version identifiers", &response))?;
        let latest = item
            .metadata
            .get(LATEST_IDENTIFIER_KEY)
            .and_then(value_to_string)
            .ok_or_else(|| server_error("failed to read latest version identifier", &response))?;

        Ok(VersionList {
            account,
            external_version_identifiers: identifiers,
            latest_external_version_id: latest,
        })
    }

    /// Resolves one external version identifier to its display version and
    /// release date.
    pub async fn version_metadata(
        &self,
        account: &Account,
        app: &App,
        version_id: &str,
    ) -> Result<VersionMetadata> {
        let (account, item, response) = self
            .request_item_renewing(account, app, Some(version_id))
            .await?;

        let display_version = item
            .metadata_string(SHORT_VERSION_KEY)
            .map(str::to_string)
            .ok_or_else(|| server_error("failed to read display version", &response))?;
        let release_date = item
            .metadata
            .get("releaseDate")
            .and_then(value_to_datetime)
            .ok_or_else(|| server_error("failed to parse release date", &response))?;

        Ok(VersionMetadata {
            account,
            display_version,
            release_date,
        })
    }

    /// Fetches the version history and resolves the selected builds'
    /// display versions, [`MAX_CONCURRENT_REQUESTS`] at a time.
    ///
    /// A failed build is recorded in its [`VersionDetails`] without affecting
    /// the others. `on_progress` is invoked in completion order with the
    /// item's index in the selection.
    pub async fn version_history<F>(
        &self,
        account: &Account,
        app: &App,
        selection: VersionSelection,
        order: VersionOrder,
        mut on_progress: F,
    ) -> Result<VersionHistoryOutput>
    where
        F: FnMut(usize, &VersionDetails) + Send,
    {
        let (account, item, response) = self.request_item_renewing(account, app, None).await?;

        let identifiers = version_identifiers(&item)
            .ok_or_else(|| server_error("failed to read version identifiers", &response))?;

        let info = VersionHistoryInfo {
            app: App {
                id: app.id,
                bundle_id: item
                    .metadata_string("bundleIdentifier")
                    .filter(|s| !s.is_empty())
                    .unwrap_or(&app.bundle_id)
                    .to_string(),
                name: item
                    .metadata_string("bundleDisplayName")
                    .filter(|s| !s.is_empty())
                    .unwrap_or(&app.name)
                    .to_string(),
                version: app.version.clone(),
                price: app.price,
            },
            latest_version: item
                .metadata_string(SHORT_VERSION_KEY)
                .unwrap_or_default()
                .to_string(),
            latest_version_identifier: item
                .metadata
                .get(LATEST_IDENTIFIER_KEY)
                .and_then(value_to_string)
                .unwrap_or_default(),
            version_identifiers: identifiers,
        };

        let selected = select_versions(&info.version_identifiers, selection, order);
        info!(
            total = info.version_identifiers.len(),
            selected = selected.len(),
            "fetching version details"
        );

        let mut details: Vec<VersionDetails> = selected
            .iter()
            .map(|id| VersionDetails {
                version_id: id.clone(),
                ..VersionDetails::default()
            })
            .collect();

        {
            let account_ref = &account;
            let mut fetches = std::pin::pin!(
                futures::stream::iter(selected.into_iter().enumerate())
                    .map(|(index, id)| async move {
                        (index, self.version_details(account_ref, app.id, id).await)
                    })
                    .buffer_unordered(MAX_CONCURRENT_REQUESTS)
            );

            while let Some((index, detail)) = fetches.next().await {
                on_progress(index, &detail);
                details[index] = detail;
            }
        }

        Ok(VersionHistoryOutput {
            account,
            info,
            details,
        })
    }

    async fn version_details(
        &self,
        account: &Account,
        app_id: u64,
        version_id: String,
    ) -> VersionDetails {
        let result = self.request_item(account, app_id, Some(&version_id)).await;

        let (version_string, error) = match result {
            Ok((item, _)) => match item.metadata_string(SHORT_VERSION_KEY) {
                Some(version) => (version.to_string(), None),
                None => (
                    String::new(),
                    Some("version string not found in metadata".to_string()),
                ),
            },
            Err(e) => (String::new(), Some(e.to_string())),
        };
        debug!(%version_id, %version_string, ?error, "version details resolved");

        VersionDetails {
            version_id,
            success: error.is_none(),
            version_string,
            error,
        }
    }

    /// Download-endpoint request that renews an expired token once.
    async fn request_item_renewing(
        &self,
        account: &Account,
        app: &App,
        external_version_id: Option<&str>,
    ) -> Result<(Account, DownloadItem, RawResponse)> {
        let mut account = account.clone();
        let mut renewed = false;

        loop {
            match self.request_item(&account, app.id, external_version_id).await {
                Ok((item, response)) => return Ok((account, item, response)),
                Err(StoreError::PasswordTokenExpired) if !renewed => {
                    renewed = true;
                    account = self.renew(&account).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn version_identifiers(item: &DownloadItem) -> Option<Vec<String>> {
    let values = item.metadata.get(VERSION_IDENTIFIERS_KEY)?.as_array()?;
    Some(values.iter().filter_map(value_to_string).collect())
}

fn value_to_string(value: &plist::Value) -> Option<String> {
    match value {
        plist::Value::String(s) => Some(s.clone()),
        plist::Value::Integer(i) => i
            .as_unsigned()
            .map(|v| v.to_string())
            .or_else(|| i.as_signed().map(|v| v.to_string())),
        _ => None,
    }
}

fn value_to_datetime(value: &plist::Value) -> Option<DateTime<Utc>> {
    match value {
        plist::Value::Date(date) => Some(DateTime::<Utc>::from(SystemTime::from(*date))),
        plist::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|date| date.with_timezone(&Utc)),
        _ => None,
    }
}

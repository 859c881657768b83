//! Package download: signed descriptor, resumable transfer, sinf injection.

use super::{
    Account, App, AppStore, FAILURE_TYPE_LICENSE_NOT_FOUND, FAILURE_TYPE_PASSWORD_TOKEN_EXPIRED,
    server_error,
};
use crate::error::{ResponseDump, Result, StoreError};
use crate::http::{Payload, RawResponse, Request, ResponseFormat};
use crate::package;
use futures::StreamExt;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub use crate::package::Sinf;

#[derive(Debug, Default, Deserialize)]
struct DownloadResult {
    #[serde(rename = "failureType", default)]
    failure_type: String,
    #[serde(rename = "customerMessage", default)]
    customer_message: String,
    #[serde(rename = "songList", default)]
    items: Vec<DownloadItem>,
}

#[derive(Debug, Deserialize)]
struct RawSinf {
    #[serde(default)]
    id: i64,
    sinf: plist::Data,
}

/// First entry of a download-endpoint `songList`.
#[derive(Debug, Default, Deserialize)]
pub struct DownloadItem {
    #[serde(rename = "URL", default)]
    pub url: String,
    #[serde(default)]
    pub md5: String,
    #[serde(default)]
    sinfs: Vec<RawSinf>,
    #[serde(default)]
    pub metadata: plist::Dictionary,
}

impl DownloadItem {
    pub fn sinfs(&self) -> Vec<Sinf> {
        self.sinfs
            .iter()
            .map(|raw| Sinf {
                id: raw.id,
                data: raw.sinf.as_ref().to_vec(),
            })
            .collect()
    }

    pub fn metadata_string(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(plist::Value::as_string)
    }
}

/// Reports bytes written to the temporary file.
pub trait DownloadProgress: Send + Sync {
    /// `position` includes bytes already present from an earlier attempt.
    fn start(&self, total: Option<u64>, position: u64);
    fn advance(&self, position: u64);
    fn finish(&self);
}

impl DownloadProgress for () {
    fn start(&self, _total: Option<u64>, _position: u64) {}
    fn advance(&self, _position: u64) {}
    fn finish(&self) {}
}

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Destination file, or a directory for the default file name.
    pub output: Option<PathBuf>,
    /// Purchase the license when the account does not own one.
    pub acquire_license: bool,
    pub skip_existing: bool,
    pub external_version_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DownloadOutput {
    /// Account after any silent re-authentication.
    pub account: Account,
    pub destination: PathBuf,
    pub version: String,
    pub sinfs: Vec<Sinf>,
    /// The destination already existed and nothing was downloaded.
    pub skipped: bool,
}

impl AppStore {
    /// Downloads a free app and writes an installable package.
    pub async fn download(
        &self,
        account: &Account,
        app: &App,
        options: &DownloadOptions,
        progress: &dyn DownloadProgress,
    ) -> Result<DownloadOutput> {
        if !app.is_free() {
            return Err(StoreError::PaidApp);
        }

        // The looked-up version names the file unless a specific build is requested
        let early_destination = match &options.external_version_id {
            None if !app.version.is_empty() => Some(resolve_destination(
                app,
                options.output.as_deref(),
                &app.version,
            )?),
            _ => None,
        };
        if let Some(destination) = &early_destination {
            if options.skip_existing && destination.exists() {
                info!(destination = %destination.display(), "package exists, skipping download");
                return Ok(skipped(account, destination, &app.version));
            }
        }

        let (account, item) = self
            .acquire_descriptor(
                account,
                app,
                options.acquire_license,
                options.external_version_id.as_deref(),
            )
            .await?;

        let version = item
            .metadata_string("bundleShortVersionString")
            .map(str::to_string)
            .unwrap_or_else(|| app.version.clone());

        // The served build names the file when it differs from the lookup
        let destination = match early_destination {
            Some(destination) if version == app.version => destination,
            _ => {
                let destination = resolve_destination(app, options.output.as_deref(), &version)?;
                if options.skip_existing && destination.exists() {
                    info!(destination = %destination.display(), "package exists, skipping download");
                    return Ok(skipped(&account, &destination, &version));
                }
                destination
            }
        };

        let tmp = tmp_path(&destination);
        self.fetch_package(&item.url, &tmp, progress).await?;

        let sinfs = item.sinfs();
        let mut metadata = item.metadata.clone();
        metadata.insert("apple-id".to_string(), account.email.clone().into());
        metadata.insert("userName".to_string(), account.email.clone().into());

        let report = {
            let tmp = tmp.clone();
            let destination = destination.clone();
            let sinfs = sinfs.clone();
            tokio::task::spawn_blocking(move || {
                package::repackage(&tmp, &destination, &sinfs, Some(&metadata))
            })
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
        };

        let report = match report {
            Ok(report) => report,
            Err(e @ StoreError::Zip(_)) => {
                warn!("downloaded archive is unreadable, discarding partial file");
                let _ = fs::remove_file(&tmp).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        debug!(bundle = %report.bundle_name, legacy = report.legacy, "package repackaged");

        fs::remove_file(&tmp).await?;
        info!(destination = %destination.display(), %version, "download complete");

        Ok(DownloadOutput {
            account,
            destination,
            version,
            sinfs,
            skipped: false,
        })
    }

    /// Requests the signed descriptor, renewing credentials once on token
    /// expiry and, when allowed, purchasing the license once.
    async fn acquire_descriptor(
        &self,
        account: &Account,
        app: &App,
        acquire_license: bool,
        external_version_id: Option<&str>,
    ) -> Result<(Account, DownloadItem)> {
        let mut account = account.clone();
        let mut renewed = false;
        let mut purchased = false;

        loop {
            match self.request_item(&account, app.id, external_version_id).await {
                Ok((item, _)) => return Ok((account, item)),
                Err(StoreError::PasswordTokenExpired) if !renewed => {
                    renewed = true;
                    account = self.renew(&account).await?;
                }
                Err(StoreError::LicenseRequired) if acquire_license && !purchased => {
                    purchased = true;
                    info!(app_id = app.id, "no license, acquiring one");
                    account = self.purchase(&account, app).await?.account;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One download-endpoint request, returning the first item and the raw
    /// response for diagnostics.
    pub(crate) async fn request_item(
        &self,
        account: &Account,
        app_id: u64,
        external_version_id: Option<&str>,
    ) -> Result<(DownloadItem, RawResponse)> {
        let guid = self.guid()?;
        debug!(app_id, ?external_version_id, "requesting download descriptor");

        let request = download_request(
            &self.endpoints().download_url(&guid),
            account,
            app_id,
            &guid,
            external_version_id,
        );
        let response = self.transport().send(request).await?;
        let result: DownloadResult = response.decode()?;

        match result.failure_type.as_str() {
            "" => {}
            FAILURE_TYPE_PASSWORD_TOKEN_EXPIRED => return Err(StoreError::PasswordTokenExpired),
            FAILURE_TYPE_LICENSE_NOT_FOUND => return Err(StoreError::LicenseRequired),
            _ => return Err(server_error(&result.customer_message, &response)),
        }

        match result.items.into_iter().next() {
            Some(item) => Ok((item, response)),
            None => Err(server_error("invalid response", &response)),
        }
    }

    /// Streams `url` into `tmp`, resuming from its current size.
    async fn fetch_package(
        &self,
        url: &str,
        tmp: &Path,
        progress: &dyn DownloadProgress,
    ) -> Result<()> {
        let offset = match fs::metadata(tmp).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut response = self.transport().download(url, offset).await?;
        debug!(status = response.status, offset, "package transfer started");

        if response.status == 416 && offset > 0 {
            // Range starts at the end: the previous attempt finished the transfer
            progress.start(Some(offset), offset);
            progress.finish();
            return Ok(());
        }
        if response.status >= 400 {
            return Err(StoreError::Server {
                message: format!("package download failed with status {}", response.status),
                metadata: Box::new(ResponseDump {
                    status: response.status,
                    ..ResponseDump::default()
                }),
            });
        }

        let resumed = response.is_partial() && offset > 0;
        if offset > 0 && !resumed {
            warn!("server ignored range request, restarting download");
        }

        let mut file = if resumed {
            fs::OpenOptions::new().append(true).open(tmp).await?
        } else {
            fs::File::create(tmp).await?
        };

        let mut position = if resumed { offset } else { 0 };
        let total = response.content_length.map(|len| len + position);
        progress.start(total, position);

        while let Some(chunk) = response.stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            position += chunk.len() as u64;
            progress.advance(position);
        }

        file.flush().await?;
        progress.finish();

        Ok(())
    }
}

fn skipped(account: &Account, destination: &Path, version: &str) -> DownloadOutput {
    DownloadOutput {
        account: account.clone(),
        destination: destination.to_path_buf(),
        version: version.to_string(),
        sinfs: Vec::new(),
        skipped: true,
    }
}

pub(crate) fn download_request(
    url: &str,
    account: &Account,
    app_id: u64,
    guid: &str,
    external_version_id: Option<&str>,
) -> Request {
    let mut body = plist::Dictionary::new();
    body.insert("creditDisplay".into(), "".into());
    body.insert("guid".into(), guid.into());
    body.insert("salableAdamId".into(), plist::Value::Integer(app_id.into()));
    if let Some(id) = external_version_id {
        body.insert("externalVersionId".into(), id.into());
    }

    Request::post(url, ResponseFormat::Plist)
        .header("Content-Type", "application/x-apple-plist")
        .header("iCloud-DSID", account.directory_services_id.as_str())
        .header("X-Dsid", account.directory_services_id.as_str())
        .payload(Payload::Plist(body))
}

/// Final package path: `output` itself, or the default file name inside
/// `output` (or the working directory) when it is a directory or absent.
pub fn resolve_destination(app: &App, output: Option<&Path>, version: &str) -> Result<PathBuf> {
    let file_name = app.ipa_file_name(version);
    match output {
        None => Ok(std::env::current_dir()?.join(file_name)),
        Some(path) if path.is_dir() => Ok(path.join(file_name)),
        Some(path) => Ok(path.to_path_buf()),
    }
}

pub fn tmp_path(destination: &Path) -> PathBuf {
    let mut path = destination.as_os_str().to_owned();
    path.push(".tmp");
    PathBuf::from(path)
}

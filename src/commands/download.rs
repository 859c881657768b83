//! Package download command

use super::Session;
use super::utils::{field, load_account, print_json, resolve_app, success};
use crate::appstore::DownloadOptions;
use crate::progress::DownloadBar;
use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct DownloadArgs {
    pub app_id: Option<u64>,
    pub bundle_id: Option<String>,
    pub output: Option<PathBuf>,
    pub purchase: bool,
    pub skip_existing: bool,
    pub external_version_id: Option<String>,
}

/// Download a package and inject its sinfs
pub async fn download(session: &Session, args: DownloadArgs) -> Result<()> {
    let account = load_account(session)?;
    let app = resolve_app(session, &account, args.app_id, args.bundle_id.as_deref()).await?;

    let options = DownloadOptions {
        output: args.output,
        acquire_license: args.purchase,
        skip_existing: args.skip_existing,
        external_version_id: args.external_version_id,
    };

    let label = if app.name.is_empty() {
        app.id.to_string()
    } else {
        app.name.clone()
    };
    let bar = DownloadBar::new(&label, session.show_progress());

    let output = session
        .store
        .download(&account, &app, &options, &bar)
        .await
        .context("download failed")?;

    if session.json() {
        return print_json(&json!({
            "success": true,
            "output": output.destination,
            "version": output.version,
            "skipped": output.skipped,
        }));
    }

    if output.skipped {
        println!(
            "{} {} already exists, skipping",
            "→".cyan(),
            output.destination.display()
        );
    } else {
        success(&format!("Downloaded {}", label.bold()));
        field("Version", &output.version);
        field("Output", output.destination.display());
    }

    Ok(())
}

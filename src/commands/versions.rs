//! Version commands: list-versions, version-history, get-version-metadata

use super::Session;
use super::utils::{field, load_account, print_json, resolve_app};
use crate::appstore::{VersionOrder, VersionSelection};
use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use std::time::Duration;

/// List every external version identifier of an app
pub async fn list_versions(
    session: &Session,
    app_id: Option<u64>,
    bundle_id: Option<&str>,
) -> Result<()> {
    let account = load_account(session)?;
    let app = resolve_app(session, &account, app_id, bundle_id).await?;

    let list = session
        .store
        .list_versions(&account, &app)
        .await
        .context("failed to list versions")?;

    if session.json() {
        return print_json(&json!({
            "success": true,
            "externalVersionIdentifiers": list.external_version_identifiers,
            "latestExternalVersionID": list.latest_external_version_id,
        }));
    }

    for id in &list.external_version_identifiers {
        if *id == list.latest_external_version_id {
            println!("{} {}", id.bold(), "(latest)".green());
        } else {
            println!("{}", id);
        }
    }

    Ok(())
}

/// Resolve one external version identifier
pub async fn get_version_metadata(
    session: &Session,
    app_id: Option<u64>,
    bundle_id: Option<&str>,
    version_id: &str,
) -> Result<()> {
    let account = load_account(session)?;
    let app = resolve_app(session, &account, app_id, bundle_id).await?;

    let metadata = session
        .store
        .version_metadata(&account, &app, version_id)
        .await
        .with_context(|| format!("failed to read metadata for version {version_id}"))?;

    if session.json() {
        return print_json(&json!({
            "success": true,
            "externalVersionID": version_id,
            "displayVersion": metadata.display_version,
            "releaseDate": metadata.release_date.to_rfc3339(),
        }));
    }

    println!("{}", metadata.display_version.bold());
    field("External ID", version_id);
    field("Released", metadata.release_date.format("%Y-%m-%d"));

    Ok(())
}

/// Fetch version history with display versions
pub async fn version_history(
    session: &Session,
    app_id: Option<u64>,
    bundle_id: Option<&str>,
    selection: VersionSelection,
    order: VersionOrder,
) -> Result<()> {
    let account = load_account(session)?;
    let app = resolve_app(session, &account, app_id, bundle_id).await?;

    // The number of versions is only known once the history arrives
    let bar = if session.show_progress() {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {pos} versions resolved {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    } else {
        ProgressBar::hidden()
    };

    let progress_bar = bar.clone();
    let history = session
        .store
        .version_history(&account, &app, selection, order, move |_, detail| {
            progress_bar.inc(1);
            progress_bar.set_message(detail.version_id.clone());
        })
        .await;
    bar.finish_and_clear();
    let history = history.context("failed to fetch version history")?;

    if session.json() {
        return print_json(&json!({
            "success": true,
            "app": history.info.app,
            "latestVersion": history.info.latest_version,
            "latestVersionIdentifier": history.info.latest_version_identifier,
            "totalVersions": history.info.version_identifiers.len(),
            "versions": history.details,
        }));
    }

    println!(
        "{} {}",
        history.info.app.name.bold().green(),
        format!("({} versions)", history.info.version_identifiers.len()).dimmed()
    );
    for detail in &history.details {
        if detail.success {
            println!("  {} {}", detail.version_string.bold(), detail.version_id.dimmed());
        } else {
            println!(
                "  {} {} {}",
                "✗".red(),
                detail.version_id,
                detail.error.as_deref().unwrap_or("unknown error").dimmed()
            );
        }
    }

    Ok(())
}

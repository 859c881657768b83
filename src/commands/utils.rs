//! Shared helpers for command implementations

use super::Session;
use crate::appstore::{Account, App};
use anyhow::{Context, Result, bail};
use colored::Colorize;
use serde::Serialize;

pub(super) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(super) fn success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub(super) fn field(label: &str, value: impl std::fmt::Display) {
    println!("  {} {}", format!("{label}:").dimmed(), value);
}

/// Loads the stored account or explains how to create one.
pub(super) fn load_account(session: &Session) -> Result<Account> {
    session
        .store
        .account_info()
        .context("failed to read stored account")
}

/// Resolves the target app from `--app-id` or `--bundle-identifier`.
///
/// An app ID skips the catalog lookup; its price is unknown and treated as free.
pub(super) async fn resolve_app(
    session: &Session,
    account: &Account,
    app_id: Option<u64>,
    bundle_id: Option<&str>,
) -> Result<App> {
    match (app_id, bundle_id) {
        (Some(id), _) => Ok(App::with_id(id)),
        (None, Some(bundle_id)) => session
            .store
            .lookup(account, bundle_id)
            .await
            .with_context(|| format!("failed to look up {bundle_id}")),
        (None, None) => bail!("either --app-id or --bundle-identifier is required"),
    }
}

/// Reads one trimmed line from stdin.
pub(super) fn read_line(prompt: &str) -> Result<String> {
    use std::io::Write;

    print!("{prompt}");
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

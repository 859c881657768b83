//! License acquisition command

use super::Session;
use super::utils::{load_account, print_json, success};
use crate::appstore::PurchaseOutcome;
use crate::progress;
use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;

/// Obtain a license for a free app
pub async fn purchase(session: &Session, bundle_id: &str) -> Result<()> {
    let account = load_account(session)?;
    let app = session
        .store
        .lookup(&account, bundle_id)
        .await
        .with_context(|| format!("failed to look up {bundle_id}"))?;

    let spinner = progress::spinner(format!("Purchasing {}...", app.name), session.show_progress());
    let output = session.store.purchase(&account, &app).await;
    spinner.finish_and_clear();
    let output = output.context("purchase failed")?;

    if session.json() {
        return print_json(&json!({
            "success": true,
            "outcome": output.outcome,
        }));
    }

    match output.outcome {
        PurchaseOutcome::Purchased => success(&format!("Obtained license for {}", app.name.bold())),
        PurchaseOutcome::AlreadyOwned => success(&format!(
            "License for {} is already owned",
            app.name.bold()
        )),
    }

    Ok(())
}

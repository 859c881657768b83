//! Catalog commands: lookup and search

use super::Session;
use super::utils::{field, load_account, print_json};
use crate::appstore::App;
use crate::progress;
use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;

/// Resolve a bundle identifier in the account's storefront
pub async fn lookup(session: &Session, bundle_id: &str) -> Result<()> {
    let account = load_account(session)?;

    let spinner = progress::spinner(format!("Looking up {}...", bundle_id), session.show_progress());
    let app = session.store.lookup(&account, bundle_id).await;
    spinner.finish_and_clear();
    let app = app.with_context(|| format!("failed to look up {bundle_id}"))?;

    if session.json() {
        print_json(&json!({ "success": true, "app": app }))?;
    } else {
        print_app(&app);
    }

    Ok(())
}

/// Search the catalog
pub async fn search(session: &Session, term: &str, limit: u32) -> Result<()> {
    let account = load_account(session)?;

    let spinner = progress::spinner(format!("Searching for '{}'...", term), session.show_progress());
    let output = session.store.search(&account, term, limit).await;
    spinner.finish_and_clear();
    let output = output.context("search failed")?;

    if session.json() {
        return print_json(&json!({
            "success": true,
            "count": output.count,
            "apps": output.results,
        }));
    }

    if output.results.is_empty() {
        println!("{} No apps found matching '{}'", "✗".red(), term);
        return Ok(());
    }

    println!("{}", format!("==> {} results", output.count).bold().green());
    for app in &output.results {
        println!(
            "{} {} {}",
            app.name.bold(),
            app.bundle_id.cyan(),
            format!("({}, id {})", app.version, app.id).dimmed()
        );
    }

    Ok(())
}

fn print_app(app: &App) {
    println!("{}", app.name.bold().green());
    field("Bundle ID", &app.bundle_id);
    field("App ID", app.id);
    field("Version", &app.version);
    field(
        "Price",
        if app.is_free() {
            "free".to_string()
        } else {
            format!("{:.2}", app.price)
        },
    );
}

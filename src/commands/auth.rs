//! Authentication commands: login, info, revoke

use super::Session;
use super::utils::{field, load_account, print_json, read_line, success};
use crate::error::StoreError;
use crate::progress;
use anyhow::{Context, Result, bail};
use colored::Colorize;
use serde_json::json;

/// Log in and store the account
pub async fn login(
    session: &Session,
    email: &str,
    password: Option<String>,
    auth_code: Option<String>,
) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None if session.config.interactive => {
            rpassword::prompt_password("Password: ").context("failed to read password")?
        }
        None => bail!("password is required in non-interactive mode; pass --password"),
    };

    let spinner = progress::spinner(format!("Signing in as {}...", email), session.show_progress());
    let mut result = session
        .store
        .login(email, &password, auth_code.as_deref())
        .await;
    spinner.finish_and_clear();

    if matches!(result, Err(StoreError::AuthCodeRequired)) && auth_code.is_none() {
        if !session.config.interactive {
            bail!("2FA code is required; run the command again with --auth-code");
        }

        let code = read_line("2FA code: ")?;
        let spinner = progress::spinner("Verifying code...", session.show_progress());
        result = session.store.login(email, &password, Some(&code)).await;
        spinner.finish_and_clear();
    }

    let account = result.context("login failed")?;

    if session.json() {
        print_json(&json!({
            "success": true,
            "name": account.name,
            "email": account.email,
        }))?;
    } else {
        success(&format!("Logged in as {}", account.name.bold()));
        field("Email", &account.email);
    }

    Ok(())
}

/// Show the stored account
pub fn auth_info(session: &Session) -> Result<()> {
    let account = load_account(session)?;

    if session.json() {
        print_json(&json!({
            "success": true,
            "name": account.name,
            "email": account.email,
            "storeFront": account.store_front,
        }))?;
    } else {
        println!("{}", account.name.bold());
        field("Email", &account.email);
        field("Storefront", &account.store_front);
    }

    Ok(())
}

/// Remove the stored account
pub fn revoke(session: &Session) -> Result<()> {
    session
        .store
        .revoke()
        .context("failed to remove stored account")?;

    if session.json() {
        print_json(&json!({ "success": true }))?;
    } else {
        success("Signed out");
    }

    Ok(())
}

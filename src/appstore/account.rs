//! Authentication handshake and stored account management.
//!
//! The handshake is an explicit state machine: every response is reduced to a
//! [`LoginStep`] by [`classify`], and [`AppStore::login`] loops over those
//! steps. Apple redirects mid-handshake to a different `pNN-buy` host, and
//! occasionally reports invalid credentials on the first try for a correct
//! password, so both conditions are retried within a fixed request budget.

use super::{
    ACCOUNT_KEY, AppStore, CUSTOMER_MESSAGE_ACCOUNT_DISABLED, CUSTOMER_MESSAGE_BAD_LOGIN,
    FAILURE_TYPE_INVALID_CREDENTIALS, HTTP_HEADER_STORE_FRONT, server_error,
};
use crate::error::{Result, StoreError};
use crate::http::{Payload, RawResponse, Request, ResponseFormat};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Total authentication requests allowed for one login.
pub const MAX_LOGIN_ATTEMPTS: u32 = 4;

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub email: String,
    #[serde(rename = "passwordToken", default)]
    pub password_token: String,
    #[serde(rename = "directoryServicesIdentifier", default)]
    pub directory_services_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "storeFront", default)]
    pub store_front: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("email", &self.email)
            .field("name", &self.name)
            .field("directory_services_id", &self.directory_services_id)
            .field("store_front", &self.store_front)
            .finish_non_exhaustive()
    }
}

impl Account {
    /// A usable account carries both a password token and a DSID.
    pub fn is_valid(&self) -> bool {
        !self.password_token.is_empty() && !self.directory_services_id.is_empty()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginAddress {
    #[serde(rename = "firstName", default)]
    pub first_name: String,
    #[serde(rename = "lastName", default)]
    pub last_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginAccountInfo {
    #[serde(rename = "appleId", default)]
    pub apple_id: String,
    #[serde(default)]
    pub address: LoginAddress,
}

/// Decoded body of an authentication response.
#[derive(Debug, Default, Deserialize)]
pub struct LoginResult {
    #[serde(rename = "failureType", default)]
    pub failure_type: String,
    #[serde(rename = "customerMessage", default)]
    pub customer_message: String,
    #[serde(rename = "accountInfo", default)]
    pub account_info: LoginAccountInfo,
    #[serde(rename = "dsPersonId", default)]
    pub directory_services_id: String,
    #[serde(rename = "passwordToken", default)]
    pub password_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginFailure {
    AuthCodeRequired,
    AccountDisabled,
    /// Any other failure, with the message to surface.
    Server(String),
}

/// What to do after an authentication response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStep {
    /// Re-send to the given URL with the attempt counter incremented.
    Redirect(String),
    /// Re-send the identical request once.
    RetryInvalidCredentials,
    Success,
    Fail(LoginFailure),
}

/// Reduces one authentication response to the next step of the handshake.
pub fn classify(
    status: u16,
    location: Option<&str>,
    result: &LoginResult,
    attempt: u32,
    retried_invalid_credentials: bool,
    auth_code_supplied: bool,
) -> LoginStep {
    if (300..400).contains(&status) {
        return match location {
            Some(location) if !location.is_empty() => LoginStep::Redirect(location.to_string()),
            _ => LoginStep::Fail(LoginFailure::Server(
                "redirect without a location".to_string(),
            )),
        };
    }

    if attempt == 1
        && !retried_invalid_credentials
        && result.failure_type == FAILURE_TYPE_INVALID_CREDENTIALS
    {
        return LoginStep::RetryInvalidCredentials;
    }

    if result.failure_type.is_empty()
        && !auth_code_supplied
        && result.customer_message == CUSTOMER_MESSAGE_BAD_LOGIN
    {
        return LoginStep::Fail(LoginFailure::AuthCodeRequired);
    }

    if result.customer_message == CUSTOMER_MESSAGE_ACCOUNT_DISABLED {
        return LoginStep::Fail(LoginFailure::AccountDisabled);
    }

    if !result.failure_type.is_empty() {
        return LoginStep::Fail(LoginFailure::Server(result.customer_message.clone()));
    }

    if status != 200 || result.password_token.is_empty() || result.directory_services_id.is_empty()
    {
        return LoginStep::Fail(LoginFailure::Server(result.customer_message.clone()));
    }

    LoginStep::Success
}

impl AppStore {
    /// Authenticates and persists the resulting account.
    ///
    /// A 2FA code, when supplied, is appended to the password with any
    /// whitespace removed. Returns [`StoreError::AuthCodeRequired`] when the
    /// server asks for a code that was not supplied.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        auth_code: Option<&str>,
    ) -> Result<Account> {
        let guid = self.guid()?;
        let code: String = auth_code
            .unwrap_or_default()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let auth_code_supplied = !code.is_empty();

        let mut url = self.endpoints().authenticate_url(auth_code_supplied, &guid);
        let mut attempt = 1;
        let mut requests = 0;
        let mut retried_invalid_credentials = false;

        loop {
            requests += 1;
            debug!(attempt, %email, %url, "sending login request");

            let request = login_request(&url, email, password, &code, &guid, attempt);
            let response = self.transport().send(request).await?;

            // Redirect bodies are empty or HTML
            let result: LoginResult = if response.is_redirect() {
                LoginResult::default()
            } else {
                response.decode()?
            };

            let step = classify(
                response.status,
                response.header("location"),
                &result,
                attempt,
                retried_invalid_credentials,
                auth_code_supplied,
            );

            match step {
                LoginStep::Redirect(location) => {
                    if requests >= MAX_LOGIN_ATTEMPTS {
                        return Err(StoreError::TooManyAttempts(Box::new(response.dump())));
                    }
                    debug!(%location, "following authentication redirect");
                    url = location;
                    attempt += 1;
                }
                LoginStep::RetryInvalidCredentials => {
                    if requests >= MAX_LOGIN_ATTEMPTS {
                        return Err(StoreError::TooManyAttempts(Box::new(response.dump())));
                    }
                    warn!("server rejected credentials on first attempt, retrying");
                    retried_invalid_credentials = true;
                }
                LoginStep::Success => {
                    let account = self.build_account(email, password, &result, &response)?;
                    self.save_account(&account)?;
                    info!(email = %account.email, "logged in");
                    return Ok(account);
                }
                LoginStep::Fail(LoginFailure::AuthCodeRequired) => {
                    return Err(StoreError::AuthCodeRequired);
                }
                LoginStep::Fail(LoginFailure::AccountDisabled) => {
                    return Err(StoreError::AccountDisabled(Box::new(response.dump())));
                }
                LoginStep::Fail(LoginFailure::Server(message)) => {
                    return Err(server_error(&message, &response));
                }
            }
        }
    }

    /// Re-authenticates with the stored credentials, without a 2FA code.
    pub async fn renew(&self, account: &Account) -> Result<Account> {
        info!(email = %account.email, "password token expired, renewing credentials");
        self.login(&account.email, &account.password, None).await
    }

    /// Reads the stored account.
    pub fn account_info(&self) -> Result<Account> {
        let data = self.keychain().get(ACCOUNT_KEY)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Removes the stored account.
    pub fn revoke(&self) -> Result<()> {
        self.keychain().remove(ACCOUNT_KEY)
    }

    fn build_account(
        &self,
        email: &str,
        password: &str,
        result: &LoginResult,
        response: &RawResponse,
    ) -> Result<Account> {
        let store_front = response
            .header(HTTP_HEADER_STORE_FRONT)
            .filter(|sf| !sf.is_empty())
            .ok_or_else(|| server_error("missing storefront header", response))?;

        let address = &result.account_info.address;
        let name = format!("{} {}", address.first_name, address.last_name)
            .trim()
            .to_string();
        let email = if result.account_info.apple_id.is_empty() {
            email.to_string()
        } else {
            result.account_info.apple_id.clone()
        };

        Ok(Account {
            email,
            password_token: result.password_token.clone(),
            directory_services_id: result.directory_services_id.clone(),
            name,
            store_front: store_front.to_string(),
            password: password.to_string(),
        })
    }

    fn save_account(&self, account: &Account) -> Result<()> {
        let data = serde_json::to_vec(account)?;
        self.keychain().set(ACCOUNT_KEY, &data)
    }
}

fn login_request(
    url: &str,
    email: &str,
    password: &str,
    auth_code: &str,
    guid: &str,
    attempt: u32,
) -> Request {
    let mut body = plist::Dictionary::new();
    body.insert("appleId".into(), email.into());
    body.insert("attempt".into(), attempt.to_string().into());
    body.insert("createSession".into(), "true".into());
    body.insert("guid".into(), guid.into());
    body.insert("password".into(), format!("{password}{auth_code}").into());
    body.insert("rmp".into(), "0".into());
    body.insert("why".into(), "signIn".into());

    Request::post(url, ResponseFormat::Plist)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .payload(Payload::Plist(body))
}

//! License acquisition for free apps.

use super::{
    Account, App, AppStore, CUSTOMER_MESSAGE_SUBSCRIPTION_REQUIRED,
    FAILURE_TYPE_PASSWORD_TOKEN_EXPIRED, FAILURE_TYPE_TEMPORARILY_UNAVAILABLE,
    PRICING_PARAMETER_APP_STORE, PRICING_PARAMETER_APPLE_ARCADE, server_error,
};
use crate::error::{Result, StoreError};
use crate::http::{Payload, Request, ResponseFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const PURCHASE_SUCCESS: &str = "purchaseSuccess";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PurchaseOutcome {
    Purchased,
    /// The account already held a license.
    AlreadyOwned,
}

#[derive(Debug, Clone)]
pub struct PurchaseOutput {
    /// Account after any silent re-authentication.
    pub account: Account,
    pub outcome: PurchaseOutcome,
}

#[derive(Debug, Default, Deserialize)]
struct PurchaseResult {
    #[serde(rename = "failureType", default)]
    failure_type: String,
    #[serde(rename = "customerMessage", default)]
    customer_message: String,
    #[serde(rename = "jingleDocType", default)]
    jingle_doc_type: String,
    #[serde(default)]
    status: i64,
}

impl AppStore {
    /// Obtains a license for a free app.
    ///
    /// The standard pricing parameter is tried first and the Arcade variant
    /// only when the first reports the item as temporarily unavailable. An
    /// expired password token triggers one silent re-authentication.
    pub async fn purchase(&self, account: &Account, app: &App) -> Result<PurchaseOutput> {
        if !app.is_free() {
            return Err(StoreError::PaidApp);
        }

        let mut account = account.clone();
        let mut renewed = false;

        loop {
            match self.purchase_with_fallback(&account, app).await {
                Ok(()) => {
                    info!(app_id = app.id, "license acquired");
                    return Ok(PurchaseOutput {
                        account,
                        outcome: PurchaseOutcome::Purchased,
                    });
                }
                Err(StoreError::LicenseExists) => {
                    info!(app_id = app.id, "license already exists");
                    return Ok(PurchaseOutput {
                        account,
                        outcome: PurchaseOutcome::AlreadyOwned,
                    });
                }
                Err(StoreError::PasswordTokenExpired) if !renewed => {
                    renewed = true;
                    account = self.renew(&account).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn purchase_with_fallback(&self, account: &Account, app: &App) -> Result<()> {
        for pricing in [PRICING_PARAMETER_APP_STORE, PRICING_PARAMETER_APPLE_ARCADE] {
            match self.purchase_with_pricing(account, app, pricing).await {
                Err(StoreError::TemporarilyUnavailable) => {
                    warn!(%pricing, "item temporarily unavailable with pricing parameter");
                }
                other => return other,
            }
        }

        Err(StoreError::TemporarilyUnavailable)
    }

    async fn purchase_with_pricing(
        &self,
        account: &Account,
        app: &App,
        pricing: &str,
    ) -> Result<()> {
        let guid = self.guid()?;
        debug!(app_id = app.id, %pricing, "sending purchase request");

        let url = self.endpoints().purchase_url();
        let request = purchase_request(&url, account, app, &guid, pricing);
        let response = self.transport().send(request).await?;

        let result: PurchaseResult = match response.decode() {
            Ok(result) => result,
            Err(_) if response.status == 500 => PurchaseResult::default(),
            Err(e) => return Err(e),
        };

        if result.failure_type == FAILURE_TYPE_TEMPORARILY_UNAVAILABLE {
            return Err(StoreError::TemporarilyUnavailable);
        }
        if result.customer_message == CUSTOMER_MESSAGE_SUBSCRIPTION_REQUIRED {
            return Err(StoreError::SubscriptionRequired);
        }
        if result.failure_type == FAILURE_TYPE_PASSWORD_TOKEN_EXPIRED {
            return Err(StoreError::PasswordTokenExpired);
        }
        if !result.failure_type.is_empty() {
            return Err(server_error(&result.customer_message, &response));
        }
        if response.status == 500 {
            return Err(StoreError::LicenseExists);
        }
        if result.jingle_doc_type != PURCHASE_SUCCESS || result.status != 0 {
            return Err(server_error("failed to purchase app", &response));
        }

        Ok(())
    }
}

fn purchase_request(url: &str, account: &Account, app: &App, guid: &str, pricing: &str) -> Request {
    let mut body = plist::Dictionary::new();
    body.insert("appExtVrsId".into(), "0".into());
    body.insert("hasAskedToFulfillPreorder".into(), "true".into());
    body.insert("buyWithoutAuthorization".into(), "true".into());
    body.insert("hasDoneAgeCheck".into(), "true".into());
    body.insert("guid".into(), guid.into());
    body.insert("needDiv".into(), "0".into());
    body.insert("origPage".into(), format!("Software-{}", app.id).into());
    body.insert("origPageLocation".into(), "Buy".into());
    body.insert("price".into(), "0".into());
    body.insert("pricingParameters".into(), pricing.into());
    body.insert("productType".into(), "C".into());
    body.insert("salableAdamId".into(), plist::Value::Integer(app.id.into()));

    Request::post(url, ResponseFormat::Plist)
        .header("Content-Type", "application/x-apple-plist")
        .header("iCloud-DSID", account.directory_services_id.as_str())
        .header("X-Dsid", account.directory_services_id.as_str())
        .header("X-Apple-Store-Front", account.store_front.as_str())
        .header("X-Token", account.password_token.as_str())
        .payload(Payload::Plist(body))
}

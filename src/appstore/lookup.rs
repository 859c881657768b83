//! Public iTunes catalog: exact bundle lookup and free-text search.

use super::{Account, App, AppStore, server_error, storefront};
use crate::error::{Result, StoreError};
use crate::http::{Request, ResponseFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct CatalogResponse {
    #[serde(rename = "resultCount", default)]
    count: usize,
    #[serde(default)]
    results: Vec<App>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchOutput {
    pub count: usize,
    pub results: Vec<App>,
}

impl AppStore {
    /// Resolves a bundle identifier in the account's storefront.
    pub async fn lookup(&self, account: &Account, bundle_id: &str) -> Result<App> {
        let country = storefront::country_code(&account.store_front)?;
        let url = url::Url::parse_with_params(
            &self.endpoints().lookup_url(),
            &[
                ("entity", "software,iPadSoftware"),
                ("limit", "1"),
                ("media", "software"),
                ("bundleId", bundle_id),
                ("country", country),
            ],
        )?;

        debug!(%bundle_id, %country, "looking up app");
        let response = self
            .transport()
            .send(Request::get(url.as_str(), ResponseFormat::Json))
            .await?;

        if response.status != 200 {
            return Err(server_error("invalid response", &response));
        }

        let catalog: CatalogResponse = response.decode()?;
        catalog
            .results
            .into_iter()
            .next()
            .ok_or(StoreError::AppNotFound)
    }

    /// Searches the catalog in the account's storefront.
    pub async fn search(&self, account: &Account, term: &str, limit: u32) -> Result<SearchOutput> {
        let country = storefront::country_code(&account.store_front)?;
        let limit = limit.to_string();
        let url = url::Url::parse_with_params(
            &self.endpoints().search_url(),
            &[
                ("entity", "software,iPadSoftware"),
                ("limit", limit.as_str()),
                ("media", "software"),
                ("term", term),
                ("country", country),
            ],
        )?;

        debug!(%term, %country, %limit, "searching catalog");
        let response = self
            .transport()
            .send(Request::get(url.as_str(), ResponseFormat::Json))
            .await?;

        if response.status != 200 {
            return Err(server_error("request failed", &response));
        }

        let catalog: CatalogResponse = response.decode()?;
        Ok(SearchOutput {
            count: catalog.count,
            results: catalog.results,
        })
    }
}

use serde::{Deserialize, Serialize};

/// Catalog entry as returned by the public lookup and search APIs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct App {
    #[serde(rename = "trackId", default)]
    pub id: u64,
    #[serde(rename = "bundleId", default)]
    pub bundle_id: String,
    #[serde(rename = "trackName", default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub price: f64,
}

impl App {
    /// Minimal identity for operations that only need the numeric ID.
    pub fn with_id(id: u64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn is_free(&self) -> bool {
        self.price <= 0.0
    }

    /// Default package file name: `<bundleID>_<appID>_<version>.ipa`.
    pub fn ipa_file_name(&self, version: &str) -> String {
        let version = if version.is_empty() { "unknown" } else { version };
        format!(
            "{}_{}_{}.ipa",
            sanitize(&self.bundle_id),
            self.id,
            sanitize(version)
        )
    }
}

fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

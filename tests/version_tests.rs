// Version listing, metadata and concurrent history against a scripted store

mod test_helpers;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ipatool::appstore::{
    App, AppStore, Endpoints, MAX_CONCURRENT_REQUESTS, VersionOrder, VersionSelection,
};
use ipatool::http::{DownloadResponse, RawResponse, Request, Transport};
use ipatool::keychain::MemoryKeychain;
use ipatool::machine::StaticMachine;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use test_helpers::*;

const HISTORY: [u64; 4] = [100, 200, 300, 400];

fn history_item() -> RawResponse {
    history_of(&HISTORY)
}

fn history_of(history: &[u64]) -> RawResponse {
    let ids = history
        .iter()
        .map(|id| plist::Value::Integer((*id).into()))
        .collect();

    download_item(
        "https://cdn.test/latest.ipa",
        &[],
        dict(vec![
            ("softwareVersionExternalIdentifiers", plist::Value::Array(ids)),
            ("softwareVersionExternalIdentifier", plist::Value::Integer(400u64.into())),
            ("bundleShortVersionString", "4.0".into()),
            ("bundleDisplayName", "Demo".into()),
            ("bundleIdentifier", "com.example.demo".into()),
        ]),
    )
}

/// Transport that holds every request briefly and records the peak number
/// in flight at once
struct SlowTransport {
    history: Vec<u64>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowTransport {
    fn new(history: Vec<u64>) -> Self {
        Self {
            history,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transport for SlowTransport {
    async fn send(&self, request: Request) -> ipatool::Result<RawResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let version = request
            .payload
            .as_ref()
            .and_then(|p| p.plist_string("externalVersionId"));
        Ok(match version {
            None => history_of(&self.history),
            Some(id) => download_item(
                "https://cdn.test/build.ipa",
                &[],
                dict(vec![("bundleShortVersionString", format!("{id}.0").into())]),
            ),
        })
    }

    async fn download(&self, url: &str, _offset: u64) -> ipatool::Result<DownloadResponse> {
        panic!("unexpected download of {url}")
    }
}

/// Answers per requested build; build 300 always fails
fn store_handler(request: &Request) -> RawResponse {
    let version = request
        .payload
        .as_ref()
        .and_then(|p| p.plist_string("externalVersionId"));

    match version.as_deref() {
        None => history_item(),
        Some("300") => failure("5002", "build unavailable"),
        Some(id) => {
            let major = &id[..1];
            download_item(
                "https://cdn.test/build.ipa",
                &[],
                dict(vec![
                    ("bundleShortVersionString", format!("{major}.0").into()),
                    ("releaseDate", "2024-03-01T12:00:00Z".into()),
                ]),
            )
        }
    }
}

#[tokio::test]
async fn test_list_versions() {
    let transport = ScriptedTransport::handler(store_handler);
    let (store, _) = test_store(&transport);

    let list = store
        .list_versions(&test_account(), &App::with_id(42))
        .await
        .unwrap();

    assert_eq!(list.external_version_identifiers, vec!["100", "200", "300", "400"]);
    assert_eq!(list.latest_external_version_id, "400");
}

#[tokio::test]
async fn test_version_metadata() {
    let transport = ScriptedTransport::handler(store_handler);
    let (store, _) = test_store(&transport);

    let metadata = store
        .version_metadata(&test_account(), &App::with_id(42), "200")
        .await
        .unwrap();

    assert_eq!(metadata.display_version, "2.0");
    assert_eq!(
        metadata.release_date,
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn test_version_metadata_requires_release_date() {
    let transport = ScriptedTransport::handler(|_| {
        download_item(
            "https://cdn.test/build.ipa",
            &[],
            dict(vec![("bundleShortVersionString", "2.0".into())]),
        )
    });
    let (store, _) = test_store(&transport);

    let err = store
        .version_metadata(&test_account(), &App::with_id(42), "200")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "failed to parse release date");
}

#[tokio::test]
async fn test_version_history_newest_first_with_failure() {
    let transport = ScriptedTransport::handler(store_handler);
    let (store, _) = test_store(&transport);
    let mut seen = BTreeSet::new();

    let history = store
        .version_history(
            &test_account(),
            &App::with_id(42),
            VersionSelection::Latest(3),
            VersionOrder::NewestFirst,
            |index, _| {
                seen.insert(index);
            },
        )
        .await
        .unwrap();

    assert_eq!(history.info.version_identifiers.len(), 4);
    assert_eq!(history.info.latest_version, "4.0");
    assert_eq!(history.info.latest_version_identifier, "400");
    assert_eq!(history.info.app.bundle_id, "com.example.demo");

    let ids: Vec<_> = history.details.iter().map(|d| d.version_id.as_str()).collect();
    assert_eq!(ids, vec!["400", "300", "200"]);

    assert!(history.details[0].success);
    assert_eq!(history.details[0].version_string, "4.0");
    assert!(!history.details[1].success);
    assert_eq!(history.details[1].error.as_deref(), Some("build unavailable"));
    assert!(history.details[2].success);
    assert_eq!(history.details[2].version_string, "2.0");

    assert_eq!(seen, BTreeSet::from([0, 1, 2]));
    // One history request plus one per selected build
    assert_eq!(transport.requests().len(), 4);
}

#[tokio::test]
async fn test_version_history_all_oldest_first() {
    let transport = ScriptedTransport::handler(store_handler);
    let (store, _) = test_store(&transport);

    let history = store
        .version_history(
            &test_account(),
            &App::with_id(42),
            VersionSelection::All,
            VersionOrder::OldestFirst,
            |_, _| {},
        )
        .await
        .unwrap();

    let versions: Vec<_> = history
        .details
        .iter()
        .map(|d| d.version_string.as_str())
        .collect();
    assert_eq!(versions, vec!["1.0", "2.0", "", "4.0"]);
}

#[tokio::test]
async fn test_version_history_fails_without_identifiers() {
    let transport = ScriptedTransport::handler(|_| {
        download_item("https://cdn.test/latest.ipa", &[], dict(vec![]))
    });
    let (store, _) = test_store(&transport);

    let result = store
        .version_history(
            &test_account(),
            &App::with_id(42),
            VersionSelection::All,
            VersionOrder::NewestFirst,
            |_, _| {},
        )
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_version_history_bounds_concurrent_requests() {
    let history: Vec<u64> = (1..=12).collect();
    let transport = Arc::new(SlowTransport::new(history.clone()));
    let store = AppStore::new(
        transport.clone(),
        Arc::new(MemoryKeychain::new()),
        Arc::new(StaticMachine("0a:1b:2c:3d:4e:5f".to_string())),
    )
    .with_endpoints(Endpoints::single(TEST_BASE));

    let output = store
        .version_history(
            &test_account(),
            &App::with_id(42),
            VersionSelection::All,
            VersionOrder::OldestFirst,
            |_, _| {},
        )
        .await
        .unwrap();

    let peak = transport.peak.load(Ordering::SeqCst);
    assert!(peak <= MAX_CONCURRENT_REQUESTS, "peak of {peak} requests in flight");
    assert!(peak > 1, "builds were fetched one at a time");

    let expected: Vec<String> = history.iter().map(|id| id.to_string()).collect();
    let ids: Vec<_> = output.details.iter().map(|d| d.version_id.clone()).collect();
    assert_eq!(ids, expected);
    assert!(output.details.iter().all(|d| d.success));
    assert_eq!(output.details[11].version_string, "12.0");
}

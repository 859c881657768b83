// Test helpers for protocol tests
// Scripted transports and package fixtures, nothing touches the network

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use ipatool::appstore::{Account, AppStore, Endpoints};
use ipatool::http::{DownloadResponse, RawResponse, Request, ResponseFormat, Transport};
use ipatool::keychain::MemoryKeychain;
use ipatool::machine::StaticMachine;
use std::collections::{BTreeMap, VecDeque};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use zip::write::SimpleFileOptions;

pub const TEST_GUID: &str = "0A1B2C3D4E5F";
pub const TEST_BASE: &str = "https://store.test";
pub const TEST_STOREFRONT: &str = "143441-1,29";

type Handler = Box<dyn Fn(&Request) -> RawResponse + Send + Sync>;

enum Script {
    Queue(Mutex<VecDeque<RawResponse>>),
    Handler(Handler),
}

/// Transport answering from a script and recording every request
///
/// API requests are answered either in order from a queue or by a closure
/// (for concurrent callers); package downloads are always answered in order.
pub struct ScriptedTransport {
    script: Script,
    requests: Mutex<Vec<Request>>,
    downloads: Mutex<VecDeque<(u16, Vec<u8>)>>,
    download_offsets: Mutex<Vec<u64>>,
}

impl ScriptedTransport {
    pub fn queue(responses: Vec<RawResponse>) -> Arc<Self> {
        Arc::new(Self::new(Script::Queue(Mutex::new(responses.into()))))
    }

    pub fn handler(f: impl Fn(&Request) -> RawResponse + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self::new(Script::Handler(Box::new(f))))
    }

    fn new(script: Script) -> Self {
        Self {
            script,
            requests: Mutex::new(Vec::new()),
            downloads: Mutex::new(VecDeque::new()),
            download_offsets: Mutex::new(Vec::new()),
        }
    }

    /// Queue a package transfer answer
    pub fn push_download(&self, status: u16, body: Vec<u8>) {
        self.downloads.lock().unwrap().push_back((status, body));
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn download_offsets(&self) -> Vec<u64> {
        self.download_offsets.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: Request) -> ipatool::Result<RawResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let response = match &self.script {
            Script::Queue(queue) => queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected request to {}", request.url)),
            Script::Handler(f) => f(&request),
        };
        Ok(response)
    }

    async fn download(&self, url: &str, offset: u64) -> ipatool::Result<DownloadResponse> {
        self.download_offsets.lock().unwrap().push(offset);

        let (status, body) = self
            .downloads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected download of {url}"));

        Ok(DownloadResponse {
            status,
            content_length: Some(body.len() as u64),
            stream: futures::stream::iter(vec![Ok(body)]).boxed(),
        })
    }
}

/// Store wired to a scripted transport, an in-memory keychain and a fixed GUID
pub fn test_store(transport: &Arc<ScriptedTransport>) -> (AppStore, Arc<MemoryKeychain>) {
    let keychain = Arc::new(MemoryKeychain::new());
    let store = AppStore::new(
        transport.clone(),
        keychain.clone(),
        Arc::new(StaticMachine("0a:1b:2c:3d:4e:5f".to_string())),
    )
    .with_endpoints(Endpoints::single(TEST_BASE));

    (store, keychain)
}

pub fn test_account() -> Account {
    Account {
        email: "user@example.com".to_string(),
        password_token: "token".to_string(),
        directory_services_id: "1234567".to_string(),
        name: "Test User".to_string(),
        store_front: TEST_STOREFRONT.to_string(),
        password: "hunter2".to_string(),
    }
}

pub fn dict(pairs: Vec<(&str, plist::Value)>) -> plist::Dictionary {
    let mut dict = plist::Dictionary::new();
    for (key, value) in pairs {
        dict.insert(key.to_string(), value);
    }
    dict
}

pub fn plist_response(status: u16, body: plist::Dictionary) -> RawResponse {
    let mut buf = Vec::new();
    plist::to_writer_xml(&mut buf, &plist::Value::Dictionary(body)).unwrap();
    RawResponse::new(status, ResponseFormat::Plist, buf)
}

pub fn json_response(status: u16, body: serde_json::Value) -> RawResponse {
    RawResponse::new(status, ResponseFormat::Json, serde_json::to_vec(&body).unwrap())
}

pub fn redirect(location: &str) -> RawResponse {
    RawResponse::new(302, ResponseFormat::Plist, Vec::new()).with_header("Location", location)
}

pub fn failure(failure_type: &str, customer_message: &str) -> RawResponse {
    plist_response(
        200,
        dict(vec![
            ("failureType", failure_type.into()),
            ("customerMessage", customer_message.into()),
        ]),
    )
}

/// Successful authentication response carrying a token and DSID
pub fn login_success(token: &str, dsid: &str) -> RawResponse {
    let address = dict(vec![("firstName", "Test".into()), ("lastName", "User".into())]);
    let account_info = dict(vec![
        ("appleId", "user@example.com".into()),
        ("address", plist::Value::Dictionary(address)),
    ]);

    plist_response(
        200,
        dict(vec![
            ("passwordToken", token.into()),
            ("dsPersonId", dsid.into()),
            ("accountInfo", plist::Value::Dictionary(account_info)),
        ]),
    )
    .with_header("X-Set-Apple-Store-Front", TEST_STOREFRONT)
}

/// Download-endpoint response with a single song list item
pub fn download_item(url: &str, sinfs: &[(i64, &[u8])], metadata: plist::Dictionary) -> RawResponse {
    let sinfs = sinfs
        .iter()
        .map(|(id, data)| {
            plist::Value::Dictionary(dict(vec![
                ("id", plist::Value::Integer((*id).into())),
                ("sinf", plist::Value::Data(data.to_vec())),
            ]))
        })
        .collect();

    let item = dict(vec![
        ("URL", url.into()),
        ("md5", "d41d8cd98f00b204e9800998ecf8427e".into()),
        ("sinfs", plist::Value::Array(sinfs)),
        ("metadata", plist::Value::Dictionary(metadata)),
    ]);

    plist_response(
        200,
        dict(vec![("songList", plist::Value::Array(vec![plist::Value::Dictionary(item)]))]),
    )
}

pub fn plist_bytes(value: plist::Dictionary) -> Vec<u8> {
    let mut buf = Vec::new();
    plist::to_writer_xml(&mut buf, &plist::Value::Dictionary(value)).unwrap();
    buf
}

/// Build an IPA-shaped zip in memory
pub fn build_ipa(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Minimal manifest-style package for bundle `Demo`
pub fn manifest_ipa(sinf_paths: &[&str]) -> Vec<u8> {
    let info = plist_bytes(dict(vec![("CFBundleExecutable", "Demo".into())]));
    let manifest = plist_bytes(dict(vec![(
        "SinfPaths",
        plist::Value::Array(sinf_paths.iter().map(|p| (*p).into()).collect()),
    )]));

    build_ipa(&[
        ("Payload/Demo.app/Info.plist", &info),
        ("Payload/Demo.app/Demo", b"\xcf\xfa\xed\xfe binary"),
        ("Payload/Demo.app/SC_Info/Manifest.plist", &manifest),
    ])
}

/// Decompressed contents of every entry, keyed by name
pub fn read_entries(path: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut archive = zip::ZipArchive::new(std::fs::File::open(path).unwrap()).unwrap();
    let mut entries = BTreeMap::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).unwrap();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        entries.insert(entry.name().to_string(), data);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_answers_in_order() {
        let transport = ScriptedTransport::queue(vec![redirect("https://a"), failure("1", "x")]);
        let first = transport
            .send(Request::get("https://one", ResponseFormat::Plist))
            .await
            .unwrap();
        let second = transport
            .send(Request::get("https://two", ResponseFormat::Plist))
            .await
            .unwrap();

        assert_eq!(first.status, 302);
        assert_eq!(second.status, 200);
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn test_build_ipa_round_trips_entries() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("app.ipa");
        std::fs::write(&path, build_ipa(&[("a.txt", b"hello")])).unwrap();

        assert_eq!(read_entries(&path)["a.txt"], b"hello");
    }
}

//! HTTP transport for the private and public App Store APIs.
//!
//! The [`Transport`] trait is the seam between protocol logic and the network:
//! [`HttpClient`] is the reqwest-backed implementation used by the CLI, and
//! tests substitute scripted transports.
//!
//! Two details matter for the protocol:
//! - redirects are **not** followed on API requests, because the
//!   authentication handshake needs to see the `3xx` and its `Location`;
//! - request bodies are either XML property lists or URL-encoded forms, and
//!   responses are decoded as JSON or property lists depending on the endpoint.

use crate::error::{ResponseDump, Result, StoreError};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// User agent of Apple Configurator, which the private API expects.
pub const DEFAULT_USER_AGENT: &str =
    "Configurator/2.15 (Macintosh; OperatingSystem X 11.0.0; 16G29) AppleWebKit/2603.3.8";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// How the response body is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Plist,
}

/// Request body encodings.
#[derive(Debug, Clone)]
pub enum Payload {
    /// XML property list dictionary.
    Plist(plist::Dictionary),
    /// Percent-encoded `key=value` pairs.
    UrlForm(Vec<(String, String)>),
}

impl Payload {
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Payload::Plist(dict) => {
                let mut buf = Vec::new();
                plist::to_writer_xml(&mut buf, &plist::Value::Dictionary(dict.clone()))?;
                Ok(buf)
            }
            Payload::UrlForm(pairs) => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                    .finish();
                Ok(encoded.into_bytes())
            }
        }
    }

    /// Looks up a string value in a plist payload (used by logging and tests).
    pub fn plist_string(&self, key: &str) -> Option<String> {
        match self {
            Payload::Plist(dict) => match dict.get(key)? {
                plist::Value::String(s) => Some(s.clone()),
                plist::Value::Integer(i) => i
                    .as_unsigned()
                    .map(|v| v.to_string())
                    .or_else(|| i.as_signed().map(|v| v.to_string())),
                _ => None,
            },
            Payload::UrlForm(pairs) => pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub payload: Option<Payload>,
    pub format: ResponseFormat,
}

impl Request {
    pub fn get(url: impl Into<String>, format: ResponseFormat) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            payload: None,
            format,
        }
    }

    pub fn post(url: impl Into<String>, format: ResponseFormat) -> Self {
        Self {
            method: Method::Post,
            ..Self::get(url, format)
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status, headers and undecoded body of a response.
///
/// Header names are stored lowercased so lookups are case-insensitive.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub format: ResponseFormat,
}

impl RawResponse {
    pub fn new(status: u16, format: ResponseFormat, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body,
            format,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Decodes the body; an empty body yields `T::default()`.
    pub fn decode<T: DeserializeOwned + Default>(&self) -> Result<T> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        match self.format {
            ResponseFormat::Json => Ok(serde_json::from_slice(&self.body)?),
            ResponseFormat::Plist => Ok(plist::from_bytes(&self.body)?),
        }
    }

    /// Best-effort structured rendering of the response for diagnostics.
    pub fn dump(&self) -> ResponseDump {
        let decoded = match self.format {
            ResponseFormat::Json => serde_json::from_slice(&self.body).ok(),
            ResponseFormat::Plist => plist::from_bytes::<plist::Value>(&self.body)
                .ok()
                .and_then(|v| serde_json::to_value(v).ok()),
        };
        let body = decoded.unwrap_or_else(|| {
            serde_json::Value::String(String::from_utf8_lossy(&self.body).into_owned())
        });

        ResponseDump {
            status: self.status,
            headers: self.headers.clone(),
            body,
        }
    }
}

/// A streaming GET response.
pub struct DownloadResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub stream: BoxStream<'static, Result<Vec<u8>>>,
}

impl DownloadResponse {
    /// True when the server honoured a byte-range request.
    pub fn is_partial(&self) -> bool {
        self.status == 206
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Result<RawResponse>;

    /// Streams `url`, asking for bytes from `offset` onward when it is non-zero.
    async fn download(&self, url: &str, offset: u64) -> Result<DownloadResponse>;
}

/// Reqwest-backed transport with a session cookie store.
#[derive(Clone)]
pub struct HttpClient {
    api: reqwest::Client,
    downloads: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let api = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        // Package downloads can take minutes, so only the connect phase is bounded
        let downloads = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self { api, downloads })
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn send(&self, request: Request) -> Result<RawResponse> {
        let mut builder = match request.method {
            Method::Get => self.api.get(&request.url),
            Method::Post => self.api.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(payload) = &request.payload {
            builder = builder.body(payload.encode()?);
        }

        debug!(method = ?request.method, url = %request.url, "sending request");
        let response = builder.send().await?;
        let status = response.status().as_u16();

        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else {
                continue;
            };
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str("; ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        let body = response.bytes().await?.to_vec();
        debug!(status, bytes = body.len(), "received response");

        Ok(RawResponse {
            status,
            headers,
            body,
            format: request.format,
        })
    }

    async fn download(&self, url: &str, offset: u64) -> Result<DownloadResponse> {
        let mut builder = self.downloads.get(url);
        if offset > 0 {
            builder = builder.header(reqwest::header::RANGE, format!("bytes={offset}-"));
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let content_length = response.content_length();
        debug!(status, offset, ?content_length, "download started");

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(StoreError::from))
            .boxed();

        Ok(DownloadResponse {
            status,
            content_length,
            stream,
        })
    }
}

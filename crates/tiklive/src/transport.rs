//! HTTP seam between the resolver/capture loop and the network.
//!
//! Everything above this module talks to [`Transport`]; the production
//! implementation is [`ReqwestTransport`], tests plug in scripted fakes.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, Proxy};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ClientOptions;

/// Body of a live stream, chunk by chunk.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("stream read failed: {0}")]
    Read(String),

    #[error("http client setup failed: {0}")]
    Client(String),
}

/// A GET request. Query pairs are appended to `url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub follow_redirects: bool,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            follow_redirects: true,
        }
    }

    pub fn query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    /// Keep 3xx answers instead of following them. Used for redirect-signature probes.
    pub fn no_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }

    /// Value of a query parameter, first occurrence.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Body as JSON. Non-JSON bodies come back as `Value::Null`.
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET. 4xx answers are returned, 5xx answers are errors.
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Open a long-lived body stream for a media URL.
    async fn open_stream(&self, url: &str) -> Result<ByteStream, TransportError>;

    /// Store a cookie for every following request.
    fn add_cookie(&self, name: &str, value: &str);
}

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/126.0.6478.127 Safari/537.36";

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,\
     image/webp,image/apng,application/json,text/plain,*/*;q=0.8,\
     application/signed-exchange;v=b3;q=0.7";

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US"));
    headers.insert(header::REFERER, HeaderValue::from_static("https://www.tiktok.com/"));
    headers.insert(header::ORIGIN, HeaderValue::from_static("https://www.tiktok.com"));
    headers.insert(
        header::UPGRADE_INSECURE_REQUESTS,
        HeaderValue::from_static("1"),
    );
    headers.insert(
        "sec-ch-ua",
        HeaderValue::from_static(r#""Not/A)Brand";v="8", "Chromium";v="126""#),
    );
    headers.insert("sec-ch-ua-mobile", HeaderValue::from_static("?0"));
    headers.insert("sec-ch-ua-platform", HeaderValue::from_static(r#""Windows""#));
    headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("priority", HeaderValue::from_static("u=0, i"));
    headers
}

/// reqwest-backed transport with a shared cookie jar.
pub struct ReqwestTransport {
    /// Follows redirects, bounded total timeout.
    client: Client,
    /// Never follows redirects.
    probe: Client,
    /// No total timeout; live bodies run for hours.
    streaming: Client,
    cookies: RwLock<BTreeMap<String, String>>,
}

impl ReqwestTransport {
    pub fn new(options: &ClientOptions) -> Result<Self, TransportError> {
        let proxy = match options.proxy.as_deref() {
            Some(url) => match Proxy::all(url) {
                Ok(proxy) => {
                    info!(proxy = %url, "Routing requests through proxy");
                    Some(proxy)
                }
                Err(e) => {
                    warn!(proxy = %url, error = %e, "Unusable proxy, continuing without it");
                    None
                }
            },
            None => None,
        };

        let timeout = options.request_timeout;
        let client = build(Policy::limited(5), Some(timeout), proxy.clone())?;
        let probe = build(Policy::none(), Some(timeout), proxy.clone())?;
        let streaming = build(Policy::limited(5), None, proxy)?;

        let cookies = options
            .cookies
            .pairs()
            .into_iter()
            .collect::<BTreeMap<_, _>>();

        Ok(Self {
            client,
            probe,
            streaming,
            cookies: RwLock::new(cookies),
        })
    }

    fn cookie_header(&self) -> Option<String> {
        let jar = self.cookies.read().unwrap_or_else(PoisonError::into_inner);
        if jar.is_empty() {
            return None;
        }
        Some(
            jar.iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

fn build(
    redirects: Policy,
    timeout: Option<Duration>,
    proxy: Option<Proxy>,
) -> Result<Client, TransportError> {
    let mut builder: ClientBuilder = Client::builder()
        .default_headers(browser_headers())
        .redirect(redirects)
        .connect_timeout(Duration::from_secs(15));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(proxy) = proxy {
        builder = builder.proxy(proxy);
    }
    builder
        .build()
        .map_err(|e| TransportError::Client(e.to_string()))
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let client = if request.follow_redirects {
            &self.client
        } else {
            &self.probe
        };

        let mut builder = client.get(&request.url).query(&request.query);
        if let Some(cookies) = self.cookie_header() {
            builder = builder.header(header::COOKIE, cookies);
        }

        let response = builder.send().await.map_err(|e| TransportError::Request {
            url: request.url.clone(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(TransportError::Status {
                url: request.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| TransportError::Request {
            url: request.url.clone(),
            message: e.to_string(),
        })?;
        debug!(url = %request.url, status = status.as_u16(), bytes = body.len(), "GET");

        Ok(HttpResponse {
            status: status.as_u16(),
            body,
        })
    }

    async fn open_stream(&self, url: &str) -> Result<ByteStream, TransportError> {
        let mut builder = self.streaming.get(url);
        if let Some(cookies) = self.cookie_header() {
            builder = builder.header(header::COOKIE, cookies);
        }

        let response = builder.send().await.map_err(|e| TransportError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::Read(e.to_string())));
        Ok(Box::pin(stream))
    }

    fn add_cookie(&self, name: &str, value: &str) {
        let mut jar = self.cookies.write().unwrap_or_else(PoisonError::into_inner);
        jar.insert(name.to_string(), value.to_string());
    }
}

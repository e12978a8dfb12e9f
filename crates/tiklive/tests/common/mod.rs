//! Common test utilities for tiklive tests
//!
//! A scripted [`Transport`] that answers GETs from a closure and serves byte
//! streams from a factory, recording everything it was asked for.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::time::Instant;

use tiklive::postprocess::PostProcessError;
use tiklive::{ByteStream, HttpRequest, HttpResponse, Transcoder, Transport, TransportError};

type Handler = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync>;
type StreamFactory = Box<dyn Fn(&str) -> Result<ByteStream, TransportError> + Send + Sync>;

pub struct FakeTransport {
    handler: Handler,
    streams: StreamFactory,
    pub requests: Mutex<Vec<HttpRequest>>,
    pub stream_opens: Mutex<Vec<Instant>>,
    pub cookies: Mutex<Vec<(String, String)>>,
}

impl FakeTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            streams: Box::new(|url| {
                Err(TransportError::Status {
                    url: url.to_string(),
                    status: 404,
                })
            }),
            requests: Mutex::new(Vec::new()),
            stream_opens: Mutex::new(Vec::new()),
            cookies: Mutex::new(Vec::new()),
        }
    }

    pub fn with_streams<F>(mut self, factory: F) -> Self
    where
        F: Fn(&str) -> Result<ByteStream, TransportError> + Send + Sync + 'static,
    {
        self.streams = Box::new(factory);
        self
    }

    /// Number of GETs whose URL ends with `suffix`.
    pub fn hits(&self, suffix: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.ends_with(suffix))
            .count()
    }

    pub fn opens(&self) -> Vec<Instant> {
        self.stream_opens.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.handler)(request)
    }

    async fn open_stream(&self, url: &str) -> Result<ByteStream, TransportError> {
        self.stream_opens.lock().unwrap().push(Instant::now());
        (self.streams)(url)
    }

    fn add_cookie(&self, name: &str, value: &str) {
        self.cookies
            .lock()
            .unwrap()
            .push((name.to_string(), value.to_string()));
    }
}

pub fn ok(body: Value) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::new(200, body.to_string()))
}

pub fn page(status: u16, body: &str) -> Result<HttpResponse, TransportError> {
    Ok(HttpResponse::new(status, body))
}

pub fn user_room(room: &str) -> Value {
    json!({ "data": { "user": { "roomId": room } } })
}

pub fn alive(is_alive: bool) -> Value {
    json!({ "data": [{ "alive": is_alive }] })
}

/// Room info with one SDK quality pointing at `url`.
pub fn room_info(handle: &str, url: &str) -> Value {
    json!({
        "status_code": 0,
        "data": {
            "owner": { "display_id": handle },
            "stream_url": {
                "live_core_sdk_data": {
                    "pull_data": {
                        "options": { "qualities": [{ "sdk_key": "origin", "level": 10 }] },
                        "stream_data": json!({
                            "data": { "origin": { "main": { "flv": url } } }
                        }).to_string(),
                    }
                }
            }
        }
    })
}

/// `count` chunks of `size` bytes, one every `gap`, then end of stream.
/// `delivered` counts bytes handed to the consumer.
pub fn timed_stream(
    count: usize,
    size: usize,
    gap: Duration,
    delivered: Arc<AtomicU64>,
) -> ByteStream {
    let stream = futures::stream::iter(0..count).then(move |i| {
        let delivered = delivered.clone();
        async move {
            tokio::time::sleep(gap).await;
            delivered.fetch_add(size as u64, Ordering::SeqCst);
            Ok::<_, TransportError>(Bytes::from(vec![(i % 251) as u8; size]))
        }
    });
    Box::pin(stream)
}

/// Like [`timed_stream`] but never ends after the last chunk.
pub fn endless_stream(
    count: usize,
    size: usize,
    gap: Duration,
    delivered: Arc<AtomicU64>,
) -> ByteStream {
    Box::pin(timed_stream(count, size, gap, delivered).chain(futures::stream::pending()))
}

/// Transcoder that leaves the raw file alone and records what it saw.
#[derive(Default)]
pub struct NoopTranscoder {
    pub seen: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl Transcoder for NoopTranscoder {
    async fn transcode(&self, raw: &Path) -> Result<PathBuf, PostProcessError> {
        self.seen.lock().unwrap().push(raw.to_path_buf());
        Ok(raw.to_path_buf())
    }
}

pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    files.sort();
    files
}

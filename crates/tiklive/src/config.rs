//! Typed watch configuration consumed by the recorder.
//!
//! The binary builds these from CLI flags layered over [`tikconf::TikConfig`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tikconf::{CookiesConfig, TikConfig};

use crate::error::{RecorderError, Result};

/// Who to record. Resolution fills in whatever is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    Handle(String),
    Url(String),
    Room(String),
}

impl WatchTarget {
    /// Handle target with any leading `@` removed.
    pub fn handle(raw: &str) -> Self {
        WatchTarget::Handle(raw.trim().trim_start_matches('@').to_string())
    }
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchTarget::Handle(handle) => write!(f, "@{}", handle),
            WatchTarget::Url(url) => write!(f, "{}", url),
            WatchTarget::Room(room) => write!(f, "room {}", room),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchMode {
    /// Record once if live right now.
    SingleShot,
    /// Keep checking one subject and record every broadcast.
    Polling,
    /// Watch every followed account and record whoever goes live.
    FanOut,
}

impl WatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchMode::SingleShot => "manual",
            WatchMode::Polling => "automatic",
            WatchMode::FanOut => "followers",
        }
    }
}

impl fmt::Display for WatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Required for single-shot and polling, ignored by fan-out.
    pub target: Option<WatchTarget>,
    pub mode: WatchMode,
    /// Wait between polls or follower scans.
    pub interval: Duration,
    /// Stop a capture after this long.
    pub duration: Option<Duration>,
    pub output_dir: PathBuf,
    pub upload_enabled: bool,
}

impl WatchConfig {
    pub fn new(target: Option<WatchTarget>, mode: WatchMode) -> Self {
        Self {
            target,
            mode,
            interval: Duration::from_secs(5 * 60),
            duration: None,
            output_dir: PathBuf::from("."),
            upload_enabled: false,
        }
    }

    /// Defaults taken from the loaded configuration.
    pub fn from_config(config: &TikConfig, target: Option<WatchTarget>, mode: WatchMode) -> Self {
        Self {
            target,
            mode,
            interval: Duration::from_secs(config.watch.interval_minutes * 60),
            duration: config.watch.duration_secs.map(Duration::from_secs),
            output_dir: config.paths.output_dir.clone(),
            upload_enabled: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval < Duration::from_secs(60) {
            return Err(RecorderError::InvalidConfig(
                "interval must be at least 1 minute".to_string(),
            ));
        }
        if self.duration.is_some_and(|d| d.is_zero()) {
            return Err(RecorderError::InvalidConfig(
                "duration must be strictly positive".to_string(),
            ));
        }
        match (self.mode, &self.target) {
            (WatchMode::SingleShot | WatchMode::Polling, None) => Err(
                RecorderError::InvalidConfig(format!("{} mode needs a target", self.mode)),
            ),
            _ => Ok(()),
        }
    }
}

/// HTTP client settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub cookies: CookiesConfig,
    pub proxy: Option<String>,
    pub request_timeout: Duration,
}

impl ClientOptions {
    pub fn from_config(config: &TikConfig) -> Self {
        Self {
            cookies: config.cookies.clone(),
            proxy: config.network.proxy.clone(),
            request_timeout: Duration::from_secs(config.network.request_timeout_secs),
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            cookies: CookiesConfig::default(),
            proxy: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

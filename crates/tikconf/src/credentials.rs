//! Session cookies and chat-upload credentials.
//!
//! Both can come from the TOML layers, from environment variables, or from the
//! legacy `cookies.json` / `telegram.json` files that older installs keep next
//! to the binary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::ConfigError;

/// Cookie name carrying the session token.
pub const SESSION_COOKIE: &str = "sessionid_ss";

/// Cookie name carrying the target data-center tag.
pub const TARGET_IDC_COOKIE: &str = "tt-target-idc";

/// Platform session cookies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookiesConfig {
    /// Session token. Empty means anonymous.
    #[serde(default)]
    pub sessionid_ss: String,

    /// Data-center tag the session belongs to.
    /// Default: useast2a
    #[serde(default = "CookiesConfig::default_target_idc", rename = "tt-target-idc")]
    pub tt_target_idc: String,

    /// Any other cookies to send verbatim.
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, String>,
}

impl CookiesConfig {
    fn default_target_idc() -> String {
        "useast2a".to_string()
    }

    /// True when a session token is present.
    pub fn is_authenticated(&self) -> bool {
        !self.sessionid_ss.is_empty()
    }

    /// All non-empty cookies as `(name, value)` pairs, session cookies first.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.extra.len() + 2);
        if !self.sessionid_ss.is_empty() {
            pairs.push((SESSION_COOKIE.to_string(), self.sessionid_ss.clone()));
        }
        if !self.tt_target_idc.is_empty() {
            pairs.push((TARGET_IDC_COOKIE.to_string(), self.tt_target_idc.clone()));
        }
        for (name, value) in &self.extra {
            if !value.is_empty() {
                pairs.push((name.clone(), value.clone()));
            }
        }
        pairs
    }

    /// Overlay non-empty values from `other`.
    pub fn merge(&mut self, other: CookiesConfig) {
        if !other.sessionid_ss.is_empty() {
            self.sessionid_ss = other.sessionid_ss;
        }
        if !other.tt_target_idc.is_empty() && other.tt_target_idc != Self::default_target_idc() {
            self.tt_target_idc = other.tt_target_idc;
        }
        self.extra.extend(other.extra);
    }
}

impl Default for CookiesConfig {
    fn default() -> Self {
        Self {
            sessionid_ss: String::new(),
            tt_target_idc: Self::default_target_idc(),
            extra: BTreeMap::new(),
        }
    }
}

/// Telegram credentials for uploading finished recordings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub api_id: String,
    #[serde(default)]
    pub api_hash: String,
    pub bot_token: String,
    pub chat_id: i64,
}

/// Upload destinations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

/// Load a legacy `cookies.json` (flat string map).
pub fn load_cookies_json(path: &Path) -> Result<CookiesConfig, ConfigError> {
    let contents = read(path)?;
    serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load a legacy `telegram.json`.
pub fn load_telegram_json(path: &Path) -> Result<TelegramConfig, ConfigError> {
    let contents = read(path)?;
    serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })
}

//! Configuration loading for the tiklive recorder.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/tiklive/config.toml` (system)
//! 2. `~/.config/tiklive/config.toml` (user)
//! 3. `./tiklive.toml` (local override, replaced by `--config <path>`)
//! 4. Environment variables (`TIKTOK_*`, `TELEGRAM_*`, `TIKLIVE_LOG_LEVEL`, `RUST_LOG`)
//!
//! Legacy `cookies.json` and `telegram.json` files are loaded explicitly with
//! [`load_cookies_json`] and [`load_telegram_json`].
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! output_dir = "~/Videos/live"
//!
//! [network]
//! proxy = "http://127.0.0.1:8080"
//!
//! [cookies]
//! sessionid_ss = "..."
//! tt-target-idc = "useast2a"
//!
//! [watch]
//! interval_minutes = 5
//!
//! [upload.telegram]
//! bot_token = "123:abc"
//! chat_id = -1001234
//! ```

pub mod credentials;
pub mod infra;
pub mod loader;

pub use credentials::{
    load_cookies_json, load_telegram_json, CookiesConfig, TelegramConfig, UploadConfig,
    SESSION_COOKIE, TARGET_IDC_COOKIE,
};
pub use infra::{NetworkConfig, PathsConfig, TelemetryConfig, WatchDefaults};
pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete recorder configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TikConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub cookies: CookiesConfig,

    #[serde(default)]
    pub watch: WatchDefaults,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl TikConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with `config_path` replacing the local `./tiklive.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = TikConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::load_from_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string. The session token is masked.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# tiklive configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "output_dir = \"{}\"\n",
            self.paths.output_dir.display()
        ));

        output.push_str("\n[network]\n");
        if let Some(proxy) = &self.network.proxy {
            output.push_str(&format!("proxy = \"{}\"\n", proxy));
        }
        output.push_str(&format!(
            "request_timeout_secs = {}\n",
            self.network.request_timeout_secs
        ));

        output.push_str("\n[cookies]\n");
        let session = if self.cookies.sessionid_ss.is_empty() {
            ""
        } else {
            "<set>"
        };
        output.push_str(&format!("sessionid_ss = \"{}\"\n", session));
        output.push_str(&format!("tt-target-idc = \"{}\"\n", self.cookies.tt_target_idc));
        for name in self.cookies.extra.keys() {
            output.push_str(&format!("{} = \"<set>\"\n", name));
        }

        output.push_str("\n[watch]\n");
        output.push_str(&format!(
            "interval_minutes = {}\n",
            self.watch.interval_minutes
        ));
        if let Some(secs) = self.watch.duration_secs {
            output.push_str(&format!("duration_secs = {}\n", secs));
        }

        if let Some(telegram) = &self.upload.telegram {
            output.push_str("\n[upload.telegram]\n");
            output.push_str("bot_token = \"<set>\"\n");
            output.push_str(&format!("chat_id = {}\n", telegram.chat_id));
        }

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output
    }
}

//! Config file discovery, layering, and environment variable overlay.

use crate::{ConfigError, TelegramConfig, TikConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/tiklive/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("tiklive/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("tiklive.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Layer a TOML file on top of `config`.
pub fn load_from_file(config: &mut TikConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    apply_toml(config, &contents, path)
}

/// Apply every key present in `contents`, leaving absent keys untouched.
pub(crate) fn apply_toml(
    config: &mut TikConfig,
    contents: &str,
    path: &Path,
) -> Result<(), ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let invalid = |key: &str, expected: &str| ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("{} must be {}", key, expected),
    };

    if let Some(paths) = table.get("paths").and_then(|v| v.as_table()) {
        if let Some(v) = paths.get("output_dir").and_then(|v| v.as_str()) {
            config.paths.output_dir = expand_path(v);
        }
    }

    if let Some(network) = table.get("network").and_then(|v| v.as_table()) {
        if let Some(v) = network.get("proxy").and_then(|v| v.as_str()) {
            config.network.proxy = non_empty(v);
        }
        if let Some(v) = network.get("request_timeout_secs") {
            let secs = v
                .as_integer()
                .filter(|s| *s > 0)
                .ok_or_else(|| invalid("network.request_timeout_secs", "a positive integer"))?;
            config.network.request_timeout_secs = secs as u64;
        }
    }

    if let Some(cookies) = table.get("cookies").and_then(|v| v.as_table()) {
        for (name, value) in cookies {
            let Some(value) = value.as_str() else {
                return Err(invalid(&format!("cookies.{}", name), "a string"));
            };
            match name.as_str() {
                crate::SESSION_COOKIE => config.cookies.sessionid_ss = value.to_string(),
                crate::TARGET_IDC_COOKIE | "tt_target_idc" => {
                    config.cookies.tt_target_idc = value.to_string()
                }
                _ => {
                    config.cookies.extra.insert(name.clone(), value.to_string());
                }
            }
        }
    }

    if let Some(watch) = table.get("watch").and_then(|v| v.as_table()) {
        if let Some(v) = watch.get("interval_minutes") {
            let minutes = v
                .as_integer()
                .filter(|m| *m >= 1)
                .ok_or_else(|| invalid("watch.interval_minutes", "one minute or more"))?;
            config.watch.interval_minutes = minutes as u64;
        }
        if let Some(v) = watch.get("duration_secs") {
            let secs = v
                .as_integer()
                .filter(|s| *s > 0)
                .ok_or_else(|| invalid("watch.duration_secs", "a positive integer"))?;
            config.watch.duration_secs = Some(secs as u64);
        }
    }

    if let Some(telegram) = table
        .get("upload")
        .and_then(|v| v.get("telegram"))
        .and_then(|v| v.as_table())
    {
        let parsed: TelegramConfig = toml::Value::Table(telegram.clone())
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        config.upload.telegram = Some(parsed);
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.telemetry.log_level = v.to_string();
        }
    }

    Ok(())
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut TikConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

/// Same as [`apply_env_overrides`] with an injectable lookup, so tests don't touch the process env.
pub(crate) fn apply_overrides_from<F>(config: &mut TikConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut take = |key: &str| {
        let value = lookup(key).filter(|v| !v.is_empty());
        if value.is_some() {
            sources.env_overrides.push(key.to_string());
        }
        value
    };

    if let Some(v) = take("TIKTOK_SESSION_ID") {
        config.cookies.sessionid_ss = v;
    }
    if let Some(v) = take("TIKTOK_TARGET_IDC") {
        config.cookies.tt_target_idc = v;
    }
    if let Some(v) = take("TIKTOK_PROXY") {
        config.network.proxy = Some(v);
    }
    if let Some(v) = take("TIKTOK_OUTPUT_DIR") {
        config.paths.output_dir = expand_path(&v);
    }

    let api_id = take("TELEGRAM_API_ID");
    let api_hash = take("TELEGRAM_API_HASH");
    let bot_token = take("TELEGRAM_BOT_TOKEN");
    let chat_id = take("TELEGRAM_CHAT_ID").and_then(|v| v.parse::<i64>().ok());
    if let (Some(bot_token), Some(chat_id)) = (bot_token, chat_id) {
        config.upload.telegram = Some(TelegramConfig {
            api_id: api_id.unwrap_or_default(),
            api_hash: api_hash.unwrap_or_default(),
            bot_token,
            chat_id,
        });
    }

    if let Some(v) = take("TIKLIVE_LOG_LEVEL") {
        config.telemetry.log_level = v;
    }
    // RUST_LOG wins over our own knob
    if let Some(v) = take("RUST_LOG") {
        config.telemetry.log_level = v;
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            home.join(stripped)
        } else {
            PathBuf::from(path)
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            if let Ok(var_value) = env::var(var_name) {
                PathBuf::from(var_value).join(&stripped[slash_pos + 1..])
            } else {
                PathBuf::from(path)
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}

fn non_empty(v: &str) -> Option<String> {
    if v.trim().is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/recordings");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().ends_with("recordings"));
    }

    #[test]
    fn test_expand_path_absolute() {
        assert_eq!(expand_path("/srv/live"), PathBuf::from("/srv/live"));
    }

    #[test]
    fn test_discover_config_files() {
        let _files = discover_config_files();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut config = TikConfig::default();
        apply_toml(
            &mut config,
            "[paths]\noutput_dir = \"/data/live\"\n",
            Path::new("test.toml"),
        )
        .unwrap();

        assert_eq!(config.paths.output_dir, PathBuf::from("/data/live"));
        assert_eq!(config.watch.interval_minutes, 5);
        assert_eq!(config.cookies.tt_target_idc, "useast2a");
    }

    #[test]
    fn test_full_toml() {
        let toml = r#"
[paths]
output_dir = "/data/live"

[network]
proxy = "http://127.0.0.1:8888"
request_timeout_secs = 10

[cookies]
sessionid_ss = "secret"
tt-target-idc = "eu-ttp2"
msToken = "abc"

[watch]
interval_minutes = 2
duration_secs = 3600

[upload.telegram]
bot_token = "123:abc"
chat_id = -100200

[telemetry]
log_level = "debug"
"#;
        let mut config = TikConfig::default();
        apply_toml(&mut config, toml, Path::new("test.toml")).unwrap();

        assert_eq!(config.network.proxy.as_deref(), Some("http://127.0.0.1:8888"));
        assert_eq!(config.network.request_timeout_secs, 10);
        assert_eq!(config.cookies.sessionid_ss, "secret");
        assert_eq!(config.cookies.tt_target_idc, "eu-ttp2");
        assert_eq!(config.cookies.extra.get("msToken"), Some(&"abc".to_string()));
        assert_eq!(config.watch.interval_minutes, 2);
        assert_eq!(config.watch.duration_secs, Some(3600));
        let telegram = config.upload.telegram.unwrap();
        assert_eq!(telegram.chat_id, -100200);
        assert_eq!(telegram.api_id, "");
        assert_eq!(config.telemetry.log_level, "debug");
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = TikConfig::default();
        let err = apply_toml(
            &mut config,
            "[watch]\ninterval_minutes = 0\n",
            Path::new("bad.toml"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("interval_minutes"));
    }

    #[test]
    fn test_later_layer_wins() {
        let mut config = TikConfig::default();
        apply_toml(&mut config, "[watch]\ninterval_minutes = 3\n", Path::new("a.toml")).unwrap();
        apply_toml(&mut config, "[paths]\noutput_dir = \"/x\"\n", Path::new("b.toml")).unwrap();
        apply_toml(&mut config, "[watch]\ninterval_minutes = 9\n", Path::new("c.toml")).unwrap();
        assert_eq!(config.watch.interval_minutes, 9);
        assert_eq!(config.paths.output_dir, PathBuf::from("/x"));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TIKTOK_SESSION_ID", "sess"),
            ("TIKTOK_PROXY", "socks5://proxy:1080"),
            ("TELEGRAM_BOT_TOKEN", "bot"),
            ("TELEGRAM_CHAT_ID", "42"),
        ]
        .into_iter()
        .collect();

        let mut config = TikConfig::default();
        let mut sources = ConfigSources::default();
        apply_overrides_from(&mut config, &mut sources, |k| {
            vars.get(k).map(|v| v.to_string())
        });

        assert_eq!(config.cookies.sessionid_ss, "sess");
        assert_eq!(config.network.proxy.as_deref(), Some("socks5://proxy:1080"));
        assert_eq!(config.upload.telegram.as_ref().map(|t| t.chat_id), Some(42));
        assert_eq!(sources.env_overrides.len(), 4);
    }

    #[test]
    fn test_telegram_env_needs_chat_id() {
        let mut config = TikConfig::default();
        let mut sources = ConfigSources::default();
        apply_overrides_from(&mut config, &mut sources, |k| {
            (k == "TELEGRAM_BOT_TOKEN").then(|| "bot".to_string())
        });
        assert!(config.upload.telegram.is_none());
    }
}

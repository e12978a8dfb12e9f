//! Subcommand implementations for the binary.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, ValueEnum};
use regex::Regex;
use tikconf::{load_cookies_json, load_telegram_json, ConfigSources, TikConfig};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use tiklive::{
    ClientOptions, FfmpegTranscoder, Handoff, Platform, Recorder, ReqwestTransport, StopSignal,
    TelegramUploader, WatchConfig, WatchMode, WatchTarget,
};

static LIVE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r".*www\.tiktok\.com.*|.*vm\.tiktok\.com.*").expect("live url regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Record once, now
    Manual,
    /// Keep watching and record every broadcast
    Automatic,
    /// Record any followed account that goes live
    Followers,
}

impl From<ModeArg> for WatchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Manual => WatchMode::SingleShot,
            ModeArg::Automatic => WatchMode::Polling,
            ModeArg::Followers => WatchMode::FanOut,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RecordArgs {
    /// Live URL (www.tiktok.com/@user/live or a vm.tiktok.com share link)
    #[arg(long, value_parser = parse_live_url)]
    pub url: Option<String>,

    /// Username, or several separated by commas
    #[arg(long)]
    pub user: Option<String>,

    /// Room id of a running broadcast
    #[arg(long)]
    pub room_id: Option<String>,

    #[arg(long, value_enum, default_value_t = ModeArg::Manual)]
    pub mode: ModeArg,

    /// Minutes between checks in automatic and followers mode
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: Option<u64>,

    /// HTTP proxy, e.g. http://127.0.0.1:8080
    #[arg(long)]
    pub proxy: Option<String>,

    /// Directory for recordings
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Stop each recording after this many seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub duration: Option<u64>,

    /// Upload finished recordings to Telegram
    #[arg(long)]
    pub telegram: bool,

    /// Legacy cookies.json with session cookies
    #[arg(long)]
    pub cookies: Option<PathBuf>,

    /// Legacy telegram.json with bot credentials
    #[arg(long)]
    pub telegram_config: Option<PathBuf>,

    /// Config file replacing ./tiklive.toml
    #[arg(long, env = "TIKLIVE_CONFIG")]
    pub config: Option<PathBuf>,
}

fn parse_live_url(raw: &str) -> Result<String, String> {
    if LIVE_URL.is_match(raw) {
        Ok(raw.to_string())
    } else {
        Err("the provided URL does not appear to be a valid live URL".to_string())
    }
}

/// One entry per recorder to run. Fan-out takes no target.
pub fn targets(args: &RecordArgs, mode: WatchMode) -> Result<Vec<Option<WatchTarget>>> {
    let users: Vec<String> = args
        .user
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(|user| user.trim().trim_start_matches('@').to_string())
        .filter(|user| !user.is_empty())
        .collect();

    if users.len() > 1 && (args.room_id.is_some() || args.url.is_some()) {
        bail!("when using multiple usernames, do not provide room_id or url");
    }

    if mode == WatchMode::FanOut {
        return Ok(vec![None]);
    }

    if let Some(url) = &args.url {
        return Ok(vec![Some(WatchTarget::Url(url.clone()))]);
    }
    if !users.is_empty() {
        return Ok(users
            .into_iter()
            .map(|user| Some(WatchTarget::Handle(user)))
            .collect());
    }
    if let Some(room) = &args.room_id {
        return Ok(vec![Some(WatchTarget::Room(room.clone()))]);
    }

    bail!("missing URL, username, or room ID, please provide one of these parameters")
}

pub async fn record(args: RecordArgs, mut config: TikConfig) -> Result<()> {
    if let Some(path) = &args.cookies {
        config.cookies.merge(load_cookies_json(path)?);
    }
    if let Some(path) = &args.telegram_config {
        config.upload.telegram = Some(load_telegram_json(path)?);
    }
    if let Some(proxy) = &args.proxy {
        config.network.proxy = Some(proxy.clone());
    }
    if let Some(output) = &args.output {
        config.paths.output_dir = output.clone();
    }
    if let Some(interval) = args.interval {
        config.watch.interval_minutes = interval;
    }
    if let Some(duration) = args.duration {
        config.watch.duration_secs = Some(duration);
    }

    let mode = WatchMode::from(args.mode);
    let targets = targets(&args, mode)?;

    let mut handoff = Handoff::new(Arc::new(FfmpegTranscoder::new()));
    if args.telegram {
        let telegram = config.upload.telegram.clone().ok_or_else(|| {
            anyhow!("--telegram needs credentials: set TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID or pass --telegram-config")
        })?;
        handoff = handoff.with_uploader(Arc::new(TelegramUploader::new(telegram)));
    }

    if !config.cookies.is_authenticated() && mode == WatchMode::FanOut {
        warn!("Followers mode without a session cookie will not find anyone");
    }

    let transport = ReqwestTransport::new(&ClientOptions::from_config(&config))
        .context("building http client")?;
    let platform = Arc::new(Platform::new(Arc::new(transport)));

    let stop = StopSignal::new();
    let mut recorders = Vec::with_capacity(targets.len());
    for target in targets {
        let mut watch = WatchConfig::from_config(&config, target, mode);
        watch.upload_enabled = args.telegram;
        let recorder = Recorder::new(platform.clone(), handoff.clone(), watch)?
            .with_stop(stop.clone());
        recorders.push(recorder);
    }

    tokio::spawn(stop_on_signal(stop.clone()));

    if recorders.len() == 1 {
        if let Some(recorder) = recorders.pop() {
            recorder.run().await?;
        }
        return Ok(());
    }

    let total = recorders.len();
    info!(count = total, "Watching several users");
    let mut running = JoinSet::new();
    for recorder in recorders {
        running.spawn(async move { recorder.run().await });
    }

    let mut failures = 0;
    while let Some(joined) = running.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, "Recorder stopped");
                failures += 1;
            }
            Err(e) => {
                error!(error = %e, "Recorder task panicked");
                failures += 1;
            }
        }
    }

    if failures == total {
        bail!("every recorder failed");
    }
    Ok(())
}

/// SIGINT or SIGTERM flips the shared stop signal.
async fn stop_on_signal(stop: StopSignal) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, finishing recordings...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!(error = %e, "Could not listen for SIGTERM");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, finishing recordings...");
        }
    }
    stop.trigger();
}

pub fn show_config(config: &TikConfig, sources: &ConfigSources) {
    println!("{}", config.to_toml());

    if sources.files.is_empty() {
        println!("# no config files found");
    } else {
        for file in &sources.files {
            println!("# loaded: {}", file.display());
        }
    }
    for var in &sources.env_overrides {
        println!("# env override: {}", var);
    }
}

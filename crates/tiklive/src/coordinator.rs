//! Watch-mode state machine.
//!
//! - single-shot: resolve once, record if live, return.
//! - polling: re-resolve and record forever, waiting between attempts.
//! - fan-out: scan the follow list and record every live account in its own task.
//!
//! All waits go through [`StopSignal::sleep`], so [`Recorder::stop`] unwinds
//! any mode promptly. Captures in flight finish their file before returning.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::capture::{capture, CaptureOutcome, CaptureRequest, StopReason};
use crate::config::{WatchConfig, WatchMode, WatchTarget};
use crate::error::{RecorderError, Restriction, Result};
use crate::platform::{Platform, ResolvedTarget};
use crate::postprocess::Handoff;
use crate::registry::WatchRegistry;
use crate::stop::{Pause, StopSignal};

/// Back-off after errors that are not simply "nothing live yet".
pub const CONNECTION_COOLDOWN: Duration = Duration::from_secs(2 * 60);

/// Everything one recording needs. Cloned into each fan-out task.
#[derive(Clone)]
struct SessionRunner {
    platform: Arc<Platform>,
    handoff: Arc<Handoff>,
    output_dir: PathBuf,
    duration: Option<Duration>,
    upload: bool,
    stop: StopSignal,
}

impl SessionRunner {
    /// Liveness check, stream selection, capture, handoff. Strictly in that order.
    async fn record(&self, target: &ResolvedTarget) -> Result<CaptureOutcome> {
        if !self.platform.is_room_alive(&target.room).await {
            return Err(RecorderError::SubjectNotLive {
                handle: target.handle.clone(),
            });
        }

        let stream = self
            .platform
            .select_stream_url(&target.room)
            .await?
            .ok_or_else(|| RecorderError::NoStreamAvailable {
                handle: target.handle.clone(),
            })?;

        let request = CaptureRequest {
            handle: target.handle.clone(),
            room: target.room.clone(),
            stream,
            output_dir: self.output_dir.clone(),
            duration: self.duration,
        };
        let outcome = capture(self.platform.as_ref(), &request, &self.stop).await?;

        if outcome.bytes_written == 0 {
            info!(handle = %target.handle, "Nothing was captured, removing empty file");
            if let Err(e) = tokio::fs::remove_file(&outcome.path).await {
                warn!(path = %outcome.path.display(), error = %e, "Could not remove empty file");
            }
        } else {
            self.handoff.process(&outcome.path, self.upload).await;
        }

        Ok(outcome)
    }
}

pub struct Recorder {
    runner: SessionRunner,
    config: WatchConfig,
    registry: WatchRegistry,
}

impl Recorder {
    pub fn new(platform: Arc<Platform>, handoff: Handoff, config: WatchConfig) -> Result<Self> {
        config.validate()?;
        let runner = SessionRunner {
            platform,
            handoff: Arc::new(handoff),
            output_dir: config.output_dir.clone(),
            duration: config.duration,
            upload: config.upload_enabled,
            stop: StopSignal::new(),
        };
        Ok(Self {
            runner,
            config,
            registry: WatchRegistry::new(),
        })
    }

    /// Share a stop signal with other recorders.
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.runner.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.runner.stop.clone()
    }

    /// Ask every mode to wind down. Safe to call any time, any number of times.
    pub fn stop(&self) {
        if !self.runner.stop.is_triggered() {
            info!("Graceful stop requested");
        }
        self.runner.stop.trigger();
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    /// Returns after one recording (single-shot) or once stopped (polling, fan-out).
    pub async fn run(&self) -> Result<()> {
        self.check_region().await?;

        match self.config.mode {
            WatchMode::SingleShot => self.single_shot().await.map(|_| ()),
            WatchMode::Polling => self.poll().await,
            WatchMode::FanOut => self.fan_out().await,
        }
    }

    fn target(&self) -> Result<&WatchTarget> {
        self.config.target.as_ref().ok_or_else(|| {
            RecorderError::InvalidConfig(format!("{} mode needs a target", self.config.mode))
        })
    }

    async fn check_region(&self) -> Result<()> {
        if !self.runner.platform.check_region_blocked().await {
            return Ok(());
        }

        match self.config.mode {
            WatchMode::SingleShot => {
                warn!("{}", Restriction::RegionBlocked { mode: None });
                Ok(())
            }
            mode => Err(RecorderError::AccessRestricted(
                Restriction::RegionBlocked { mode: Some(mode) },
            )),
        }
    }

    async fn single_shot(&self) -> Result<CaptureOutcome> {
        let resolved = self.runner.platform.resolve_target(self.target()?).await?;
        info!(handle = %resolved.handle, room = %resolved.room, "Resolved target");
        self.runner.record(&resolved).await
    }

    async fn poll(&self) -> Result<()> {
        let target = self.target()?;
        let stop = &self.runner.stop;
        let mut handle = match target {
            WatchTarget::Handle(handle) => Some(handle.clone()),
            _ => None,
        };

        while !stop.is_triggered() {
            let wait = match self.poll_once(target, &mut handle).await {
                Ok(outcome) if outcome.reason == StopReason::Stopped => break,
                // look again right away, the broadcast may have restarted
                Ok(_) => continue,
                Err(_) if stop.is_triggered() => break,
                Err(e) if e.waits_full_interval() => {
                    match &e {
                        RecorderError::AccessRestricted(restriction) => warn!("{}", restriction),
                        _ => info!("{}", e),
                    }
                    info!(
                        "Waiting {} minutes before recheck",
                        self.config.interval.as_secs() / 60
                    );
                    self.config.interval
                }
                Err(e) => {
                    if e.is_unsolvable_challenge() {
                        error!(error = %e, "Anti-bot challenge could not be solved");
                    } else {
                        error!(error = %e, "Connection closed in automatic mode");
                    }
                    CONNECTION_COOLDOWN
                }
            };

            if stop.sleep(wait).await == Pause::Stopped {
                info!("Automatic mode stopped during wait period");
                break;
            }
        }

        info!("Automatic mode stopped");
        Ok(())
    }

    async fn poll_once(
        &self,
        target: &WatchTarget,
        handle: &mut Option<String>,
    ) -> Result<CaptureOutcome> {
        let platform = &self.runner.platform;

        let resolved = match handle.as_ref() {
            // room ids change between broadcasts, so only the handle is kept
            Some(known) => ResolvedTarget {
                handle: known.clone(),
                room: platform.room_from_user(known).await?,
            },
            None => {
                let resolved = platform.resolve_target(target).await?;
                *handle = Some(resolved.handle.clone());
                resolved
            }
        };

        debug!(handle = %resolved.handle, room = %resolved.room, "Checking liveness");
        self.runner.record(&resolved).await
    }

    async fn fan_out(&self) -> Result<()> {
        let platform = &self.runner.platform;
        let stop = &self.runner.stop;

        let secondary_uid = platform.secondary_uid().await?;
        if !platform.is_authenticated().await {
            warn!("Session cookies were not accepted, the follow list may be empty");
        }
        info!("Followers mode activated");

        while !stop.is_triggered() {
            for handle in self.registry.evict_finished() {
                debug!(handle = %handle, "Recording finished, eligible again");
            }

            match self.scan(&secondary_uid).await {
                Ok(started) => info!(
                    started,
                    active = self.registry.len(),
                    "Follower scan complete"
                ),
                Err(e) => error!(error = %e, "Follower scan failed"),
            }

            info!(
                "Waiting {} minutes before next check",
                self.config.interval.as_secs() / 60
            );
            if stop.sleep(self.config.interval).await == Pause::Stopped {
                info!("Followers mode stopped during wait period");
                break;
            }
        }

        self.registry.close();
        if !self.registry.is_empty() {
            info!(
                active = self.registry.len(),
                "Waiting for running recordings to finish"
            );
        }
        self.registry.wait_all().await;
        info!("Followers mode stopped");
        Ok(())
    }

    /// One pass over the follow list. Returns how many recordings were started.
    async fn scan(&self, secondary_uid: &str) -> Result<usize> {
        let platform = &self.runner.platform;
        let followers = platform.follower_handles(secondary_uid).await?;
        info!(count = followers.len(), "Found followers");

        let mut started = 0;
        for handle in followers {
            if self.runner.stop.is_triggered() {
                break;
            }
            if self.registry.is_recording(&handle) {
                debug!(handle = %handle, "Already recording");
                continue;
            }

            let room = match platform.room_from_user(&handle).await {
                Ok(room) => room,
                Err(e) => {
                    debug!(handle = %handle, error = %e, "Skipping follower");
                    continue;
                }
            };
            if !platform.is_room_alive(&room).await {
                continue;
            }

            let runner = self.runner.clone();
            let target = ResolvedTarget {
                handle: handle.clone(),
                room,
            };
            let spawned = self.registry.register(&handle, move || {
                tokio::spawn(async move {
                    match runner.record(&target).await {
                        Ok(_) => {}
                        // went offline between the scan and the task starting
                        Err(RecorderError::SubjectNotLive { .. }) => {
                            info!(handle = %target.handle, "Follower went offline before recording started");
                        }
                        Err(e) => {
                            error!(handle = %target.handle, error = %e, "Follower recording failed");
                        }
                    }
                })
            });

            if spawned {
                info!(handle = %handle, "Recording live follower");
                started += 1;
            }
        }

        Ok(started)
    }
}

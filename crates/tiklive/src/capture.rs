//! Buffered capture of a live stream to disk.
//!
//! A capture owns one [`RecordingSession`]: an append-mode file plus an
//! in-memory buffer flushed every [`FLUSH_THRESHOLD`] bytes. The drive loop
//! re-checks liveness, (re)opens the stream and copies chunks until it is
//! stopped, the duration limit passes, or the subject goes offline. A dropped
//! connection only costs a short cool-down. Whatever ends the loop, the
//! session is finished: the tail of the buffer is written and the file closed.

use std::future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::platform::LiveSource;
use crate::quality::StreamDescriptor;
use crate::stop::{Pause, StopSignal};

/// Buffered bytes are written out once they reach this size.
pub const FLUSH_THRESHOLD: usize = 512 * 1024;

/// Pause after a failed or empty stream before checking liveness again.
pub const STREAM_COOLDOWN: Duration = Duration::from_secs(2);

const RAW_SUFFIX: &str = "_flv.mp4";

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub handle: String,
    pub room: String,
    pub stream: StreamDescriptor,
    pub output_dir: PathBuf,
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Stopped,
    DurationReached,
    WentOffline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutcome {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub reason: StopReason,
}

/// `<dir>/TK_<handle>_<YYYY-MM-DD_HH-MM-SS>_flv.mp4`
pub fn raw_output_path(dir: &Path, handle: &str, started: DateTime<Utc>) -> PathBuf {
    dir.join(format!(
        "TK_{}_{}{}",
        handle,
        started.format("%Y-%m-%d_%H-%M-%S"),
        RAW_SUFFIX
    ))
}

/// Name of the transcoded file: the raw-container marker is dropped.
pub fn final_output_path(raw: &Path) -> PathBuf {
    let name = raw
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(RAW_SUFFIX) {
        Some(stem) => raw.with_file_name(format!("{}.mp4", stem)),
        None => raw.with_extension("final.mp4"),
    }
}

/// One capture attempt: file handle, buffer and deadline.
#[derive(Debug)]
pub struct RecordingSession {
    path: PathBuf,
    file: File,
    buffer: Vec<u8>,
    bytes_written: u64,
    deadline: Option<Instant>,
}

impl RecordingSession {
    pub async fn create(path: PathBuf, duration: Option<Duration>) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file,
            buffer: Vec::with_capacity(FLUSH_THRESHOLD),
            bytes_written: 0,
            deadline: duration.map(|d| Instant::now() + d),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes on disk plus bytes still buffered.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_written + self.buffer.len() as u64
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub async fn push(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() >= FLUSH_THRESHOLD {
            self.flush_buffer().await?;
        }
        Ok(())
    }

    pub async fn flush_buffer(&mut self) -> std::io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.file.write_all(&self.buffer).await?;
        self.bytes_written += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    /// Write the tail of the buffer and close the file.
    pub async fn finish(mut self) -> std::io::Result<(PathBuf, u64)> {
        self.flush_buffer().await?;
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok((self.path, self.bytes_written))
    }

    async fn deadline_reached(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => future::pending().await,
        }
    }
}

/// Record `request.stream` until stopped, out of time, or offline.
pub async fn capture(
    source: &dyn LiveSource,
    request: &CaptureRequest,
    stop: &StopSignal,
) -> Result<CaptureOutcome> {
    let path = raw_output_path(&request.output_dir, &request.handle, Utc::now());
    let mut session = RecordingSession::create(path, request.duration).await?;

    match request.duration {
        Some(limit) => info!(
            handle = %request.handle,
            path = %session.path().display(),
            "Started recording for {} seconds",
            limit.as_secs()
        ),
        None => info!(
            handle = %request.handle,
            path = %session.path().display(),
            "Started recording"
        ),
    }

    let driven = drive(source, request, stop, &mut session).await;
    let (path, bytes_written) = session.finish().await?;
    let reason = driven?;

    info!(
        handle = %request.handle,
        path = %path.display(),
        bytes = bytes_written,
        ?reason,
        "Recording finished"
    );

    Ok(CaptureOutcome {
        path,
        bytes_written,
        reason,
    })
}

async fn drive(
    source: &dyn LiveSource,
    request: &CaptureRequest,
    stop: &StopSignal,
    session: &mut RecordingSession,
) -> Result<StopReason> {
    loop {
        if stop.is_triggered() {
            return Ok(StopReason::Stopped);
        }
        if session.deadline_passed() {
            return Ok(StopReason::DurationReached);
        }
        if !source.is_live(&request.room).await {
            info!(handle = %request.handle, "User is no longer live, stopping recording");
            return Ok(StopReason::WentOffline);
        }

        let mut stream = match source.open(&request.stream.url).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(handle = %request.handle, error = %e, "Could not open stream");
                if stop.sleep(STREAM_COOLDOWN).await == Pause::Stopped {
                    return Ok(StopReason::Stopped);
                }
                continue;
            }
        };

        let received_before = session.bytes_received();
        loop {
            let next = tokio::select! {
                biased;
                _ = stop.triggered() => return Ok(StopReason::Stopped),
                _ = session.deadline_reached() => return Ok(StopReason::DurationReached),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(chunk)) => session.push(&chunk).await?,
                Some(Err(e)) => {
                    warn!(handle = %request.handle, error = %e, "Stream error, reconnecting");
                    if stop.sleep(STREAM_COOLDOWN).await == Pause::Stopped {
                        return Ok(StopReason::Stopped);
                    }
                    break;
                }
                None => {
                    debug!(handle = %request.handle, "Stream ended");
                    // an empty stream would otherwise spin on the liveness check
                    if session.bytes_received() == received_before
                        && stop.sleep(STREAM_COOLDOWN).await == Pause::Stopped
                    {
                        return Ok(StopReason::Stopped);
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn output_names() {
        let started = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let raw = raw_output_path(Path::new("/rec"), "alice", started);
        assert_eq!(
            raw,
            PathBuf::from("/rec/TK_alice_2024-03-09_07-05-01_flv.mp4")
        );
        assert_eq!(
            final_output_path(&raw),
            PathBuf::from("/rec/TK_alice_2024-03-09_07-05-01.mp4")
        );
    }

    #[tokio::test]
    async fn session_flushes_at_threshold_and_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out_flv.mp4");
        let mut session = RecordingSession::create(path.clone(), None).await.unwrap();

        session.push(&vec![1u8; FLUSH_THRESHOLD - 1]).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        session.push(&[2u8; 2]).await.unwrap();
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            (FLUSH_THRESHOLD + 1) as u64
        );

        session.push(&[3u8; 10]).await.unwrap();
        let (closed, written) = session.finish().await.unwrap();
        assert_eq!(closed, path);
        assert_eq!(written, (FLUSH_THRESHOLD + 11) as u64);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), written);
    }

    #[tokio::test]
    async fn session_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out_flv.mp4");
        std::fs::write(&path, b"head").unwrap();

        let mut session = RecordingSession::create(path.clone(), None).await.unwrap();
        session.push(b"tail").await.unwrap();
        session.finish().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"headtail");
    }
}

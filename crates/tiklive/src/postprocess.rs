//! Post-processing handoff: transcode the raw capture, then optionally upload it.
//!
//! Failures here are logged and swallowed. A recording that could not be
//! converted is still on disk under its raw name.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use thiserror::Error;
use tikconf::TelegramConfig;
use tokio::fs::{self, OpenOptions};
use tokio::process::Command;
use tokio::time::Instant;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use crate::capture::final_output_path;

/// Largest document a regular bot account may send.
pub const UPLOAD_SIZE_LIMIT: u64 = 2 * 1024 * 1024 * 1024;

const RELEASE_POLL: Duration = Duration::from_millis(500);

const CAPTION: &str = "🎥 <b>Video recorded via tiklive</b>";

#[derive(Debug, Error)]
pub enum PostProcessError {
    #[error("{0} is still locked, skipping conversion")]
    FileLocked(PathBuf),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("transcoder exited with {status}: {stderr}")]
    Transcoder { status: String, stderr: String },

    #[error("upload failed: {0}")]
    Upload(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Convert `raw` and return the path of the result.
    async fn transcode(&self, raw: &Path) -> Result<PathBuf, PostProcessError>;
}

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, file: &Path) -> Result<(), PostProcessError>;
}

/// What runs after every capture.
#[derive(Clone)]
pub struct Handoff {
    transcoder: Arc<dyn Transcoder>,
    uploader: Option<Arc<dyn Uploader>>,
}

impl Handoff {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            transcoder,
            uploader: None,
        }
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Transcode, then upload when asked to. Returns the converted path.
    pub async fn process(&self, raw: &Path, upload: bool) -> Option<PathBuf> {
        let converted = match self.transcoder.transcode(raw).await {
            Ok(path) => {
                info!(path = %path.display(), "File conversion completed");
                path
            }
            Err(e) => {
                error!(path = %raw.display(), error = %e, "Post-processing failed");
                return None;
            }
        };

        if upload {
            match &self.uploader {
                Some(uploader) => {
                    if let Err(e) = uploader.upload(&converted).await {
                        error!(path = %converted.display(), error = %e, "Upload failed");
                    }
                }
                None => warn!("Upload requested but no uploader is configured"),
            }
        }

        Some(converted)
    }
}

/// Remuxes with `ffmpeg -c copy`.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
    release_timeout: Duration,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            release_timeout: Duration::from_secs(10),
        }
    }
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = timeout;
        self
    }

    /// Poll until the file can be opened for writing.
    async fn wait_for_release(&self, file: &Path) -> bool {
        let started = Instant::now();
        loop {
            if OpenOptions::new().append(true).open(file).await.is_ok() {
                return true;
            }
            if started.elapsed() >= self.release_timeout {
                return false;
            }
            tokio::time::sleep(RELEASE_POLL).await;
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, raw: &Path) -> Result<PathBuf, PostProcessError> {
        if !self.wait_for_release(raw).await {
            return Err(PostProcessError::FileLocked(raw.to_path_buf()));
        }

        let output = final_output_path(raw);
        info!(path = %raw.display(), "Converting to MP4");

        let result = Command::new(&self.program)
            .arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(raw)
            .arg("-c")
            .arg("copy")
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PostProcessError::Spawn {
                program: self.program.display().to_string(),
                source: e,
            })?;

        if !result.status.success() {
            return Err(PostProcessError::Transcoder {
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        fs::remove_file(raw).await?;
        Ok(output)
    }
}

/// Sends finished recordings to a chat through the Bot API.
pub struct TelegramUploader {
    client: Client,
    api_base: String,
    config: TelegramConfig,
}

impl TelegramUploader {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            client: Client::new(),
            api_base: "https://api.telegram.org".to_string(),
            config,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl Uploader for TelegramUploader {
    async fn upload(&self, file: &Path) -> Result<(), PostProcessError> {
        let size = fs::metadata(file).await?.len();
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "recording.mp4".to_string());

        info!(file = %name, megabytes = size / (1024 * 1024), "File to upload");
        if size > UPLOAD_SIZE_LIMIT {
            warn!(file = %name, "The file is too large to be uploaded with this type of account");
            return Ok(());
        }

        info!("Uploading video, this may take a while depending on the file size");
        let body = Body::wrap_stream(ReaderStream::new(fs::File::open(file).await?));
        let document = Part::stream_with_length(body, size)
            .file_name(name)
            .mime_str("video/mp4")
            .map_err(|e| PostProcessError::Upload(e.to_string()))?;

        let form = Form::new()
            .text("chat_id", self.config.chat_id.to_string())
            .text("caption", CAPTION)
            .text("parse_mode", "HTML")
            .part("document", document);

        let url = format!(
            "{}/bot{}/sendDocument",
            self.api_base, self.config.bot_token
        );
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| PostProcessError::Upload(e.without_url().to_string()))?;

        let status = response.status();
        let reply: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PostProcessError::Upload(e.without_url().to_string()))?;

        if !status.is_success() || reply["ok"].as_bool() != Some(true) {
            let description = reply["description"].as_str().unwrap_or("unknown error");
            return Err(PostProcessError::Upload(format!("{}: {}", status, description)));
        }

        info!("File successfully uploaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorded {
        uploads: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl Uploader for Recorded {
        async fn upload(&self, file: &Path) -> Result<(), PostProcessError> {
            self.uploads.lock().unwrap().push(file.to_path_buf());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Transcoder for Failing {
        async fn transcode(&self, _raw: &Path) -> Result<PathBuf, PostProcessError> {
            Err(PostProcessError::Upload("nope".to_string()))
        }
    }

    #[tokio::test]
    async fn failed_transcode_skips_upload() {
        let uploader = Arc::new(Recorded {
            uploads: Mutex::new(Vec::new()),
        });
        let handoff = Handoff::new(Arc::new(Failing)).with_uploader(uploader.clone());
        assert_eq!(handoff.process(Path::new("x_flv.mp4"), true).await, None);
        assert!(uploader.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_file_times_out_as_locked() {
        let transcoder =
            FfmpegTranscoder::new().with_release_timeout(Duration::from_millis(600));
        let err = transcoder
            .transcode(Path::new("/nonexistent/TK_a_flv.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, PostProcessError::FileLocked(_)));
    }

    #[tokio::test]
    async fn oversized_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.mp4");
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(UPLOAD_SIZE_LIMIT + 1).unwrap();

        let uploader = TelegramUploader::new(TelegramConfig {
            api_id: String::new(),
            api_hash: String::new(),
            bot_token: "123:abc".to_string(),
            chat_id: 1,
        })
        // never contacted
        .with_api_base("http://127.0.0.1:9");
        assert!(uploader.upload(&path).await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ffmpeg_transcoder_renames_and_removes_raw() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake-ffmpeg");
        std::fs::write(&fake, "#!/bin/sh\ncp \"$5\" \"$8\"\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let raw = dir.path().join("TK_alice_2024-01-01_00-00-00_flv.mp4");
        std::fs::write(&raw, b"flv bytes").unwrap();

        let uploader = Arc::new(Recorded {
            uploads: Mutex::new(Vec::new()),
        });
        let handoff = Handoff::new(Arc::new(FfmpegTranscoder::new().with_program(&fake)))
            .with_uploader(uploader.clone());

        let converted = handoff.process(&raw, true).await.unwrap();
        assert_eq!(converted, dir.path().join("TK_alice_2024-01-01_00-00-00.mp4"));
        assert_eq!(std::fs::read(&converted).unwrap(), b"flv bytes");
        assert!(!raw.exists());
        assert_eq!(*uploader.uploads.lock().unwrap(), vec![converted]);
    }
}

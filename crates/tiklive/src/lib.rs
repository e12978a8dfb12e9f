//! tiklive - watch a live-video platform and record broadcasts to disk
//!
//! The pieces, leaf first:
//! - [`challenge`]: proof-of-work solver for the anti-bot wall
//! - [`platform`]: handle/room/url resolution, liveness, stream selection
//! - [`capture`]: buffered, cancellable stream-to-file loop
//! - [`coordinator`]: single-shot, polling and fan-out watch modes
//! - [`postprocess`]: transcode and upload after each capture
//!
//! HTTP goes through the [`transport::Transport`] trait so everything above it
//! can be exercised without a network.

pub mod capture;
pub mod challenge;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod platform;
pub mod postprocess;
pub mod quality;
pub mod registry;
pub mod stop;
pub mod transport;

pub use capture::{CaptureOutcome, CaptureRequest, StopReason};
pub use challenge::{ChallengeCookie, ChallengeError};
pub use config::{ClientOptions, WatchConfig, WatchMode, WatchTarget};
pub use coordinator::Recorder;
pub use error::{RecorderError, Restriction, Result};
pub use platform::{Endpoints, LiveSource, Platform, ResolvedTarget};
pub use postprocess::{
    FfmpegTranscoder, Handoff, PostProcessError, TelegramUploader, Transcoder, Uploader,
};
pub use quality::{StreamDescriptor, StreamQuality};
pub use registry::WatchRegistry;
pub use stop::StopSignal;
pub use transport::{ByteStream, HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};

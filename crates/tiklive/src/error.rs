//! Error taxonomy for resolution, capture and the watch loops.

use std::fmt;

use thiserror::Error;

use crate::challenge::ChallengeError;
use crate::config::WatchMode;
use crate::transport::TransportError;

/// Why the platform refused access. Each kind carries its own operator-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restriction {
    /// Private account, session cookies required.
    AccountPrivate,
    /// Private account that only followers may watch.
    FollowRequired,
    /// The live itself is restricted to logged-in viewers.
    LoginRequired,
    /// Captcha wall or blocked country. `mode` selects the wording for watch loops that cannot run at all.
    RegionBlocked { mode: Option<WatchMode> },
}

impl fmt::Display for Restriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Restriction::AccountPrivate => {
                "Account is private, login required. Please add your session cookies."
            }
            Restriction::FollowRequired => {
                "This account is private. Follow the creator to access their LIVE."
            }
            Restriction::LoginRequired => {
                "Live is private, login required. Please add your session cookies."
            }
            Restriction::RegionBlocked {
                mode: Some(WatchMode::Polling),
            } => {
                "Automatic mode is available only in unblocked countries. Use a VPN or authenticate with cookies."
            }
            Restriction::RegionBlocked {
                mode: Some(WatchMode::FanOut),
            } => {
                "Followers mode is available only in unblocked countries. Use a VPN or authenticate with cookies."
            }
            Restriction::RegionBlocked { .. } => {
                "Captcha required or country blocked. Use a VPN, room_id, or authenticate with cookies."
            }
        };
        f.write_str(message)
    }
}

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("@{handle}: the user is not hosting a live stream at the moment")]
    SubjectNotLive { handle: String },

    #[error("target not found: {0}")]
    TargetNotFound(String),

    #[error("could not resolve target: {0}")]
    TargetResolution(String),

    #[error("{0}")]
    AccessRestricted(Restriction),

    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("followers list is empty")]
    EmptyFollowerSet,

    #[error("failed to retrieve followers list: {0}")]
    FollowerFetch(String),

    #[error("failed to retrieve sec_uid, are the session cookies valid?")]
    SecondaryUidUnavailable,

    #[error("@{handle}: unable to retrieve live streaming url, try again later")]
    NoStreamAvailable { handle: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("recording I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl RecorderError {
    /// Errors that mean "nothing to record yet": the polling loop sleeps the
    /// full configured interval. Anything else gets the connection cool-down.
    ///
    /// Restrictions are included: fresh cookies or an account going public
    /// lift them without a restart.
    pub fn waits_full_interval(&self) -> bool {
        matches!(
            self,
            RecorderError::SubjectNotLive { .. }
                | RecorderError::TargetNotFound(_)
                | RecorderError::TargetResolution(_)
                | RecorderError::NoStreamAvailable { .. }
                | RecorderError::AccessRestricted(_)
        )
    }

    pub fn is_unsolvable_challenge(&self) -> bool {
        matches!(
            self,
            RecorderError::Challenge(ChallengeError::Unsolvable { .. } | ChallengeError::Rejected)
        )
    }
}

pub type Result<T, E = RecorderError> = std::result::Result<T, E>;

//! Stream selection from room metadata.
//!
//! The preferred source is the SDK pull data: a quality table
//! (`options.qualities[{sdk_key, level}]`) and a JSON-encoded map of
//! `sdk_key -> {main: {flv}}`. When that table is missing we walk a fixed
//! ladder of legacy buckets instead.

use std::fmt;

use serde_json::Value;
use tracing::{debug, warn};

/// Room-info status meaning the live is restricted to logged-in viewers.
pub const LIVE_RESTRICTED_STATUS: i64 = 4003110;

/// Legacy FLV buckets, best first. RTMP is the last resort after these.
pub const LEGACY_LADDER: [&str; 4] = ["FULL_HD1", "HD1", "SD2", "SD1"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamQuality {
    Sdk { key: String, level: i64 },
    Legacy(&'static str),
}

impl fmt::Display for StreamQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamQuality::Sdk { key, level } => write!(f, "{} (level {})", key, level),
            StreamQuality::Legacy(bucket) => write!(f, "{} (legacy)", bucket),
        }
    }
}

/// Playable URL picked for one liveness check. Never reused across cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub url: String,
    pub quality: StreamQuality,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Found(StreamDescriptor),
    /// No URL and the platform flagged the live as login-only.
    Restricted,
    /// No URL, try again later.
    Unavailable,
}

/// Pick the best stream out of a room-info response (the whole JSON body).
pub fn select_stream(room_info: &Value) -> Selection {
    let stream_url = &room_info["data"]["stream_url"];

    // the ladder is only for rooms without SDK pull data at all
    let found = match sdk_qualities(stream_url) {
        Some(candidates) => best_sdk(candidates),
        None => {
            warn!("No quality table in room info, falling back to legacy stream buckets");
            legacy(stream_url)
        }
    };

    match found {
        Some(descriptor) => {
            debug!(quality = %descriptor.quality, "Selected stream");
            Selection::Found(descriptor)
        }
        None if room_info["status_code"].as_i64() == Some(LIVE_RESTRICTED_STATUS) => {
            Selection::Restricted
        }
        None => Selection::Unavailable,
    }
}

/// `(key, level, url)` for every quality with a playable URL, in table order.
fn sdk_qualities(stream_url: &Value) -> Option<Vec<(String, i64, String)>> {
    let pull_data = &stream_url["live_core_sdk_data"]["pull_data"];

    // stream_data is itself a JSON document encoded as a string
    let stream_data: Value = serde_json::from_str(pull_data["stream_data"].as_str()?).ok()?;
    let urls = stream_data.get("data")?.as_object()?;
    let qualities = pull_data["options"]["qualities"].as_array()?;

    let candidates = qualities
        .iter()
        .filter_map(|quality| {
            let key = quality["sdk_key"].as_str()?;
            let level = quality["level"].as_i64()?;
            let url = urls.get(key)?["main"]["flv"].as_str()?;
            (!url.is_empty()).then(|| (key.to_string(), level, url.to_string()))
        })
        .collect();

    Some(candidates)
}

fn best_sdk(candidates: Vec<(String, i64, String)>) -> Option<StreamDescriptor> {
    let mut best: Option<(String, i64, String)> = None;
    for candidate in candidates {
        // strict comparison keeps the first of equal levels
        if best.as_ref().map_or(true, |(_, level, _)| candidate.1 > *level) {
            best = Some(candidate);
        }
    }
    best.map(|(key, level, url)| StreamDescriptor {
        url,
        quality: StreamQuality::Sdk { key, level },
    })
}

fn legacy(stream_url: &Value) -> Option<StreamDescriptor> {
    let flv = &stream_url["flv_pull_url"];
    LEGACY_LADDER
        .iter()
        .find_map(|bucket| {
            flv[*bucket]
                .as_str()
                .filter(|url| !url.is_empty())
                .map(|url| StreamDescriptor {
                    url: url.to_string(),
                    quality: StreamQuality::Legacy(*bucket),
                })
        })
        .or_else(|| {
            stream_url["rtmp_pull_url"]
                .as_str()
                .filter(|url| !url.is_empty())
                .map(|url| StreamDescriptor {
                    url: url.to_string(),
                    quality: StreamQuality::Legacy("RTMP"),
                })
        })
}

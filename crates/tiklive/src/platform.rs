//! Platform resolver: handles, rooms, liveness and stream URLs.
//!
//! Every page fetch goes through [`Platform::fetch`], which notices an
//! anti-bot challenge page, solves it off the async workers, stores the cookie
//! and retries the request once.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::challenge::{self, ChallengeError};
use crate::config::WatchTarget;
use crate::error::{RecorderError, Restriction, Result};
use crate::quality::{select_stream, Selection, StreamDescriptor};
use crate::transport::{ByteStream, HttpRequest, HttpResponse, Transport, TransportError};

const APP_ID: u32 = 1988;
const FOLLOWERS_PAGE_SIZE: u32 = 30;

const FOLLOW_REQUIRED_MARKER: &str = "Follow the creator to watch their LIVE";
const PRIVATE_ACCOUNT_MARKER: &str = "This account is private";
const LOGGED_OUT_MARKER: &str = "login-title";

static LIVE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://(?:www\.)?tiktok\.com/@([^/]+)/live").expect("live url regex")
});

static MOBILE_REDIRECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"com/@(.*?)/live").expect("mobile redirect regex"));

static SEC_UID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""secUid":"(.*?)","#).expect("sec uid regex"));

/// Base URLs. Overridable so tests can point at a fake host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub base: String,
    pub webcast: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            base: "https://www.tiktok.com".to_string(),
            webcast: "https://webcast.tiktok.com".to_string(),
        }
    }
}

/// Canonical identity of a recording subject for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub handle: String,
    pub room: String,
}

/// What the capture loop needs from the platform.
#[async_trait]
pub trait LiveSource: Send + Sync {
    /// Never fails: transport problems read as "not live".
    async fn is_live(&self, room: &str) -> bool;

    async fn open(&self, url: &str) -> std::result::Result<ByteStream, TransportError>;
}

pub struct Platform {
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
}

impl Platform {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_endpoints(transport, Endpoints::default())
    }

    pub fn with_endpoints(transport: Arc<dyn Transport>, endpoints: Endpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// GET with challenge handling.
    async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let response = self.transport.get(request).await?;
        if !challenge::is_challenge_page(&response.body) {
            return Ok(response);
        }

        info!(url = %request.url, "Anti-bot challenge received, solving");
        let cookie = challenge::solve_offloaded(response.body).await?;
        self.transport.add_cookie(&cookie.name, &cookie.value);

        let retried = self.transport.get(request).await?;
        if challenge::is_challenge_page(&retried.body) {
            return Err(ChallengeError::Rejected.into());
        }
        Ok(retried)
    }

    fn room_info_request(&self, room: &str) -> HttpRequest {
        HttpRequest::get(format!("{}/webcast/room/info/", self.endpoints.webcast))
            .query("aid", APP_ID)
            .query("room_id", room)
    }

    fn foryou_request(&self) -> HttpRequest {
        HttpRequest::get(format!("{}/foryou", self.endpoints.base))
    }

    /// True when the live landing page answers with a redirect, which is
    /// what blocked countries and captcha walls get.
    pub async fn check_region_blocked(&self) -> bool {
        let request = HttpRequest::get(format!("{}/live", self.endpoints.base)).no_redirects();
        match self.fetch(&request).await {
            Ok(response) => response.status == 302,
            Err(e) => {
                debug!(error = %e, "Region probe failed, assuming unblocked");
                false
            }
        }
    }

    pub async fn is_room_alive(&self, room: &str) -> bool {
        if room.is_empty() {
            return false;
        }

        let request =
            HttpRequest::get(format!("{}/webcast/room/check_alive/", self.endpoints.webcast))
                .query("aid", APP_ID)
                .query("region", "CH")
                .query("room_ids", room)
                .query("user_is_login", true);

        match self.fetch(&request).await {
            Ok(response) => response.json()["data"][0]["alive"]
                .as_bool()
                .unwrap_or(false),
            Err(e) => {
                debug!(room = %room, error = %e, "Liveness check failed, treating as offline");
                false
            }
        }
    }

    /// True when the session cookies are accepted.
    pub async fn is_authenticated(&self) -> bool {
        match self.fetch(&self.foryou_request()).await {
            Ok(response) => !response.body.contains(LOGGED_OUT_MARKER),
            Err(_) => false,
        }
    }

    /// Platform-internal id of the logged-in account, needed for the follow list.
    pub async fn secondary_uid(&self) -> Result<String> {
        let response = self.fetch(&self.foryou_request()).await?;
        SEC_UID
            .captures(&response.body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|uid| !uid.is_empty())
            .ok_or(RecorderError::SecondaryUidUnavailable)
    }

    pub async fn user_from_room(&self, room: &str) -> Result<String> {
        let response = self.fetch(&self.room_info_request(room)).await?;

        if response.body.contains(FOLLOW_REQUIRED_MARKER) {
            return Err(RecorderError::AccessRestricted(Restriction::FollowRequired));
        }
        if response.body.contains(PRIVATE_ACCOUNT_MARKER) {
            return Err(RecorderError::AccessRestricted(Restriction::AccountPrivate));
        }

        response.json()["data"]["owner"]["display_id"]
            .as_str()
            .filter(|handle| !handle.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                RecorderError::TargetResolution(format!("no handle found for room {}", room))
            })
    }

    pub async fn room_from_user(&self, handle: &str) -> Result<String> {
        let request = HttpRequest::get(format!("{}/api-live/user/room/", self.endpoints.base))
            .query("uniqueId", handle)
            .query("sourceType", 54)
            .query("aid", APP_ID);
        let response = self.fetch(&request).await?;

        if response.status != 200 {
            return Err(RecorderError::TargetResolution(format!(
                "room lookup for @{} answered {}",
                handle, response.status
            )));
        }

        let room = match &response.json()["data"]["user"]["roomId"] {
            Value::String(room) => room.clone(),
            Value::Number(room) => room.to_string(),
            _ => String::new(),
        };
        if room.is_empty() {
            return Err(RecorderError::TargetResolution(format!(
                "no room id for @{}",
                handle
            )));
        }
        Ok(room)
    }

    /// Handle and room behind a profile or mobile share URL.
    pub async fn room_and_user_from_url(&self, url: &str) -> Result<ResolvedTarget> {
        let response = self.fetch(&HttpRequest::get(url).no_redirects()).await?;

        let handle = match response.status {
            302 => {
                return Err(RecorderError::AccessRestricted(Restriction::RegionBlocked {
                    mode: None,
                }))
            }
            // share links redirect to the canonical profile URL
            301 => MOBILE_REDIRECT
                .captures(&response.body)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
            _ => LIVE_URL
                .captures(url)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
        }
        .filter(|handle| !handle.is_empty())
        .ok_or_else(|| RecorderError::TargetNotFound(format!("invalid live url: {}", url)))?;

        let room = self.room_from_user(&handle).await?;
        Ok(ResolvedTarget { handle, room })
    }

    /// Fill in the missing half of a target: URL first, then handle, then room.
    pub async fn resolve_target(&self, target: &WatchTarget) -> Result<ResolvedTarget> {
        match target {
            WatchTarget::Url(url) => self.room_and_user_from_url(url).await,
            WatchTarget::Handle(handle) => {
                let room = self.room_from_user(handle).await?;
                Ok(ResolvedTarget {
                    handle: handle.clone(),
                    room,
                })
            }
            WatchTarget::Room(room) => {
                let handle = self.user_from_room(room).await?;
                Ok(ResolvedTarget {
                    handle,
                    room: room.clone(),
                })
            }
        }
    }

    /// Best playable stream for a room, `None` when nothing is on offer yet.
    pub async fn select_stream_url(&self, room: &str) -> Result<Option<StreamDescriptor>> {
        let response = self.fetch(&self.room_info_request(room)).await?;

        if response.body.contains(PRIVATE_ACCOUNT_MARKER) {
            return Err(RecorderError::AccessRestricted(Restriction::AccountPrivate));
        }

        match select_stream(&response.json()) {
            Selection::Found(descriptor) => Ok(Some(descriptor)),
            Selection::Restricted => {
                Err(RecorderError::AccessRestricted(Restriction::LoginRequired))
            }
            Selection::Unavailable => Ok(None),
        }
    }

    /// Handles of every account the session follows, in platform order.
    pub async fn follower_handles(&self, secondary_uid: &str) -> Result<Vec<String>> {
        let mut handles = Vec::new();
        let mut cursor: i64 = 0;

        loop {
            let request = HttpRequest::get(format!("{}/api/user/list/", self.endpoints.base))
                .query("aid", APP_ID)
                .query("app_name", "tiktok_web")
                .query("device_platform", "web_pc")
                .query("count", FOLLOWERS_PAGE_SIZE)
                .query("maxCursor", cursor)
                .query("minCursor", cursor)
                .query("scene", 21)
                .query("secUid", secondary_uid)
                .query("user_is_login", true);

            let response = self.fetch(&request).await?;
            if response.status != 200 {
                return Err(RecorderError::FollowerFetch(format!(
                    "status {}",
                    response.status
                )));
            }

            let page = response.json();
            if let Some(users) = page["userList"].as_array() {
                handles.extend(
                    users
                        .iter()
                        .filter_map(|entry| entry["user"]["uniqueId"].as_str())
                        .filter(|handle| !handle.is_empty())
                        .map(str::to_string),
                );
            }

            let has_more = page["hasMore"].as_bool().unwrap_or(false);
            let next = page["minCursor"].as_i64().unwrap_or(0);
            if !has_more {
                break;
            }
            if next == cursor {
                warn!(cursor, "Follower list cursor did not advance, stopping pagination");
                break;
            }
            cursor = next;
        }

        if handles.is_empty() {
            return Err(RecorderError::EmptyFollowerSet);
        }
        debug!(count = handles.len(), "Fetched follower list");
        Ok(handles)
    }
}

#[async_trait]
impl LiveSource for Platform {
    async fn is_live(&self, room: &str) -> bool {
        self.is_room_alive(room).await
    }

    async fn open(&self, url: &str) -> std::result::Result<ByteStream, TransportError> {
        self.transport.open_stream(url).await
    }
}

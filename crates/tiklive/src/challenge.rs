//! Proof-of-work challenge solver.
//!
//! The platform sometimes answers with a page carrying two markers instead of
//! the requested content:
//!
//! ```text
//! <p id="wci" class="<cookie name>"></p>
//! <p id="cs" class="<base64 json>"></p>
//! ```
//!
//! The JSON is `{"v": {"a": <prefix b64>, "c": <digest>}, ...}`. We look for the
//! smallest decimal nonce with `sha256(prefix ++ ascii(nonce)) == digest`, write
//! it back as `d`, and hand the re-encoded payload back as a cookie.
//!
//! The search is pure CPU work. Callers on the async runtime go through
//! [`solve_offloaded`] so timers and cancellation checks of other recordings
//! keep running.

use std::fmt::Write as _;
use std::sync::LazyLock;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Nonces `0..SEARCH_CEILING` are tried before giving up.
pub const SEARCH_CEILING: u64 = 1_000_000;

/// The platform strips base64 padding from the payload marker.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

static IDENTIFIER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<p\s+[^>]*id=["']wci["'][^>]*class=["']([^"']+)["']"#)
        .expect("identifier marker regex")
});

static PAYLOAD_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<p\s+[^>]*id=["']cs["'][^>]*class=["']([^"']+)["']"#)
        .expect("payload marker regex")
});

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("challenge marker `{0}` not found in page")]
    MissingMarker(&'static str),

    #[error("malformed challenge payload: {0}")]
    MalformedPayload(String),

    #[error("blocked by anti-bot: no nonce below {ceiling} matches the challenge digest")]
    Unsolvable { ceiling: u64 },

    #[error("blocked by anti-bot: solved challenge was not accepted")]
    Rejected,
}

/// Cookie produced by a solved challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeCookie {
    pub name: String,
    pub value: String,
}

/// One challenge as parsed from the page. Discarded once the cookie is built.
#[derive(Debug, Clone)]
pub struct ChallengeEnvelope {
    /// Cookie name the answer must be stored under.
    pub identifier: String,
    /// Decoded prefix bytes.
    pub prefix: Vec<u8>,
    /// Raw SHA-256 digest we are looking for.
    pub expected_digest: Vec<u8>,
    /// Nonce once found.
    pub nonce: Option<u64>,
    payload: Value,
}

/// Quick check used by the transport layer before paying for a full parse.
pub fn is_challenge_page(markup: &str) -> bool {
    IDENTIFIER_MARKER.is_match(markup) && PAYLOAD_MARKER.is_match(markup)
}

impl ChallengeEnvelope {
    pub fn parse(markup: &str) -> Result<Self, ChallengeError> {
        let identifier = IDENTIFIER_MARKER
            .captures(markup)
            .and_then(|c| c.get(1))
            .ok_or(ChallengeError::MissingMarker("wci"))?
            .as_str()
            .to_string();

        let encoded = PAYLOAD_MARKER
            .captures(markup)
            .and_then(|c| c.get(1))
            .ok_or(ChallengeError::MissingMarker("cs"))?
            .as_str();

        let decoded = LENIENT
            .decode(encoded)
            .map_err(|e| ChallengeError::MalformedPayload(format!("payload base64: {}", e)))?;
        let payload: Value = serde_json::from_slice(&decoded)
            .map_err(|e| ChallengeError::MalformedPayload(format!("payload json: {}", e)))?;

        let field = |name: &str| {
            payload
                .get("v")
                .and_then(|v| v.get(name))
                .and_then(Value::as_str)
                .ok_or_else(|| ChallengeError::MalformedPayload(format!("missing v.{}", name)))
        };

        let prefix = LENIENT
            .decode(field("a")?)
            .map_err(|e| ChallengeError::MalformedPayload(format!("prefix base64: {}", e)))?;
        let expected_digest = decode_digest(field("c")?)?;

        Ok(Self {
            identifier,
            prefix,
            expected_digest,
            nonce: None,
            payload,
        })
    }

    /// Brute-force the nonce and build the cookie.
    pub fn solve(mut self, ceiling: u64) -> Result<ChallengeCookie, ChallengeError> {
        let nonce = find_nonce(&self.prefix, &self.expected_digest, ceiling)
            .ok_or(ChallengeError::Unsolvable { ceiling })?;
        self.nonce = Some(nonce);

        let answer = STANDARD.encode(nonce.to_string());
        match self.payload.as_object_mut() {
            Some(object) => {
                object.insert("d".to_string(), Value::String(answer));
            }
            None => {
                return Err(ChallengeError::MalformedPayload(
                    "payload is not an object".to_string(),
                ))
            }
        }

        let serialized = serde_json::to_string(&self.payload)
            .map_err(|e| ChallengeError::MalformedPayload(e.to_string()))?;

        Ok(ChallengeCookie {
            name: self.identifier,
            value: STANDARD.encode(serialized),
        })
    }
}

/// The digest usually arrives as base64 of the raw 32 bytes; a 64-char hex
/// string is accepted too.
fn decode_digest(raw: &str) -> Result<Vec<u8>, ChallengeError> {
    if let Ok(bytes) = LENIENT.decode(raw) {
        if bytes.len() == 32 {
            return Ok(bytes);
        }
    }
    if raw.len() == 64 {
        if let Ok(bytes) = hex::decode(raw) {
            return Ok(bytes);
        }
    }
    Err(ChallengeError::MalformedPayload(
        "digest is neither base64 nor hex sha256".to_string(),
    ))
}

/// Smallest `n < ceiling` with `sha256(prefix ++ ascii(n)) == expected`.
pub fn find_nonce(prefix: &[u8], expected: &[u8], ceiling: u64) -> Option<u64> {
    let seeded = Sha256::new_with_prefix(prefix);
    let mut digits = String::with_capacity(20);

    for nonce in 0..ceiling {
        digits.clear();
        // writing into a String cannot fail
        let _ = write!(digits, "{}", nonce);

        let mut hasher = seeded.clone();
        hasher.update(digits.as_bytes());
        if hasher.finalize().as_slice() == expected {
            return Some(nonce);
        }
    }

    None
}

/// Parse and solve with the default ceiling.
pub fn solve(markup: &str) -> Result<ChallengeCookie, ChallengeError> {
    ChallengeEnvelope::parse(markup)?.solve(SEARCH_CEILING)
}

/// [`solve`] on the blocking pool.
pub async fn solve_offloaded(markup: String) -> Result<ChallengeCookie, ChallengeError> {
    match tokio::task::spawn_blocking(move || solve(&markup)).await {
        Ok(result) => result,
        Err(e) => Err(ChallengeError::MalformedPayload(format!(
            "solver task failed: {}",
            e
        ))),
    }
}

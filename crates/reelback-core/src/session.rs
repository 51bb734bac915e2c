//! Session identity, sampling state, and expiry model
//!
//! A [`Session`] is the unit of recording continuity: an opaque id, a
//! monotonically increasing segment counter, activity timestamps, and a
//! sampling decision fixed at creation time. Sessions are plain data; all
//! decisions about creating, reusing, or replacing them live in
//! [`crate::lifecycle`], and every time-dependent operation takes an explicit
//! `now_ms` so the model stays deterministic under test.
//!
//! # Expiry
//!
//! A session is expired iff it has been idle longer than
//! [`Timeouts::idle_expire_ms`] or has existed longer than the configured
//! maximum replay duration. The shorter [`Timeouts::idle_pause_ms`] threshold
//! never ends a session; it only tells the container to pause capture.
//!
//! # Wire shape
//!
//! The serialized record keeps the field names used by persisted sessions in
//! the JS instrumentation this engine interoperates with (`segmentId`,
//! `started`, `lastActivity`, `shouldRefresh`, and `sampled` as
//! `"session" | "buffer" | false`), so a store written by either side reads
//! back identically.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::config::{DEFAULT_IDLE_EXPIRE_MS, DEFAULT_IDLE_PAUSE_MS, DEFAULT_SESSION_SAMPLE_RATE};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

// ===== Sampling state =====

/// Sampling decision for a session, fixed at creation time.
///
/// The only permitted reassignment is the `No → Buffer` promotion applied
/// when an external error trigger fires for a deferred-sampling session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampled {
    /// Fully sampled: every segment is flushed on the normal schedule.
    Session,
    /// Promoted buffer session: retained frames ship, then recording
    /// continues on the normal schedule.
    Buffer,
    /// Not sampled. With buffering allowed this is a deferred decision
    /// (promotable to [`Sampled::Buffer`]); otherwise it is permanent.
    No,
}

impl Sampled {
    /// Whether frames for this session are ever eligible to ship.
    #[must_use]
    pub fn is_sampled(self) -> bool {
        !matches!(self, Self::No)
    }
}

impl fmt::Display for Sampled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => f.write_str("session"),
            Self::Buffer => f.write_str("buffer"),
            Self::No => f.write_str("false"),
        }
    }
}

// The stored record uses `"session" | "buffer" | false`, matching the JS
// instrumentation's session document. A plain derive cannot produce the
// string-or-bool union, so both halves are spelled out.
impl Serialize for Sampled {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Session => serializer.serialize_str("session"),
            Self::Buffer => serializer.serialize_str("buffer"),
            Self::No => serializer.serialize_bool(false),
        }
    }
}

impl<'de> Deserialize<'de> for Sampled {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SampledVisitor;

        impl Visitor<'_> for SampledVisitor {
            type Value = Sampled;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(r#""session", "buffer", or false"#)
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Sampled, E> {
                if v {
                    Err(E::invalid_value(de::Unexpected::Bool(v), &self))
                } else {
                    Ok(Sampled::No)
                }
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Sampled, E> {
                match v {
                    "session" => Ok(Sampled::Session),
                    "buffer" => Ok(Sampled::Buffer),
                    other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
                }
            }
        }

        deserializer.deserialize_any(SampledVisitor)
    }
}

// ===== Supporting configuration =====

/// Idle thresholds consulted on every activity signal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timeouts {
    /// Idle gap after which capture pauses without ending the session.
    pub idle_pause_ms: u64,
    /// Idle gap after which the session is expired and replaced (or reused
    /// under the buffer-reuse rule).
    pub idle_expire_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            idle_pause_ms: DEFAULT_IDLE_PAUSE_MS,
            idle_expire_ms: DEFAULT_IDLE_EXPIRE_MS,
        }
    }
}

/// Inputs to the creation-time sampling draw.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    /// Probability that a new session is fully sampled.
    pub session_sample_rate: f64,
    /// Whether a failed draw defers sampling (promotable to buffer mode)
    /// instead of being permanent.
    pub allow_buffering: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            session_sample_rate: DEFAULT_SESSION_SAMPLE_RATE,
            allow_buffering: true,
        }
    }
}

/// Where session records live between activity signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persistence {
    /// Persist through the session store so the session survives restarts.
    Sticky,
    /// Keep the session in memory only; the store is never consulted.
    Memory,
}

// ===== Session record =====

/// One recording session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    /// Opaque unique identifier, immutable for the session's life.
    pub id: String,
    /// Index of the next segment to flush; increases only after a successful
    /// send, resets to 0 only on brand-new sessions.
    #[serde(rename = "segmentId")]
    pub segment_id: u32,
    /// Creation time, ms since epoch.
    #[serde(rename = "started")]
    pub started_at: u64,
    /// Most recent qualifying activity, ms since epoch.
    #[serde(rename = "lastActivity")]
    pub last_activity_at: u64,
    /// Sampling decision fixed at creation.
    pub sampled: Sampled,
    /// True until the session has actually emitted a buffered replay payload.
    #[serde(rename = "shouldRefresh", default = "default_should_refresh")]
    pub should_refresh: bool,
}

fn default_should_refresh() -> bool {
    true
}

impl Session {
    /// Create a brand-new session starting now with the given sampling
    /// decision. Fresh id, segment 0, `should_refresh = true`.
    #[must_use]
    pub fn new(sampled: Sampled, now_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            segment_id: 0,
            started_at: now_ms,
            last_activity_at: now_ms,
            sampled,
            should_refresh: true,
        }
    }

    /// Whether this session is past its idle-expiry or absolute-duration
    /// limit. `idle_pause_ms` is deliberately not consulted here.
    #[must_use]
    pub fn is_expired(&self, timeouts: Timeouts, max_replay_duration_ms: u64, now_ms: u64) -> bool {
        let idle_for = now_ms.saturating_sub(self.last_activity_at);
        let alive_for = now_ms.saturating_sub(self.started_at);
        idle_for > timeouts.idle_expire_ms || alive_for > max_replay_duration_ms
    }

    /// Whether capture should be paused for inactivity (session still live).
    #[must_use]
    pub fn is_idle_past_pause(&self, timeouts: Timeouts, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_activity_at) > timeouts.idle_pause_ms
    }

    /// Record a qualifying activity signal.
    pub fn touch_at(&mut self, now_ms: u64) {
        self.last_activity_at = now_ms;
    }

    /// Advance to the next segment after a successful flush.
    pub fn advance_segment(&mut self) {
        self.segment_id += 1;
    }

    /// Apply the `No → Buffer` promotion. Returns true when the state
    /// actually changed. Promoting a fully sampled session is a programming
    /// error; promoting an already promoted one is a no-op.
    pub fn promote_to_buffer(&mut self) -> bool {
        match self.sampled {
            Sampled::No => {
                self.sampled = Sampled::Buffer;
                true
            }
            Sampled::Buffer => false,
            Sampled::Session => {
                debug_assert!(false, "promote_to_buffer on a session-sampled session");
                false
            }
        }
    }
}

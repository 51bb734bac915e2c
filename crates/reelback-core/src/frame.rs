//! Recording frames and segment payloads
//!
//! Frames are the unit of capture crossing into the engine: opaque DOM
//! recorder output, breadcrumb-style interaction events, and performance
//! spans. The engine treats them as ordered data: it never interprets frame
//! contents except for the DOM mutation count feeding the rate limiter, and
//! it produces exactly one frame shape of its own, the `replay.mutations`
//! advisory.
//!
//! Serialized names follow the upstream replay event shapes (`timestamp`,
//! `startTimestamp`, `endTimestamp`, category strings like `ui.click`) so
//! payloads stay recognizable to backends that already ingest them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Breadcrumb category strings used by the capture side.
///
/// Only [`category::REPLAY_MUTATIONS`] is emitted by this crate; the rest are
/// provided so callers build frames with the canonical names.
pub mod category {
    /// Console log capture.
    pub const CONSOLE: &str = "console";
    /// Pointer click.
    pub const UI_CLICK: &str = "ui.click";
    /// Text input.
    pub const UI_INPUT: &str = "ui.input";
    /// Key press.
    pub const UI_KEY_DOWN: &str = "ui.keyDown";
    /// Focus lost.
    pub const UI_BLUR: &str = "ui.blur";
    /// Focus gained.
    pub const UI_FOCUS: &str = "ui.focus";
    /// Click with no observable effect within the detection window.
    pub const UI_SLOW_CLICK: &str = "ui.slowClickDetected";
    /// Rapid repeated clicks on one target.
    pub const UI_MULTI_CLICK: &str = "ui.multiClick";
    /// Mutation-storm advisory emitted by the rate limiter.
    pub const REPLAY_MUTATIONS: &str = "replay.mutations";
}

/// Span operation strings used by the capture side.
pub mod span_op {
    /// History push navigation.
    pub const NAVIGATION_PUSH: &str = "navigation.push";
    /// Full-page navigation.
    pub const NAVIGATION_NAVIGATE: &str = "navigation.navigate";
    /// Page reload.
    pub const NAVIGATION_RELOAD: &str = "navigation.reload";
    /// Back/forward traversal.
    pub const NAVIGATION_BACK_FORWARD: &str = "navigation.back_forward";
    /// Largest contentful paint entry.
    pub const LARGEST_CONTENTFUL_PAINT: &str = "largest-contentful-paint";
    /// Memory snapshot.
    pub const MEMORY: &str = "memory";
    /// Paint timing entry.
    pub const PAINT: &str = "paint";
    /// Instrumented fetch request.
    pub const RESOURCE_FETCH: &str = "resource.fetch";
    /// Instrumented XHR request.
    pub const RESOURCE_XHR: &str = "resource.xhr";
    /// Stylesheet resource timing.
    pub const RESOURCE_CSS: &str = "resource.css";
    /// Iframe resource timing.
    pub const RESOURCE_IFRAME: &str = "resource.iframe";
    /// Image resource timing.
    pub const RESOURCE_IMG: &str = "resource.img";
    /// Link resource timing.
    pub const RESOURCE_LINK: &str = "resource.link";
    /// Script resource timing.
    pub const RESOURCE_SCRIPT: &str = "resource.script";
    /// Any other resource timing.
    pub const RESOURCE_OTHER: &str = "resource.other";
}

/// Opaque DOM recorder output plus the mutation count that feeds the rate
/// limiter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DomFrame {
    /// Capture time, ms since epoch.
    pub timestamp: u64,
    /// DOM mutation units represented by this frame, if it carries any.
    #[serde(rename = "mutationCount", skip_serializing_if = "Option::is_none")]
    pub mutation_count: Option<u32>,
    /// Recorder payload, uninterpreted.
    pub payload: Value,
}

/// Breadcrumb-style interaction or advisory frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreadcrumbFrame {
    /// Capture time, ms since epoch.
    pub timestamp: u64,
    /// Category string, see [`category`].
    pub category: String,
    /// Optional human-readable message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Category-specific payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Performance span frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanFrame {
    /// Operation string, see [`span_op`].
    pub op: String,
    /// What the span covers (URL, entry name, ...).
    pub description: String,
    /// Span start, ms since epoch.
    #[serde(rename = "startTimestamp")]
    pub start_ms: u64,
    /// Span end, ms since epoch.
    #[serde(rename = "endTimestamp")]
    pub end_ms: u64,
    /// Operation-specific payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One captured frame in append order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordingFrame {
    /// Opaque DOM recorder output.
    Dom(DomFrame),
    /// Breadcrumb-style interaction or advisory.
    Breadcrumb(BreadcrumbFrame),
    /// Performance span.
    Span(SpanFrame),
}

impl RecordingFrame {
    /// DOM frame without a mutation count.
    #[must_use]
    pub fn dom(timestamp: u64, payload: Value) -> Self {
        Self::Dom(DomFrame {
            timestamp,
            mutation_count: None,
            payload,
        })
    }

    /// DOM frame carrying a mutation count for the rate limiter.
    #[must_use]
    pub fn dom_with_mutations(timestamp: u64, mutation_count: u32, payload: Value) -> Self {
        Self::Dom(DomFrame {
            timestamp,
            mutation_count: Some(mutation_count),
            payload,
        })
    }

    /// Breadcrumb frame with no payload.
    #[must_use]
    pub fn breadcrumb(timestamp: u64, category: &str) -> Self {
        Self::Breadcrumb(BreadcrumbFrame {
            timestamp,
            category: category.to_string(),
            message: None,
            data: None,
        })
    }

    /// The `replay.mutations` advisory the rate limiter emits when a
    /// threshold is crossed. `limit: true` marks the halt frame.
    #[must_use]
    pub fn mutation_advisory(timestamp: u64, count: u64, limit: bool) -> Self {
        Self::Breadcrumb(BreadcrumbFrame {
            timestamp,
            category: category::REPLAY_MUTATIONS.to_string(),
            message: None,
            data: Some(serde_json::json!({ "count": count, "limit": limit })),
        })
    }

    /// Performance span frame with no payload.
    #[must_use]
    pub fn span(op: &str, description: &str, start_ms: u64, end_ms: u64) -> Self {
        Self::Span(SpanFrame {
            op: op.to_string(),
            description: description.to_string(),
            start_ms,
            end_ms,
            data: None,
        })
    }

    /// Capture time of the frame (span frames report their start).
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Dom(f) => f.timestamp,
            Self::Breadcrumb(f) => f.timestamp,
            Self::Span(f) => f.start_ms,
        }
    }

    /// Mutation units carried by this frame (zero for non-DOM frames).
    #[must_use]
    pub fn mutation_count(&self) -> u32 {
        match self {
            Self::Dom(f) => f.mutation_count.unwrap_or(0),
            Self::Breadcrumb(_) | Self::Span(_) => 0,
        }
    }

    /// Whether this is opaque DOM recorder output.
    #[must_use]
    pub fn is_dom(&self) -> bool {
        matches!(self, Self::Dom(_))
    }

    /// Whether this frame is a user interaction that refreshes the
    /// session's activity clock. Passive telemetry and advisories do not
    /// qualify.
    #[must_use]
    pub fn is_user_activity(&self) -> bool {
        matches!(self, Self::Breadcrumb(f) if f.category.starts_with("ui."))
    }
}

/// What a drained buffer becomes: the frames of one segment, tagged with the
/// session's segment id at drain time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentPayload {
    /// Segment index within the session.
    #[serde(rename = "segmentId")]
    pub segment_id: u32,
    /// Frames in append order.
    pub events: Vec<RecordingFrame>,
}

impl SegmentPayload {
    /// Number of frames in the payload.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the payload carries no frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

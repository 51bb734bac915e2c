//! Segment delivery interface.
//!
//! The container does not know how payloads reach a backend; it only needs
//! the three-way verdict a delivery attempt can end in. Hosts implement
//! [`TransportSender`] over whatever wire they have. Two implementations
//! ship here: [`DiscardSender`] for dry runs and [`ScriptedSender`] for
//! driving failure paths in tests and simulations.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::frame::SegmentPayload;

/// Verdict of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendOutcome {
    /// The segment was accepted; the session's segment counter may advance.
    Success,
    /// Transient failure; the scheduler retries once after a fixed backoff.
    RetryableFailure,
    /// The backend asked us to back off. Not an error: sends suspend until
    /// `retry_after_ms` elapses and the payload is kept.
    RateLimited { retry_after_ms: u64 },
}

/// Future returned by a send.
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = SendOutcome> + Send + 'a>>;

/// Async segment delivery interface.
pub trait TransportSender: Send + Sync {
    /// Sender identifier used in logs.
    fn name(&self) -> &'static str;

    /// Deliver one segment payload. The payload is borrowed because the
    /// caller keeps it for a potential resend.
    fn send<'a>(&'a self, payload: &'a SegmentPayload) -> SendFuture<'a>;
}

// ===== Discard sender =====

/// Accepts everything and throws it away. Useful for dry runs where only
/// the scheduling behavior matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSender;

impl TransportSender for DiscardSender {
    fn name(&self) -> &'static str {
        "discard"
    }

    fn send<'a>(&'a self, payload: &'a SegmentPayload) -> SendFuture<'a> {
        debug!(
            segment_id = payload.segment_id,
            events = payload.len(),
            "Discarding segment"
        );
        Box::pin(async { SendOutcome::Success })
    }
}

// ===== Scripted sender =====

/// One observed delivery, for assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SentRecord {
    pub segment_id: u32,
    pub events: usize,
}

#[derive(Debug, Default)]
struct ScriptedShared {
    script: Mutex<VecDeque<SendOutcome>>,
    sent: Mutex<Vec<SentRecord>>,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Replays a queue of scripted outcomes, then succeeds. Clones share the
/// script and the delivery log, so a test can keep one clone for
/// assertions and hand the other to the container.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSender {
    shared: Arc<ScriptedShared>,
}

impl ScriptedSender {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome for the next unscripted delivery.
    pub fn enqueue(&self, outcome: SendOutcome) {
        lock(&self.shared.script).push_back(outcome);
    }

    /// Queue several outcomes in order.
    pub fn enqueue_all(&self, outcomes: impl IntoIterator<Item = SendOutcome>) {
        lock(&self.shared.script).extend(outcomes);
    }

    /// Every delivery observed so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<SentRecord> {
        lock(&self.shared.sent).clone()
    }

    /// Segment ids observed so far, in order.
    #[must_use]
    pub fn sent_segments(&self) -> Vec<u32> {
        lock(&self.shared.sent)
            .iter()
            .map(|record| record.segment_id)
            .collect()
    }
}

impl TransportSender for ScriptedSender {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn send<'a>(&'a self, payload: &'a SegmentPayload) -> SendFuture<'a> {
        lock(&self.shared.sent).push(SentRecord {
            segment_id: payload.segment_id,
            events: payload.len(),
        });
        let outcome = lock(&self.shared.script)
            .pop_front()
            .unwrap_or(SendOutcome::Success);
        debug!(
            segment_id = payload.segment_id,
            ?outcome,
            "Scripted delivery"
        );
        Box::pin(async move { outcome })
    }
}

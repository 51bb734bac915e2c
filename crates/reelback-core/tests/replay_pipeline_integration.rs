//! Cross-module integration tests for the recording pipeline.
//!
//! These tests verify that the independently-tested modules compose
//! correctly when a container drives them through realistic flows:
//!
//! A. Mutation storm: guard thresholds turn into advisory frames inside
//!    shipped segments, and the halt outlives flush boundaries
//! B. Advisory window: the warn breadcrumb fires once per segment window
//!    and re-arms at the flush boundary
//! C. Deferred capture: retention trimming plus error promotion ships
//!    exactly the trailing history window
//! D. Transport turbulence: rate limiting, retry, and drop interleave
//!    without consuming extra retry budget
//! E. A full recording day: bursts, idle pause, resume, and shutdown with
//!    conserved frame accounting
//! F. The async driver runs the same pipeline against the tokio clock
//!    with a file-backed store
//!
//! Apart from flow F, all timestamps are logical milliseconds.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::json;

use reelback_core::config::ReplayConfig;
use reelback_core::container::ReplayContainer;
use reelback_core::driver;
use reelback_core::flush::FlushConfig;
use reelback_core::frame::{RecordingFrame, SegmentPayload, category, span_op};
use reelback_core::registry::InstanceRegistry;
use reelback_core::session::{Persistence, Sampled, SamplingConfig, Timeouts, epoch_ms};
use reelback_core::session_store::{FileSessionStore, MemorySessionStore, SessionStore};
use reelback_core::transport::{SendFuture, SendOutcome, TransportSender};

// =============================================================================
// Mock infrastructure
// =============================================================================

#[derive(Debug, Default)]
struct CapturingShared {
    script: Mutex<VecDeque<SendOutcome>>,
    payloads: Mutex<Vec<SegmentPayload>>,
}

/// Sender that keeps full payload copies so tests can inspect the exact
/// frames that shipped, not just their counts. Clones share the log.
#[derive(Debug, Clone, Default)]
struct CapturingSender {
    shared: Arc<CapturingShared>,
}

impl CapturingSender {
    fn new() -> Self {
        Self::default()
    }

    fn enqueue_all(&self, outcomes: impl IntoIterator<Item = SendOutcome>) {
        self.shared.script.lock().unwrap().extend(outcomes);
    }

    fn payloads(&self) -> Vec<SegmentPayload> {
        self.shared.payloads.lock().unwrap().clone()
    }
}

impl TransportSender for CapturingSender {
    fn name(&self) -> &'static str {
        "capturing"
    }

    fn send<'a>(&'a self, payload: &'a SegmentPayload) -> SendFuture<'a> {
        self.shared.payloads.lock().unwrap().push(payload.clone());
        let outcome = self
            .shared
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SendOutcome::Success);
        Box::pin(async move { outcome })
    }
}

/// The `(count, limit)` pairs of every mutation advisory in a payload.
fn advisories(payload: &SegmentPayload) -> Vec<(u64, bool)> {
    payload
        .events
        .iter()
        .filter_map(|frame| match frame {
            RecordingFrame::Breadcrumb(b) if b.category == category::REPLAY_MUTATIONS => {
                let data = b.data.as_ref()?;
                Some((data["count"].as_u64()?, data["limit"].as_bool()?))
            }
            _ => None,
        })
        .collect()
}

fn fast_config() -> ReplayConfig {
    ReplayConfig {
        flush: FlushConfig {
            min_delay_ms: 200,
            max_delay_ms: 600,
            retry_backoff_ms: 200,
        },
        persistence: Persistence::Memory,
        sampling: SamplingConfig {
            session_sample_rate: 1.0,
            allow_buffering: false,
        },
        ..ReplayConfig::default()
    }
}

fn buffered_config() -> ReplayConfig {
    ReplayConfig {
        sampling: SamplingConfig {
            session_sample_rate: 0.0,
            allow_buffering: true,
        },
        ..fast_config()
    }
}

fn container(config: ReplayConfig) -> (ReplayContainer<CapturingSender>, CapturingSender) {
    let sender = CapturingSender::new();
    let registry = InstanceRegistry::new();
    let c = ReplayContainer::with_rng(
        config,
        Arc::new(MemorySessionStore::new()),
        sender.clone(),
        &registry,
        StdRng::seed_from_u64(7),
        0,
    )
    .unwrap();
    (c, sender)
}

fn muts(ts: u64, count: u32) -> RecordingFrame {
    RecordingFrame::dom_with_mutations(ts, count, json!({ "at": ts }))
}

fn dom(ts: u64) -> RecordingFrame {
    RecordingFrame::dom(ts, json!({ "at": ts }))
}

// =============================================================================
// A. Mutation storm across flush boundaries
// =============================================================================

#[tokio::test]
async fn mutation_storm_ships_one_halt_advisory_and_the_halt_sticks() {
    let config = ReplayConfig {
        mutation_limit: 250,
        mutation_breadcrumb_limit: 250,
        ..fast_config()
    };
    let (mut c, sender) = container(config);

    // First window stays under the limit: 100 + 100 + 49 = 249.
    c.record_frame(muts(0, 100), 0);
    c.record_frame(muts(10, 100), 10);
    c.record_frame(muts(20, 49), 20);
    c.tick(220).await;

    let shipped = sender.payloads();
    assert_eq!(shipped.len(), 1);
    assert_eq!(shipped[0].len(), 3);
    assert!(advisories(&shipped[0]).is_empty());

    // The flush boundary restarted the counter, so the next window begins
    // at zero: 200 passes, the next 100 crosses at 300.
    c.record_frame(muts(300, 200), 300);
    c.record_frame(muts(310, 100), 310);
    assert!(c.status().mutation_halted);

    // DOM capture is dead; interaction breadcrumbs keep flowing.
    c.record_frame(dom(320), 320);
    c.record_frame(RecordingFrame::breadcrumb(330, category::UI_CLICK), 330);
    c.tick(530).await;

    let shipped = sender.payloads();
    assert_eq!(shipped.len(), 2);
    assert_eq!(shipped[1].len(), 3);
    assert_eq!(advisories(&shipped[1]), vec![(300, true)]);
    // Neither the crossing frame nor anything after it shipped.
    assert!(
        !shipped[1]
            .events
            .iter()
            .any(|f| f.is_dom() && f.timestamp() >= 310)
    );

    // The halt survives the next flush boundary too.
    c.record_frame(dom(600), 600);
    c.record_frame(RecordingFrame::breadcrumb(610, category::UI_INPUT), 610);
    c.tick(810).await;

    let shipped = sender.payloads();
    assert_eq!(shipped.len(), 3);
    assert_eq!(shipped[2].len(), 1);
    assert!(!shipped[2].events[0].is_dom());
    assert_eq!(c.stats().frames_halted, 3);
    assert_eq!(c.stats().frames_recorded, 7);

    // Exactly one advisory over the whole storm.
    let total: usize = sender.payloads().iter().map(|p| advisories(p).len()).sum();
    assert_eq!(total, 1);
}

// =============================================================================
// B. Warn advisory window
// =============================================================================

#[tokio::test]
async fn warn_advisory_fires_once_per_window_and_rearms_at_the_boundary() {
    let config = ReplayConfig {
        mutation_limit: 10_000,
        mutation_breadcrumb_limit: 100,
        ..fast_config()
    };
    let (mut c, sender) = container(config);

    c.record_frame(muts(0, 150), 0);
    c.record_frame(muts(10, 50), 10);
    c.tick(210).await;

    let shipped = sender.payloads();
    assert_eq!(shipped[0].len(), 3);
    assert_eq!(advisories(&shipped[0]), vec![(150, false)]);

    // Fresh window, fresh advisory.
    c.record_frame(muts(300, 120), 300);
    c.tick(500).await;

    let shipped = sender.payloads();
    assert_eq!(shipped[1].len(), 2);
    assert_eq!(advisories(&shipped[1]), vec![(120, false)]);
    assert!(!c.status().mutation_halted);
}

// =============================================================================
// C. Deferred capture and promotion
// =============================================================================

#[tokio::test]
async fn error_promotion_ships_only_the_trailing_retention_window() {
    let config = ReplayConfig {
        buffer_retention_ms: 1_000,
        ..buffered_config()
    };
    let (mut c, sender) = container(config);
    assert_eq!(c.session().sampled, Sampled::No);

    c.record_frame(dom(0), 0);
    c.record_frame(dom(600), 600);
    c.record_frame(dom(1_200), 1_200);
    c.record_frame(dom(1_800), 1_800);

    c.trigger_error_flush(1_900);
    c.tick(1_900).await;

    let shipped = sender.payloads();
    assert_eq!(shipped.len(), 1);
    assert_eq!(shipped[0].segment_id, 0);
    let times: Vec<u64> = shipped[0].events.iter().map(RecordingFrame::timestamp).collect();
    assert_eq!(times, vec![1_200, 1_800]);
    assert_eq!(c.session().sampled, Sampled::Buffer);
    assert_eq!(c.session().segment_id, 1);
    assert!(!c.session().should_refresh);

    // Promoted sessions record on the normal schedule afterwards.
    c.record_frame(dom(2_000), 2_000);
    c.tick(2_200).await;
    let shipped = sender.payloads();
    assert_eq!(shipped.len(), 2);
    assert_eq!(shipped[1].segment_id, 1);
    assert_eq!(shipped[1].len(), 1);
}

// =============================================================================
// D. Transport turbulence
// =============================================================================

#[tokio::test]
async fn rate_limit_retry_and_drop_interleave_without_extra_budget() {
    let (mut c, sender) = container(fast_config());
    sender.enqueue_all([
        SendOutcome::RateLimited {
            retry_after_ms: 2_000,
        },
        SendOutcome::RetryableFailure,
        SendOutcome::RetryableFailure,
    ]);

    c.record_frame(dom(0), 0);
    c.tick(200).await;

    // Suspended, payload held, retry budget untouched.
    let status = c.status();
    assert!(status.holding_payload);
    assert_eq!(status.flush.attempts, 0);
    assert_eq!(status.flush.stats.rate_limit_suspensions, 1);
    assert_eq!(c.next_deadline_ms(), Some(2_200));

    // Resume spends the single retry on a real failure.
    c.tick(2_200).await;
    assert_eq!(c.status().flush.stats.retries_scheduled, 1);
    assert_eq!(c.next_deadline_ms(), Some(2_400));

    // The retry also fails: the segment dies, its id is not consumed.
    c.tick(2_400).await;
    let status = c.status();
    assert_eq!(status.flush.stats.segments_dropped, 1);
    assert!(!status.holding_payload);
    assert_eq!(c.session().segment_id, 0);

    // The next segment reuses the id and ships clean.
    c.record_frame(dom(3_000), 3_000);
    c.tick(3_200).await;

    let shipped = sender.payloads();
    assert_eq!(shipped.len(), 4);
    assert!(shipped.iter().all(|p| p.segment_id == 0));
    assert_eq!(c.session().segment_id, 1);
    assert_eq!(c.stats().segments_sent, 1);
}

// =============================================================================
// E. A full recording day
// =============================================================================

#[tokio::test]
async fn a_recording_day_conserves_every_frame() {
    let config = ReplayConfig {
        timeouts: Timeouts {
            idle_pause_ms: 2_000,
            idle_expire_ms: 600_000,
        },
        ..fast_config()
    };
    let (mut c, sender) = container(config);

    // Morning burst.
    for ts in [0, 10, 20, 30, 40] {
        c.record_frame(dom(ts), ts);
    }
    c.tick(240).await;

    // Coffee: passive frames during the idle pause are dropped.
    c.record_frame(dom(5_000), 5_000);
    c.record_frame(dom(5_100), 5_100);
    assert!(c.status().idle_paused);
    assert_eq!(c.stats().frames_ignored, 2);

    // A click resumes capture.
    c.record_frame(RecordingFrame::breadcrumb(5_200, category::UI_CLICK), 5_200);
    assert!(!c.status().idle_paused);
    c.record_frame(dom(5_300), 5_300);
    c.record_frame(dom(5_400), 5_400);
    c.tick(5_600).await;

    // Navigation burst.
    c.record_frame(
        RecordingFrame::span(span_op::RESOURCE_FETCH, "/api/items", 6_000, 6_050),
        6_000,
    );
    c.record_frame(dom(6_060), 6_060);
    c.tick(6_260).await;

    // One late frame rides out with the shutdown flush.
    c.record_frame(dom(6_270), 6_270);
    c.stop(6_300).await;

    let shipped = sender.payloads();
    let segments: Vec<u32> = shipped.iter().map(|p| p.segment_id).collect();
    let sizes: Vec<usize> = shipped.iter().map(SegmentPayload::len).collect();
    assert_eq!(segments, vec![0, 1, 2, 3]);
    assert_eq!(sizes, vec![5, 3, 2, 1]);

    let status = c.status();
    assert!(status.stopped);
    assert_eq!(status.buffered_frames, 0);
    assert_eq!(status.stats.frames_recorded, 11);
    assert_eq!(status.stats.frames_sent, 11);
    assert_eq!(status.stats.frames_ignored, 2);
    assert_eq!(status.stats.frames_halted, 0);
    assert_eq!(status.stats.segments_sent, 4);
    assert_eq!(status.buffer_stats.appended_total, 11);
    assert_eq!(status.buffer_stats.drained_total, 11);
    assert_eq!(status.buffer_stats.evicted_total, 0);
}

// =============================================================================
// F. Driver end to end
// =============================================================================

#[tokio::test(start_paused = true)]
async fn driver_runs_the_buffered_pipeline_with_a_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileSessionStore::new(dir.path().join("session.json")));
    let config = ReplayConfig {
        persistence: Persistence::Sticky,
        ..buffered_config()
    };

    let sender = CapturingSender::new();
    let registry = InstanceRegistry::new();
    let c = ReplayContainer::with_rng(
        config,
        Arc::clone(&store) as Arc<dyn SessionStore>,
        sender.clone(),
        &registry,
        StdRng::seed_from_u64(7),
        epoch_ms(),
    )
    .unwrap();
    let handle = driver::spawn(c);

    handle.record_frame(dom(epoch_ms())).await.unwrap();
    handle.record_frame(dom(epoch_ms())).await.unwrap();
    assert!(sender.payloads().is_empty());

    handle.trigger_error_flush().await.unwrap();
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

    let status = handle.status().await.unwrap();
    assert_eq!(status.sampled, Sampled::Buffer);
    assert_eq!(status.stats.segments_sent, 1);
    assert_eq!(store.load().unwrap().unwrap().sampled, Sampled::Buffer);

    let shipped = sender.payloads();
    assert_eq!(shipped.len(), 1);
    assert_eq!(shipped[0].len(), 2);

    handle.stop().await.unwrap();
    assert!(!store.path().exists());
}

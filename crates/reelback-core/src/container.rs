//! Replay container.
//!
//! Composition root that wires the session lifecycle, event buffer,
//! mutation guard, and flush scheduler into one recording pipeline behind a
//! transport seam. The container is single-owner and cooperative: every
//! entry point takes the caller's millisecond clock, nothing blocks, and at
//! most one send is ever in flight. The async driver in [`crate::driver`]
//! owns the real clock; tests pass logical instants directly.
//!
//! # Frame path
//!
//! ```text
//! record_frame -> expiry checkpoint -> idle-pause gate -> sampling gate
//!              -> mutation guard (DOM frames) -> buffer append
//!              -> flush timer (session/buffer) or retention trim (deferred)
//! ```
//!
//! Segments advance only after the transport confirms delivery; a payload
//! that failed its single retry is dropped and the next segment reuses the
//! same id.

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::ReplayConfig;
use crate::error::Result;
use crate::event_buffer::{BufferStats, EventBuffer};
use crate::flush::{FlushDirective, FlushTimer, FlushTimerStatus, RetryVerdict};
use crate::frame::{RecordingFrame, SegmentPayload};
use crate::lifecycle;
use crate::mutation_guard::{MutationDecision, MutationGuard, MutationGuardStats};
use crate::registry::{InstanceRegistry, RegistrationGuard};
use crate::session::{Sampled, Session};
use crate::session_store::SessionStore;
use crate::transport::{SendOutcome, TransportSender};

const INSTANCE_LABEL: &str = "replay";

/// Lifetime container counters.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ContainerStats {
    /// Frames accepted into the buffer (advisories included).
    pub frames_recorded: u64,
    /// Frames ignored while stopped, idle-paused, or permanently unsampled.
    pub frames_ignored: u64,
    /// DOM frames suppressed by the mutation halt.
    pub frames_halted: u64,
    /// Segments confirmed delivered.
    pub segments_sent: u64,
    /// Frames confirmed delivered.
    pub frames_sent: u64,
    /// Payloads discarded outside the retry path (session replacement,
    /// failed best-effort flush at stop).
    pub segments_abandoned: u64,
}

/// Point-in-time view of the whole pipeline for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerStatus {
    pub session_id: String,
    pub sampled: Sampled,
    pub segment_id: u32,
    pub should_refresh: bool,
    pub stopped: bool,
    pub idle_paused: bool,
    pub mutation_halted: bool,
    pub buffered_frames: usize,
    pub holding_payload: bool,
    pub flush: FlushTimerStatus,
    pub stats: ContainerStats,
    pub buffer_stats: BufferStats,
    pub mutation_stats: MutationGuardStats,
}

/// The recording pipeline for one host.
pub struct ReplayContainer<S: TransportSender> {
    config: ReplayConfig,
    store: Arc<dyn SessionStore>,
    sender: S,
    rng: StdRng,
    session: Session,
    buffer: EventBuffer,
    guard: MutationGuard,
    timer: FlushTimer,
    /// Payload held back from a failed or rate-limited flight.
    pending_send: Option<SegmentPayload>,
    stats: ContainerStats,
    idle_paused: bool,
    stopped: bool,
    _registration: RegistrationGuard,
}

impl<S: TransportSender> ReplayContainer<S> {
    /// Start a container with an OS-seeded sampling rng.
    ///
    /// Claims the registry slot and resolves the initial session (loading a
    /// persisted one when sticky). Fails only if another container is
    /// already registered.
    pub fn new(
        config: ReplayConfig,
        store: Arc<dyn SessionStore>,
        sender: S,
        registry: &InstanceRegistry,
        now_ms: u64,
    ) -> Result<Self> {
        Self::with_rng(config, store, sender, registry, StdRng::from_os_rng(), now_ms)
    }

    /// [`ReplayContainer::new`] with an explicit rng, for deterministic
    /// sampling in tests and simulations.
    pub fn with_rng(
        config: ReplayConfig,
        store: Arc<dyn SessionStore>,
        sender: S,
        registry: &InstanceRegistry,
        mut rng: StdRng,
        now_ms: u64,
    ) -> Result<Self> {
        let registration = registry.register(INSTANCE_LABEL)?;
        let handoff = lifecycle::get_or_create_session(
            None,
            &*store,
            config.persistence,
            config.timeouts,
            config.max_replay_duration_ms,
            config.sampling,
            &mut rng,
            now_ms,
        );
        info!(
            session_id = %handoff.session.id,
            sampled = %handoff.session.sampled,
            origin = ?handoff.origin,
            "Replay container started"
        );
        let guard = MutationGuard::new(config.mutation_breadcrumb_limit, config.mutation_limit);
        let timer = FlushTimer::new(config.flush);
        Ok(Self {
            config,
            store,
            sender,
            rng,
            session: handoff.session,
            buffer: EventBuffer::new(),
            guard,
            timer,
            pending_send: None,
            stats: ContainerStats::default(),
            idle_paused: false,
            stopped: false,
            _registration: registration,
        })
    }

    // ===== Ingestion =====

    /// Feed one captured frame through the pipeline.
    pub fn record_frame(&mut self, frame: RecordingFrame, now_ms: u64) {
        if self.stopped {
            self.stats.frames_ignored += 1;
            return;
        }
        self.checkpoint_session(now_ms);

        if frame.is_user_activity() {
            if self.idle_paused {
                debug!(session_id = %self.session.id, "Resuming capture on user activity");
                self.idle_paused = false;
            }
            lifecycle::touch(&mut self.session, &*self.store, self.config.persistence, now_ms);
        } else if self.idle_paused
            || self.session.is_idle_past_pause(self.config.timeouts, now_ms)
        {
            if !self.idle_paused {
                debug!(session_id = %self.session.id, "Pausing capture after idle");
                self.idle_paused = true;
            }
            self.stats.frames_ignored += 1;
            return;
        }

        if self.session.sampled == Sampled::No && !self.config.sampling.allow_buffering {
            self.stats.frames_ignored += 1;
            return;
        }

        if frame.is_dom() {
            if self.guard.is_halted() {
                self.stats.frames_halted += 1;
                return;
            }
            let count = frame.mutation_count();
            if count > 0 {
                let (decision, advisory) = self.guard.observe(count, now_ms);
                if let Some(advisory) = advisory {
                    self.accept_frame(advisory, now_ms);
                }
                if decision == MutationDecision::Halt {
                    // The frame that crossed the limit is itself suppressed.
                    self.stats.frames_halted += 1;
                    return;
                }
            }
        }

        self.accept_frame(frame, now_ms);
    }

    /// Register host-driven user activity that produced no frame.
    pub fn touch(&mut self, now_ms: u64) {
        if self.stopped {
            return;
        }
        self.checkpoint_session(now_ms);
        self.idle_paused = false;
        lifecycle::touch(&mut self.session, &*self.store, self.config.persistence, now_ms);
    }

    fn accept_frame(&mut self, frame: RecordingFrame, now_ms: u64) {
        self.buffer.append(frame);
        self.stats.frames_recorded += 1;
        match self.session.sampled {
            Sampled::Session | Sampled::Buffer => self.timer.note_activity(now_ms),
            Sampled::No => {
                // Deferred decision: keep only the trailing window until an
                // error promotes the session.
                let cutoff = now_ms.saturating_sub(self.config.buffer_retention_ms);
                self.buffer.trim_older_than(cutoff);
            }
        }
    }

    // ===== Error promotion and manual flush =====

    /// A host error occurred. Promotes a deferred session to buffer mode
    /// and asks for the accumulated history to be flushed; on an already
    /// promoted session it just accelerates the flush.
    pub fn trigger_error_flush(&mut self, now_ms: u64) {
        if self.stopped {
            return;
        }
        self.checkpoint_session(now_ms);
        match self.session.sampled {
            Sampled::No if self.config.sampling.allow_buffering => {
                if self.session.promote_to_buffer() {
                    info!(
                        session_id = %self.session.id,
                        "Deferred session promoted to buffer mode by error"
                    );
                    lifecycle::persist_if_sticky(
                        &*self.store,
                        self.config.persistence,
                        &self.session,
                    );
                }
                self.timer.request_flush(now_ms);
            }
            Sampled::Buffer => self.timer.request_flush(now_ms),
            Sampled::Session => {
                debug!("Error trigger on a fully sampled session; scheduled flush covers it");
            }
            Sampled::No => {
                debug!("Error trigger on a permanently unsampled session; ignored");
            }
        }
    }

    /// Ask for a flush as soon as possible.
    pub fn flush_now(&mut self, now_ms: u64) {
        if self.stopped {
            return;
        }
        self.checkpoint_session(now_ms);
        if self.is_flushing_mode() && (self.buffer.has_events() || self.pending_send.is_some()) {
            self.timer.request_flush(now_ms);
        }
    }

    // ===== Scheduling =====

    /// Next instant at which [`ReplayContainer::tick`] can make progress.
    #[must_use]
    pub fn next_deadline_ms(&self) -> Option<u64> {
        self.timer.next_deadline_ms()
    }

    /// Advance the scheduler to `now_ms`, performing a send if one is due.
    pub async fn tick(&mut self, now_ms: u64) {
        if self.stopped {
            return;
        }
        self.checkpoint_session(now_ms);
        match self.timer.poll(now_ms) {
            FlushDirective::Wait => {}
            FlushDirective::StartFlush { resend } => self.perform_flush(resend, now_ms).await,
        }
    }

    async fn perform_flush(&mut self, resend: bool, now_ms: u64) {
        let payload = if resend {
            match self.pending_send.take() {
                Some(payload) => payload,
                None => {
                    debug_assert!(false, "resend directive without a held payload");
                    self.timer.complete_empty(now_ms);
                    return;
                }
            }
        } else {
            if !self.buffer.has_events() {
                self.timer.complete_empty(now_ms);
                return;
            }
            // Flush boundary: the mutation counter starts over unless the
            // guard already halted.
            self.guard.reset_at_flush();
            self.buffer.drain(self.session.segment_id)
        };

        debug!(
            segment_id = payload.segment_id,
            events = payload.len(),
            resend,
            transport = self.sender.name(),
            "Sending segment"
        );
        match self.sender.send(&payload).await {
            SendOutcome::Success => {
                self.timer.complete_success(now_ms);
                self.stats.segments_sent += 1;
                self.stats.frames_sent += payload.len() as u64;
                self.session.advance_segment();
                if self.session.sampled == Sampled::Buffer && self.session.should_refresh {
                    // First shipped payload: expiry must not resurrect this
                    // identity any more.
                    self.session.should_refresh = false;
                }
                lifecycle::persist_if_sticky(&*self.store, self.config.persistence, &self.session);
            }
            SendOutcome::RetryableFailure => match self.timer.complete_retryable(now_ms) {
                RetryVerdict::WillRetry { at_ms } => {
                    debug!(
                        segment_id = payload.segment_id,
                        retry_at_ms = at_ms,
                        "Send failed; holding payload for one retry"
                    );
                    self.pending_send = Some(payload);
                }
                RetryVerdict::Dropped => {
                    error!(
                        segment_id = payload.segment_id,
                        events = payload.len(),
                        "Segment dropped after its retry also failed"
                    );
                }
            },
            SendOutcome::RateLimited { retry_after_ms } => {
                self.timer.complete_rate_limited(now_ms, retry_after_ms);
                self.pending_send = Some(payload);
            }
        }
    }

    // ===== Shutdown =====

    /// Stop recording: cancel timers, attempt one best-effort final flush
    /// (held payload first, then whatever is buffered), and clear the
    /// persisted session. The container ignores everything afterwards.
    pub async fn stop(&mut self, now_ms: u64) {
        if self.stopped {
            return;
        }
        info!(session_id = %self.session.id, "Stopping replay container");
        self.stopped = true;
        self.timer.reset();

        if self.is_flushing_mode() {
            let mut payload = self.pending_send.take();
            if self.buffer.has_events() {
                let drained = self.buffer.drain(self.session.segment_id);
                payload = Some(match payload {
                    Some(mut held) => {
                        held.events.extend(drained.events);
                        held
                    }
                    None => drained,
                });
            }
            if let Some(payload) = payload {
                self.send_final(&payload).await;
            }
        } else {
            let discarded = self.buffer.clear();
            if discarded > 0 {
                debug!(discarded, "Discarded frames of a never-promoted session");
            }
        }

        if let Err(err) = self.store.clear() {
            warn!(error = %err, "Failed to clear persisted session at stop");
        }
        let _ = now_ms;
    }

    async fn send_final(&mut self, payload: &SegmentPayload) {
        match self.sender.send(payload).await {
            SendOutcome::Success => {
                self.stats.segments_sent += 1;
                self.stats.frames_sent += payload.len() as u64;
                self.session.advance_segment();
            }
            outcome => {
                self.stats.segments_abandoned += 1;
                warn!(
                    segment_id = payload.segment_id,
                    ?outcome,
                    "Final flush not delivered; payload abandoned"
                );
            }
        }
    }

    // ===== Session upkeep =====

    /// Replace the session if it expired. In-memory state is authoritative
    /// on the fast path; the full lifecycle resolution (including the
    /// buffer continuity rules) only runs once expiry is established.
    fn checkpoint_session(&mut self, now_ms: u64) -> bool {
        if !self.session.is_expired(
            self.config.timeouts,
            self.config.max_replay_duration_ms,
            now_ms,
        ) {
            return false;
        }
        let handoff = lifecycle::get_or_create_session(
            Some(&self.session),
            &*self.store,
            self.config.persistence,
            self.config.timeouts,
            self.config.max_replay_duration_ms,
            self.config.sampling,
            &mut self.rng,
            now_ms,
        );
        let replaced = handoff.session.id != self.session.id;
        if replaced {
            self.rollover(handoff.session);
        } else {
            // Buffer continuity: same identity carried across the expiry.
            self.session = handoff.session;
        }
        replaced
    }

    fn rollover(&mut self, next: Session) {
        info!(
            old_session_id = %self.session.id,
            session_id = %next.id,
            sampled = %next.sampled,
            "Session replaced"
        );
        let discarded = self.buffer.clear();
        if discarded > 0 {
            debug!(discarded, "Dropped unshipped frames of the replaced session");
        }
        if self.pending_send.take().is_some() {
            self.stats.segments_abandoned += 1;
        }
        self.timer.reset();
        self.guard = MutationGuard::new(
            self.config.mutation_breadcrumb_limit,
            self.config.mutation_limit,
        );
        self.idle_paused = false;
        self.session = next;
    }

    fn is_flushing_mode(&self) -> bool {
        matches!(self.session.sampled, Sampled::Session | Sampled::Buffer)
    }

    // ===== Introspection =====

    /// The active session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The transport sender.
    #[must_use]
    pub fn sender(&self) -> &S {
        &self.sender
    }

    /// Lifetime counters.
    #[must_use]
    pub fn stats(&self) -> ContainerStats {
        self.stats
    }

    /// Whether [`ReplayContainer::stop`] has run.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Whether capture is paused by the idle gap rule.
    #[must_use]
    pub fn is_idle_paused(&self) -> bool {
        self.idle_paused
    }

    /// Full pipeline snapshot.
    #[must_use]
    pub fn status(&self) -> ContainerStatus {
        ContainerStatus {
            session_id: self.session.id.clone(),
            sampled: self.session.sampled,
            segment_id: self.session.segment_id,
            should_refresh: self.session.should_refresh,
            stopped: self.stopped,
            idle_paused: self.idle_paused,
            mutation_halted: self.guard.is_halted(),
            buffered_frames: self.buffer.len(),
            holding_payload: self.pending_send.is_some(),
            flush: self.timer.status(),
            stats: self.stats,
            buffer_stats: self.buffer.stats(),
            mutation_stats: self.guard.stats(),
        }
    }
}

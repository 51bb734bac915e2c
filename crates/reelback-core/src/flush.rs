//! Flush scheduling state machine.
//!
//! Decides *when* a buffered segment gets shipped. All timing is expressed
//! against an injected millisecond clock, so the machine is fully
//! deterministic; the async driver merely sleeps until
//! [`FlushTimer::next_deadline_ms`] and calls [`FlushTimer::poll`].
//!
//! # States
//!
//! ```text
//!            note_activity                poll(deadline)
//!   Idle ------------------> Armed ------------------------> Flushing
//!    ^                        |  ^                            |  |  |
//!    |        (min timer debounced, ceiling fixed)   success  |  |  |
//!    +--------------------------------------------------------+  |  |
//!    |                                                retryable   |  rate
//!    |                 second retryable failure:                  |  limited
//!    |                 drop segment, back to Idle                 |  |
//!    +---- RetryWait <--------------------------------------------+  |
//!    |         | backoff elapsed -> Flushing (resend)                |
//!    +---- Suspended <-----------------------------------------------+
//!              | retry_after elapsed -> Flushing (resend)
//! ```
//!
//! Two timers govern `Armed`: a min-delay timer that restarts on every
//! buffered frame (debounce) and a ceiling anchored when the state was
//! entered. The ceiling never moves, so a steady stream of activity cannot
//! starve the flush. The effective deadline is whichever comes first.
//!
//! At most one send is in flight: `poll` only starts a flight from `Armed`,
//! `RetryWait`, or `Suspended`, and each of those transitions into
//! `Flushing`, which never fires again until a `complete_*` call resolves it.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{
    DEFAULT_FLUSH_MAX_DELAY_MS, DEFAULT_FLUSH_MIN_DELAY_MS, DEFAULT_FLUSH_RETRY_BACKOFF_MS,
};

// ===== Configuration =====

/// Timing knobs for the flush scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Quiet period after the latest buffered frame before a flush fires.
    pub min_delay_ms: u64,
    /// Hard ceiling from the first buffered frame of a cycle; activity
    /// cannot push the flush past this.
    pub max_delay_ms: u64,
    /// Fixed wait before the single retry of a failed send.
    pub retry_backoff_ms: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: DEFAULT_FLUSH_MIN_DELAY_MS,
            max_delay_ms: DEFAULT_FLUSH_MAX_DELAY_MS,
            retry_backoff_ms: DEFAULT_FLUSH_RETRY_BACKOFF_MS,
        }
    }
}

// ===== States and verdicts =====

/// Debounce window while the timer is armed. The min deadline moves with
/// every new frame; the ceiling is fixed at arm time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArmWindow {
    min_deadline_ms: u64,
    ceiling_ms: u64,
}

impl ArmWindow {
    fn anchored(now_ms: u64, config: &FlushConfig) -> Self {
        Self {
            min_deadline_ms: now_ms.saturating_add(config.min_delay_ms),
            ceiling_ms: now_ms.saturating_add(config.max_delay_ms),
        }
    }

    fn extend(&mut self, now_ms: u64, config: &FlushConfig) {
        self.min_deadline_ms = now_ms.saturating_add(config.min_delay_ms);
    }

    /// Whichever of the two timers expires first.
    fn deadline_ms(&self) -> u64 {
        self.min_deadline_ms.min(self.ceiling_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Idle,
    Armed { window: ArmWindow },
    Flushing,
    RetryWait { deadline_ms: u64 },
    Suspended { resume_at_ms: u64 },
}

/// Public-facing scheduler phase for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPhase {
    Idle,
    Armed,
    Flushing,
    RetryWait,
    Suspended,
}

/// What the driver should do after a [`FlushTimer::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDirective {
    /// No deadline has expired; sleep until [`FlushTimer::next_deadline_ms`].
    Wait,
    /// Start a send. When `resend` is true the caller must resend the
    /// payload it held back from the failed or rate-limited flight instead
    /// of draining fresh frames.
    StartFlush { resend: bool },
}

/// Outcome of reporting a retryable send failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    /// First failure for this payload: hold it and resend at `at_ms`.
    WillRetry { at_ms: u64 },
    /// Second consecutive failure: the segment is dropped.
    Dropped,
}

/// Lifetime scheduler counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlushStats {
    /// Sends that completed successfully.
    pub flushes_completed: u64,
    /// Retries scheduled after a first failure.
    pub retries_scheduled: u64,
    /// Segments dropped after the retry also failed.
    pub segments_dropped: u64,
    /// Suspensions entered on rate-limit responses.
    pub rate_limit_suspensions: u64,
}

/// Snapshot of scheduler state for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushTimerStatus {
    pub phase: FlushPhase,
    pub next_deadline_ms: Option<u64>,
    /// Failed sends for the payload currently in flight or held.
    pub attempts: u32,
    /// Whether frames arrived while a flight was unresolved.
    pub pending_activity: bool,
    pub stats: FlushStats,
}

// ===== Timer =====

/// Deterministic dual-timer flush scheduler.
#[derive(Debug)]
pub struct FlushTimer {
    config: FlushConfig,
    state: TimerState,
    /// Retryable failures recorded for the current payload. Rate limits do
    /// not count; only `complete_retryable` increments this.
    attempts: u32,
    /// Debounce window for frames that arrived while a flight was
    /// unresolved. Applied once the flight completes.
    pending: Option<ArmWindow>,
    stats: FlushStats,
}

impl FlushTimer {
    #[must_use]
    pub fn new(config: FlushConfig) -> Self {
        Self {
            config,
            state: TimerState::Idle,
            attempts: 0,
            pending: None,
            stats: FlushStats::default(),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> FlushPhase {
        match self.state {
            TimerState::Idle => FlushPhase::Idle,
            TimerState::Armed { .. } => FlushPhase::Armed,
            TimerState::Flushing => FlushPhase::Flushing,
            TimerState::RetryWait { .. } => FlushPhase::RetryWait,
            TimerState::Suspended { .. } => FlushPhase::Suspended,
        }
    }

    /// Whether a send is currently unresolved.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self.state, TimerState::Flushing)
    }

    /// Record that a frame was buffered at `now_ms`.
    ///
    /// From `Idle` this arms both timers. While `Armed` it restarts the min
    /// timer only. While a flight is unresolved the activity is remembered
    /// and re-arms the timer once the flight completes.
    pub fn note_activity(&mut self, now_ms: u64) {
        match &mut self.state {
            TimerState::Idle => {
                let window = ArmWindow::anchored(now_ms, &self.config);
                debug!(
                    min_deadline_ms = window.min_deadline_ms,
                    ceiling_ms = window.ceiling_ms,
                    "Flush timer armed"
                );
                self.state = TimerState::Armed { window };
            }
            TimerState::Armed { window } => {
                window.extend(now_ms, &self.config);
            }
            TimerState::Flushing | TimerState::RetryWait { .. } | TimerState::Suspended { .. } => {
                match &mut self.pending {
                    Some(window) => window.extend(now_ms, &self.config),
                    None => self.pending = Some(ArmWindow::anchored(now_ms, &self.config)),
                }
            }
        }
    }

    /// Ask for a flush as soon as possible. Used for manual flushes and the
    /// best-effort flush during shutdown. A rate-limit suspension is not
    /// overridden: the request is absorbed and the held payload goes out at
    /// resume time anyway.
    pub fn request_flush(&mut self, now_ms: u64) {
        match &mut self.state {
            TimerState::Idle => {
                self.state = TimerState::Armed {
                    window: ArmWindow {
                        min_deadline_ms: now_ms,
                        ceiling_ms: now_ms,
                    },
                };
            }
            TimerState::Armed { window } => {
                window.min_deadline_ms = now_ms;
            }
            TimerState::Flushing => match &mut self.pending {
                Some(window) => window.min_deadline_ms = now_ms,
                None => {
                    self.pending = Some(ArmWindow {
                        min_deadline_ms: now_ms,
                        ceiling_ms: now_ms.saturating_add(self.config.max_delay_ms),
                    });
                }
            },
            TimerState::RetryWait { deadline_ms } => {
                *deadline_ms = now_ms;
            }
            TimerState::Suspended { resume_at_ms } => {
                debug!(
                    resume_at_ms = *resume_at_ms,
                    "Flush requested during rate-limit suspension; deferring to resume"
                );
            }
        }
    }

    /// The next instant at which [`FlushTimer::poll`] can make progress, if
    /// any. `Flushing` has no deadline: resolution is event-driven.
    #[must_use]
    pub fn next_deadline_ms(&self) -> Option<u64> {
        match self.state {
            TimerState::Idle | TimerState::Flushing => None,
            TimerState::Armed { window } => Some(window.deadline_ms()),
            TimerState::RetryWait { deadline_ms } => Some(deadline_ms),
            TimerState::Suspended { resume_at_ms } => Some(resume_at_ms),
        }
    }

    /// Advance the machine to `now_ms`, starting a flight if a deadline has
    /// expired.
    pub fn poll(&mut self, now_ms: u64) -> FlushDirective {
        match self.state {
            TimerState::Idle | TimerState::Flushing => FlushDirective::Wait,
            TimerState::Armed { window } => {
                if now_ms >= window.deadline_ms() {
                    debug!(now_ms, deadline_ms = window.deadline_ms(), "Flush firing");
                    self.state = TimerState::Flushing;
                    FlushDirective::StartFlush { resend: false }
                } else {
                    FlushDirective::Wait
                }
            }
            TimerState::RetryWait { deadline_ms } => {
                if now_ms >= deadline_ms {
                    debug!(now_ms, "Retrying failed send");
                    self.state = TimerState::Flushing;
                    FlushDirective::StartFlush { resend: true }
                } else {
                    FlushDirective::Wait
                }
            }
            TimerState::Suspended { resume_at_ms } => {
                if now_ms >= resume_at_ms {
                    debug!(now_ms, "Rate-limit suspension elapsed; resending");
                    self.state = TimerState::Flushing;
                    FlushDirective::StartFlush { resend: true }
                } else {
                    FlushDirective::Wait
                }
            }
        }
    }

    /// The in-flight send succeeded. Re-arms from any activity that arrived
    /// during the flight, otherwise returns to idle.
    pub fn complete_success(&mut self, now_ms: u64) {
        debug_assert!(self.is_in_flight(), "complete_success outside a flight");
        self.stats.flushes_completed += 1;
        self.attempts = 0;
        self.rearm_from_pending(now_ms);
    }

    /// The flight resolved without sending anything (the buffer turned out
    /// to be empty). Counts nothing; re-arms from pending activity.
    pub fn complete_empty(&mut self, now_ms: u64) {
        debug_assert!(self.is_in_flight(), "complete_empty outside a flight");
        self.attempts = 0;
        self.rearm_from_pending(now_ms);
    }

    /// The in-flight send failed with a retryable error. The first failure
    /// schedules exactly one retry after the fixed backoff; a second failure
    /// drops the segment.
    pub fn complete_retryable(&mut self, now_ms: u64) -> RetryVerdict {
        debug_assert!(self.is_in_flight(), "complete_retryable outside a flight");
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts == 1 {
            let at_ms = now_ms.saturating_add(self.config.retry_backoff_ms);
            self.stats.retries_scheduled += 1;
            debug!(retry_at_ms = at_ms, "Send failed; retry scheduled");
            self.state = TimerState::RetryWait { deadline_ms: at_ms };
            RetryVerdict::WillRetry { at_ms }
        } else {
            self.stats.segments_dropped += 1;
            warn!(
                attempts = self.attempts,
                "Send failed twice; dropping segment"
            );
            self.attempts = 0;
            self.rearm_from_pending(now_ms);
            RetryVerdict::Dropped
        }
    }

    /// The in-flight send was rejected by a rate limit. Suspends until
    /// `retry_after_ms` elapses; the payload stays held and the failure
    /// budget is untouched.
    pub fn complete_rate_limited(&mut self, now_ms: u64, retry_after_ms: u64) {
        debug_assert!(self.is_in_flight(), "complete_rate_limited outside a flight");
        let resume_at_ms = now_ms.saturating_add(retry_after_ms);
        self.stats.rate_limit_suspensions += 1;
        warn!(retry_after_ms, resume_at_ms, "Rate limited; suspending sends");
        self.state = TimerState::Suspended { resume_at_ms };
    }

    /// Cancel all timers and pending activity. Used at shutdown and when a
    /// session is replaced.
    pub fn reset(&mut self) {
        self.state = TimerState::Idle;
        self.attempts = 0;
        self.pending = None;
    }

    /// Lifetime counters.
    #[must_use]
    pub fn stats(&self) -> FlushStats {
        self.stats
    }

    /// Status snapshot for reporting.
    #[must_use]
    pub fn status(&self) -> FlushTimerStatus {
        FlushTimerStatus {
            phase: self.phase(),
            next_deadline_ms: self.next_deadline_ms(),
            attempts: self.attempts,
            pending_activity: self.pending.is_some(),
            stats: self.stats,
        }
    }

    fn rearm_from_pending(&mut self, now_ms: u64) {
        match self.pending.take() {
            Some(window) => {
                debug!(
                    now_ms,
                    min_deadline_ms = window.min_deadline_ms,
                    ceiling_ms = window.ceiling_ms,
                    "Re-arming from activity during flight"
                );
                self.state = TimerState::Armed { window };
            }
            None => {
                self.state = TimerState::Idle;
            }
        }
    }
}

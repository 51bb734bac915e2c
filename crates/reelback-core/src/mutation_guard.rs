//! Mutation-storm rate limiting
//!
//! Pathological DOM churn (an animating canvas, a polling widget rewriting
//! the tree) can grow a replay buffer far faster than it can ever ship. The
//! [`MutationGuard`] is the protection: a monotonic counter over the mutation
//! counts reported by DOM frames, with two thresholds.
//!
//! - Crossing the lower advisory threshold once emits a `replay.mutations`
//!   breadcrumb with `limit: false`; capture continues.
//! - Crossing the halt threshold emits the same breadcrumb with
//!   `limit: true` and answers [`MutationDecision::Halt`]. The halt is
//!   one-way for the session: the container stops DOM capture for good.
//!
//! The counter resets at each flush boundary while the limit has not been
//! exceeded. This is deliberately a coarse monotonic guard rather than a
//! sliding window: predictability over precision.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::frame::RecordingFrame;

/// Verdict for one observed mutation batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationDecision {
    /// Under all thresholds; capture proceeds.
    Continue,
    /// Advisory threshold crossed; capture proceeds, one breadcrumb emitted.
    Warn,
    /// Halt threshold crossed (or previously crossed); stop DOM capture.
    Halt,
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MutationGuardStats {
    /// Mutation units observed over the guard's lifetime.
    pub observed_total: u64,
    /// Advisory frames emitted (both `limit: false` and `limit: true`).
    pub advisories_emitted: u64,
    /// Flush-boundary resets applied.
    pub resets: u64,
    /// Whether the one-way halt has fired.
    pub halted: bool,
}

/// Monotonic mutation counter with advisory and halt thresholds.
#[derive(Debug)]
pub struct MutationGuard {
    breadcrumb_limit: u64,
    limit: u64,
    observed: u64,
    warned: bool,
    halted: bool,
    stats: MutationGuardStats,
}

impl MutationGuard {
    /// Guard with the given advisory and halt thresholds. Callers validate
    /// `breadcrumb_limit <= limit` at config resolution.
    #[must_use]
    pub fn new(breadcrumb_limit: u64, limit: u64) -> Self {
        debug_assert!(limit > 0, "mutation limit must be positive");
        debug_assert!(
            breadcrumb_limit <= limit,
            "advisory threshold above halt threshold"
        );
        Self {
            breadcrumb_limit,
            limit,
            observed: 0,
            warned: false,
            halted: false,
            stats: MutationGuardStats::default(),
        }
    }

    /// Feed one mutation batch. Returns the verdict and, on a threshold
    /// crossing, the advisory frame to append (timestamped `now_ms`).
    pub fn observe(
        &mut self,
        mutation_count: u32,
        now_ms: u64,
    ) -> (MutationDecision, Option<RecordingFrame>) {
        self.stats.observed_total += u64::from(mutation_count);

        if self.halted {
            // One-way: no further frames, the verdict just keeps saying so.
            return (MutationDecision::Halt, None);
        }

        self.observed += u64::from(mutation_count);

        if self.observed >= self.limit {
            self.halted = true;
            self.stats.halted = true;
            self.stats.advisories_emitted += 1;
            warn!(
                count = self.observed,
                limit = self.limit,
                "Mutation limit exceeded; halting DOM capture for this session"
            );
            return (
                MutationDecision::Halt,
                Some(RecordingFrame::mutation_advisory(now_ms, self.observed, true)),
            );
        }

        if !self.warned && self.observed >= self.breadcrumb_limit {
            self.warned = true;
            self.stats.advisories_emitted += 1;
            debug!(
                count = self.observed,
                breadcrumb_limit = self.breadcrumb_limit,
                "Mutation churn crossed advisory threshold"
            );
            return (
                MutationDecision::Warn,
                Some(RecordingFrame::mutation_advisory(
                    now_ms,
                    self.observed,
                    false,
                )),
            );
        }

        (MutationDecision::Continue, None)
    }

    /// Reset the counter at a flush boundary. No-op once halted, since the
    /// counter is no longer meaningful.
    pub fn reset_at_flush(&mut self) {
        if self.halted {
            return;
        }
        self.observed = 0;
        self.warned = false;
        self.stats.resets += 1;
    }

    /// Whether the one-way halt has fired.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Mutation units accumulated since the last reset.
    #[must_use]
    pub fn current_count(&self) -> u64 {
        self.observed
    }

    /// Diagnostic counters.
    #[must_use]
    pub fn stats(&self) -> MutationGuardStats {
        self.stats
    }
}

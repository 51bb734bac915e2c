//! Session lifecycle: creation, reuse, expiry, persistence
//!
//! The lifecycle manager owns every decision about session continuity. It is
//! written as free functions over explicit inputs (`now_ms`, an injected rng,
//! a store reference) so the whole decision tree is deterministic under test.
//!
//! # Algorithm
//!
//! ```text
//! candidate = sticky ? store.load() || existing : existing
//!
//! candidate missing ──────────────────────────► new session (sampling draw)
//! candidate live ─────────────────────────────► reuse unchanged ("saved")
//! candidate expired:
//!   sampled == buffer, never shipped ──────────► reuse identity ("saved")
//!   sampled == buffer, already shipped ────────► new session, sampled = No,
//!                                                no draw ("new")
//!   otherwise ─────────────────────────────────► new session (sampling draw)
//! ```
//!
//! Expiry is `(now - last_activity) > idle_expire` or
//! `(now - started) > max_replay_duration`. The idle-pause threshold never
//! expires a session.
//!
//! Store failures are non-fatal by contract: a failed read behaves like an
//! empty store, a failed write leaves the session in memory for the cycle,
//! and neither ever propagates out of this module.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::session::{Persistence, Sampled, SamplingConfig, Session, Timeouts};
use crate::session_store::SessionStore;

/// How the returned session came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOrigin {
    /// A brand-new session (fresh id, segment 0).
    New,
    /// An existing session returned as-is, identity unchanged.
    Saved,
}

/// Result of [`get_or_create_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandoff {
    /// The session to record into.
    pub session: Session,
    /// Whether it was created or carried over.
    pub origin: SessionOrigin,
}

/// Creation-time sampling: one uniform draw in `[0, 1)` against the session
/// sample rate. A failed draw yields [`Sampled::No`] in both modes; with
/// buffering allowed that decision is deferred (promotable to buffer mode by
/// the external error trigger), without it the session is permanently
/// unsampled.
pub fn sample_session_decision(sampling: SamplingConfig, rng: &mut impl Rng) -> Sampled {
    let draw: f64 = rng.random();
    if draw < sampling.session_sample_rate {
        Sampled::Session
    } else {
        if sampling.allow_buffering {
            debug!("Session not sampled; decision deferred for buffering mode");
        }
        Sampled::No
    }
}

/// Resolve the session to record into: reuse a live candidate, apply the
/// buffer continuity rules to an expired one, or create afresh.
///
/// Never fails: store errors degrade to in-memory behavior for this cycle.
#[allow(clippy::too_many_arguments)]
pub fn get_or_create_session(
    existing: Option<&Session>,
    store: &dyn SessionStore,
    persistence: Persistence,
    timeouts: Timeouts,
    max_replay_duration_ms: u64,
    sampling: SamplingConfig,
    rng: &mut impl Rng,
    now_ms: u64,
) -> SessionHandoff {
    let fetched = match persistence {
        Persistence::Sticky => fetch_session(store),
        Persistence::Memory => None,
    };
    let candidate = fetched.or_else(|| existing.cloned());

    if let Some(candidate) = candidate {
        if !candidate.is_expired(timeouts, max_replay_duration_ms, now_ms) {
            return SessionHandoff {
                session: candidate,
                origin: SessionOrigin::Saved,
            };
        }

        if candidate.sampled == Sampled::Buffer {
            if candidate.should_refresh {
                // A buffer session that never shipped keeps its identity
                // across expiry so the pre-error buffer stays one coherent
                // session rather than fragmenting on every idle gap.
                debug!(
                    session_id = %candidate.id,
                    "Reusing expired buffer session that never shipped"
                );
                persist_if_sticky(store, persistence, &candidate);
                return SessionHandoff {
                    session: candidate,
                    origin: SessionOrigin::Saved,
                };
            }

            // The buffer already shipped its payload. The replacement is
            // unsampled outright; it does not re-enter the sampling draw.
            let session = Session::new(Sampled::No, now_ms);
            debug!(
                old_session_id = %candidate.id,
                session_id = %session.id,
                "Spent buffer session expired; replacement is unsampled"
            );
            persist_if_sticky(store, persistence, &session);
            return SessionHandoff {
                session,
                origin: SessionOrigin::New,
            };
        }
    }

    let sampled = sample_session_decision(sampling, rng);
    let session = Session::new(sampled, now_ms);
    debug!(session_id = %session.id, sampled = %session.sampled, "Created new session");
    persist_if_sticky(store, persistence, &session);
    SessionHandoff {
        session,
        origin: SessionOrigin::New,
    }
}

/// Record a qualifying activity signal and persist when sticky.
pub fn touch(
    session: &mut Session,
    store: &dyn SessionStore,
    persistence: Persistence,
    now_ms: u64,
) {
    session.touch_at(now_ms);
    persist_if_sticky(store, persistence, session);
}

/// Persist the session when sticky persistence is enabled; write failures
/// degrade to in-memory behavior.
pub fn persist_if_sticky(store: &dyn SessionStore, persistence: Persistence, session: &Session) {
    if persistence == Persistence::Sticky {
        if let Err(err) = store.save(session) {
            warn!(
                error = %err,
                session_id = %session.id,
                "Session store write failed; session continues in memory"
            );
        }
    }
}

fn fetch_session(store: &dyn SessionStore) -> Option<Session> {
    match store.load() {
        Ok(found) => found,
        Err(err) => {
            debug!(error = %err, "Session store read failed; treating store as empty");
            None
        }
    }
}

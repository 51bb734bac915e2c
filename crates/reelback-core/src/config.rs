//! Configuration resolution
//!
//! Callers describe what they want with [`ReplayOptions`] (every field
//! optional or defaulted, including the deprecated flat sample-rate aliases
//! kept for compatibility with older integration surfaces). Resolution is a
//! single explicit step: [`ReplayOptions::resolve`] translates aliases once,
//! validates, and produces one canonical [`ReplayConfig`] that downstream
//! code treats as immutable. Nothing below the resolution boundary ever
//! looks at a deprecated field again.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::flush::FlushConfig;
use crate::session::{Persistence, SamplingConfig, Timeouts};

// ===== Defaults =====

/// Quiet-period debounce before a flush.
pub const DEFAULT_FLUSH_MIN_DELAY_MS: u64 = 5_000;
/// Hard ceiling forcing a flush under continuous activity.
pub const DEFAULT_FLUSH_MAX_DELAY_MS: u64 = 15_000;
/// Fixed backoff before the single retry of a failed send.
pub const DEFAULT_FLUSH_RETRY_BACKOFF_MS: u64 = 5_000;
/// Probability that a new session is fully sampled.
pub const DEFAULT_SESSION_SAMPLE_RATE: f64 = 0.1;
/// Host-side error sample rate; buffering mode is enabled when positive.
pub const DEFAULT_ERROR_SAMPLE_RATE: f64 = 1.0;
/// Idle gap that pauses capture without ending the session.
pub const DEFAULT_IDLE_PAUSE_MS: u64 = 300_000;
/// Idle gap that expires the session.
pub const DEFAULT_IDLE_EXPIRE_MS: u64 = 900_000;
/// Absolute ceiling on a session's lifetime.
pub const DEFAULT_MAX_REPLAY_DURATION_MS: u64 = 3_600_000;
/// Mutation count at which DOM capture halts for the session.
pub const DEFAULT_MUTATION_LIMIT: u64 = 10_000;
/// Mutation count at which a single advisory breadcrumb is emitted.
pub const DEFAULT_MUTATION_BREADCRUMB_LIMIT: u64 = 750;
/// How much trailing history an unpromoted buffer session retains.
pub const DEFAULT_BUFFER_RETENTION_MS: u64 = 60_000;

// ===== Raw options =====

/// User-facing options, pre-resolution.
///
/// Deserializable from TOML (see [`ReplayOptions::from_path`]) or built in
/// code. Unknown fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayOptions {
    /// Quiet-period debounce before a flush, ms.
    pub flush_min_delay_ms: u64,
    /// Hard flush ceiling under continuous activity, ms.
    pub flush_max_delay_ms: u64,
    /// Fixed backoff before the single send retry, ms.
    pub flush_retry_backoff_ms: u64,
    /// Persist sessions through the session store across restarts.
    pub sticky_session: bool,
    /// Probability that a new session is fully sampled.
    pub replays_session_sample_rate: Option<f64>,
    /// Error sample rate; buffering mode is enabled when positive.
    pub replays_on_error_sample_rate: Option<f64>,
    /// Deprecated alias for `replays_session_sample_rate`.
    pub session_sample_rate: Option<f64>,
    /// Deprecated alias for `replays_on_error_sample_rate`.
    pub error_sample_rate: Option<f64>,
    /// Mutation count at which DOM capture halts for the session.
    pub mutation_limit: u64,
    /// Mutation count at which one advisory breadcrumb is emitted.
    pub mutation_breadcrumb_limit: u64,
    /// Absolute ceiling on a session's lifetime, ms.
    pub max_replay_duration_ms: u64,
    /// Idle gap that pauses capture, ms.
    pub idle_pause_ms: u64,
    /// Idle gap that expires the session, ms.
    pub idle_expire_ms: u64,
    /// Trailing history retained by an unpromoted buffer session, ms.
    pub buffer_retention_ms: u64,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            flush_min_delay_ms: DEFAULT_FLUSH_MIN_DELAY_MS,
            flush_max_delay_ms: DEFAULT_FLUSH_MAX_DELAY_MS,
            flush_retry_backoff_ms: DEFAULT_FLUSH_RETRY_BACKOFF_MS,
            sticky_session: true,
            replays_session_sample_rate: None,
            replays_on_error_sample_rate: None,
            session_sample_rate: None,
            error_sample_rate: None,
            mutation_limit: DEFAULT_MUTATION_LIMIT,
            mutation_breadcrumb_limit: DEFAULT_MUTATION_BREADCRUMB_LIMIT,
            max_replay_duration_ms: DEFAULT_MAX_REPLAY_DURATION_MS,
            idle_pause_ms: DEFAULT_IDLE_PAUSE_MS,
            idle_expire_ms: DEFAULT_IDLE_EXPIRE_MS,
            buffer_retention_ms: DEFAULT_BUFFER_RETENTION_MS,
        }
    }
}

impl ReplayOptions {
    /// Parse options from a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Load options from a TOML file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Resolve into the canonical immutable configuration.
    ///
    /// Deprecated aliases are consulted exactly here: the canonical field
    /// wins when both are set, and any deprecated use emits one warning.
    pub fn resolve(self) -> Result<ReplayConfig, ConfigError> {
        if self.session_sample_rate.is_some() {
            warn!(
                "`session_sample_rate` is deprecated; set `replays_session_sample_rate` instead"
            );
        }
        if self.error_sample_rate.is_some() {
            warn!(
                "`error_sample_rate` is deprecated; set `replays_on_error_sample_rate` instead"
            );
        }

        let session_sample_rate = self
            .replays_session_sample_rate
            .or(self.session_sample_rate)
            .unwrap_or(DEFAULT_SESSION_SAMPLE_RATE);
        let error_sample_rate = self
            .replays_on_error_sample_rate
            .or(self.error_sample_rate)
            .unwrap_or(DEFAULT_ERROR_SAMPLE_RATE);

        check_rate("session_sample_rate", session_sample_rate)?;
        check_rate("error_sample_rate", error_sample_rate)?;

        if self.flush_min_delay_ms > self.flush_max_delay_ms {
            return Err(ConfigError::FlushDelayInverted {
                min: self.flush_min_delay_ms,
                max: self.flush_max_delay_ms,
            });
        }
        if self.mutation_limit == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "mutation_limit",
            });
        }
        if self.mutation_breadcrumb_limit > self.mutation_limit {
            return Err(ConfigError::MutationLimitsInverted {
                breadcrumb: self.mutation_breadcrumb_limit,
                limit: self.mutation_limit,
            });
        }
        if self.max_replay_duration_ms == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "max_replay_duration_ms",
            });
        }

        Ok(ReplayConfig {
            flush: FlushConfig {
                min_delay_ms: self.flush_min_delay_ms,
                max_delay_ms: self.flush_max_delay_ms,
                retry_backoff_ms: self.flush_retry_backoff_ms,
            },
            persistence: if self.sticky_session {
                Persistence::Sticky
            } else {
                Persistence::Memory
            },
            sampling: SamplingConfig {
                session_sample_rate,
                allow_buffering: error_sample_rate > 0.0,
            },
            error_sample_rate,
            timeouts: Timeouts {
                idle_pause_ms: self.idle_pause_ms,
                idle_expire_ms: self.idle_expire_ms,
            },
            max_replay_duration_ms: self.max_replay_duration_ms,
            mutation_limit: self.mutation_limit,
            mutation_breadcrumb_limit: self.mutation_breadcrumb_limit,
            buffer_retention_ms: self.buffer_retention_ms,
        })
    }
}

fn check_rate(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::RateOutOfRange { field, value })
    }
}

// ===== Canonical configuration =====

/// Canonical resolved configuration. Produced once by
/// [`ReplayOptions::resolve`]; never mutated downstream.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReplayConfig {
    /// Flush scheduler timing.
    pub flush: FlushConfig,
    /// Sticky vs memory-only session persistence.
    pub persistence: Persistence,
    /// Creation-time sampling inputs.
    pub sampling: SamplingConfig,
    /// Host-side error sample rate (carried for visibility; buffering mode is
    /// already derived into `sampling.allow_buffering`).
    pub error_sample_rate: f64,
    /// Idle pause/expire thresholds.
    pub timeouts: Timeouts,
    /// Absolute ceiling on a session's lifetime, ms.
    pub max_replay_duration_ms: u64,
    /// Mutation count at which DOM capture halts.
    pub mutation_limit: u64,
    /// Mutation count at which one advisory breadcrumb is emitted.
    pub mutation_breadcrumb_limit: u64,
    /// Trailing history retained by an unpromoted buffer session, ms.
    pub buffer_retention_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            flush: FlushConfig::default(),
            persistence: Persistence::Sticky,
            sampling: SamplingConfig::default(),
            error_sample_rate: DEFAULT_ERROR_SAMPLE_RATE,
            timeouts: Timeouts::default(),
            max_replay_duration_ms: DEFAULT_MAX_REPLAY_DURATION_MS,
            mutation_limit: DEFAULT_MUTATION_LIMIT,
            mutation_breadcrumb_limit: DEFAULT_MUTATION_BREADCRUMB_LIMIT,
            buffer_retention_ms: DEFAULT_BUFFER_RETENTION_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- resolution --------------------------------------------------------

    #[test]
    fn default_options_resolve_to_default_config() {
        let config = ReplayOptions::default().resolve().unwrap();
        assert_eq!(config, ReplayConfig::default());
        assert_eq!(config.flush.min_delay_ms, 5_000);
        assert_eq!(config.flush.max_delay_ms, 15_000);
        assert_eq!(config.persistence, Persistence::Sticky);
        assert!(config.sampling.allow_buffering);
    }

    #[test]
    fn canonical_rate_fields_win_over_deprecated_aliases() {
        let options = ReplayOptions {
            replays_session_sample_rate: Some(0.5),
            session_sample_rate: Some(0.9),
            ..Default::default()
        };
        let config = options.resolve().unwrap();
        assert!((config.sampling.session_sample_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn deprecated_aliases_apply_when_canonical_absent() {
        let options = ReplayOptions {
            session_sample_rate: Some(0.25),
            error_sample_rate: Some(0.0),
            ..Default::default()
        };
        let config = options.resolve().unwrap();
        assert!((config.sampling.session_sample_rate - 0.25).abs() < f64::EPSILON);
        // Zero error rate disables buffering mode.
        assert!(!config.sampling.allow_buffering);
    }

    #[test]
    fn zero_error_rate_disables_buffering() {
        let options = ReplayOptions {
            replays_on_error_sample_rate: Some(0.0),
            ..Default::default()
        };
        let config = options.resolve().unwrap();
        assert!(!config.sampling.allow_buffering);
    }

    #[test]
    fn memory_persistence_when_sticky_disabled() {
        let options = ReplayOptions {
            sticky_session: false,
            ..Default::default()
        };
        assert_eq!(
            options.resolve().unwrap().persistence,
            Persistence::Memory
        );
    }

    // -- validation --------------------------------------------------------

    #[test]
    fn out_of_range_rate_is_rejected() {
        let options = ReplayOptions {
            replays_session_sample_rate: Some(1.5),
            ..Default::default()
        };
        assert!(matches!(
            options.resolve(),
            Err(ConfigError::RateOutOfRange { field: "session_sample_rate", .. })
        ));

        let options = ReplayOptions {
            replays_on_error_sample_rate: Some(-0.1),
            ..Default::default()
        };
        assert!(matches!(
            options.resolve(),
            Err(ConfigError::RateOutOfRange { field: "error_sample_rate", .. })
        ));
    }

    #[test]
    fn inverted_flush_delays_are_rejected() {
        let options = ReplayOptions {
            flush_min_delay_ms: 20_000,
            flush_max_delay_ms: 15_000,
            ..Default::default()
        };
        assert!(matches!(
            options.resolve(),
            Err(ConfigError::FlushDelayInverted { min: 20_000, max: 15_000 })
        ));
    }

    #[test]
    fn inverted_mutation_limits_are_rejected() {
        let options = ReplayOptions {
            mutation_limit: 100,
            mutation_breadcrumb_limit: 200,
            ..Default::default()
        };
        assert!(matches!(
            options.resolve(),
            Err(ConfigError::MutationLimitsInverted { .. })
        ));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let options = ReplayOptions {
            mutation_limit: 0,
            mutation_breadcrumb_limit: 0,
            ..Default::default()
        };
        assert!(matches!(
            options.resolve(),
            Err(ConfigError::ZeroLimit { field: "mutation_limit" })
        ));

        let options = ReplayOptions {
            max_replay_duration_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            options.resolve(),
            Err(ConfigError::ZeroLimit { field: "max_replay_duration_ms" })
        ));
    }

    #[test]
    fn equal_flush_delays_are_allowed() {
        let options = ReplayOptions {
            flush_min_delay_ms: 200,
            flush_max_delay_ms: 200,
            ..Default::default()
        };
        assert!(options.resolve().is_ok());
    }

    // -- TOML --------------------------------------------------------------

    #[test]
    fn parses_partial_toml() {
        let raw = r#"
            flush_min_delay_ms = 200
            flush_max_delay_ms = 400
            sticky_session = false
            replays_session_sample_rate = 1.0
            mutation_limit = 250
            mutation_breadcrumb_limit = 100
        "#;
        let config = ReplayOptions::from_toml_str(raw).unwrap().resolve().unwrap();
        assert_eq!(config.flush.min_delay_ms, 200);
        assert_eq!(config.flush.max_delay_ms, 400);
        assert_eq!(config.persistence, Persistence::Memory);
        assert!((config.sampling.session_sample_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.mutation_limit, 250);
        // Unspecified fields keep their defaults.
        assert_eq!(config.timeouts.idle_expire_ms, DEFAULT_IDLE_EXPIRE_MS);
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let config = ReplayOptions::from_toml_str("").unwrap().resolve().unwrap();
        assert_eq!(config, ReplayConfig::default());
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        assert!(matches!(
            ReplayOptions::from_toml_str("flush_min_delay_ms = \"fast\""),
            Err(ConfigError::Toml(_))
        ));
    }
}

//! Error types for reelback-core

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for reelback-core
#[derive(Error, Debug)]
pub enum Error {
    /// Session store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Instance registry errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Runtime errors (driver channel failures, task join failures)
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Session store errors
///
/// These are always recoverable from the caller's point of view: lifecycle
/// paths log them and degrade to in-memory behavior for the cycle. They exist
/// as a typed enum so store implementations and their tests can be precise.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying I/O failed (file missing is not an error; that is `load() == None`)
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Stored session document could not be parsed
    #[error("stored session is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// In-memory store lock was poisoned by a panicking writer
    #[error("store lock poisoned")]
    Poisoned,
}

/// Configuration resolution errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A sample rate was outside `[0.0, 1.0]`
    #[error("sample rate {field} must be within [0.0, 1.0], got {value}")]
    RateOutOfRange {
        /// Offending field name
        field: &'static str,
        /// Rejected value
        value: f64,
    },

    /// Min flush delay exceeds max flush delay
    #[error("flush_min_delay_ms ({min}) must not exceed flush_max_delay_ms ({max})")]
    FlushDelayInverted {
        /// Configured minimum delay
        min: u64,
        /// Configured maximum delay
        max: u64,
    },

    /// Mutation advisory threshold exceeds the halt threshold
    #[error("mutation_breadcrumb_limit ({breadcrumb}) must not exceed mutation_limit ({limit})")]
    MutationLimitsInverted {
        /// Configured advisory threshold
        breadcrumb: u64,
        /// Configured halt threshold
        limit: u64,
    },

    /// A threshold that must be positive was zero
    #[error("{field} must be greater than zero")]
    ZeroLimit {
        /// Offending field name
        field: &'static str,
    },

    /// Config file could not be read
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        /// Path that failed to read
        path: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Config file could not be parsed as TOML
    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Instance registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A container is already registered with this registry
    #[error("multiple recording instances are not supported (already registered: {0})")]
    AlreadyRegistered(String),
}

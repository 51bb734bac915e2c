//! reelback-core: Core library for Reelback
//!
//! This crate provides the buffering and delivery engine for `rbk`, a
//! session-replay recorder pipeline: it decides which recording sessions to
//! keep, buffers their frames in memory, and ships them to a transport in
//! segments with debounced flushing and bounded retry.
//!
//! # Architecture
//!
//! ```text
//! Host Recorder → Replay Container → Event Buffer → Segment Payload
//!                       ↓                  ↓              ↓
//!               Session Lifecycle     Flush Timer → Transport Sender
//!                       ↓
//!                Session Store
//! ```
//!
//! # Modules
//!
//! - `session`: Session state, sampling decisions, expiry rules
//! - `session_store`: Session persistence backends (memory, file)
//! - `lifecycle`: Session creation, restoration, and rollover
//! - `frame`: Recording frame and breadcrumb types
//! - `event_buffer`: In-memory frame queue and segment payloads
//! - `mutation_guard`: Mutation burst rate limiting
//! - `flush`: Flush timer state machine (debounce, retry, rate limit)
//! - `transport`: Segment delivery trait and test senders
//! - `container`: Replay container composing all of the above
//! - `driver`: Async driver loop and command handle
//! - `registry`: Single-instance registration
//! - `config`: Configuration management
//! - `logging`: Structured logging setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod config;
pub mod container;
pub mod driver;
pub mod error;
pub mod event_buffer;
pub mod flush;
pub mod frame;
pub mod lifecycle;
pub mod logging;
pub mod mutation_guard;
pub mod registry;
pub mod session;
pub mod session_store;
pub mod transport;

pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

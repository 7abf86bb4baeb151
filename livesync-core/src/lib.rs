//! Live session resilience and synchronization layer
//!
//! Keeps a viewer's client consistent with a live, unreliable, multi-channel
//! broadcast: state converges despite dropped connections, backgrounded tabs,
//! out-of-order delivery, and duplicate signals arriving over two independent
//! transports (a server push channel and in-band video timed-metadata).
//!
//! ## Components
//!
//! - [`backoff::BackoffScheduler`]: pure jittered exponential backoff policy
//! - [`channel::ReconnectingChannel`]: reconnecting push-channel client with
//!   heartbeat-timeout detection (SSE transport in [`channel::sse`])
//! - [`bus::MetadataBus`]: typed pub/sub hub with per-subscription schema
//!   validation and signature-based deduplication
//! - [`watchdog::LatencyWatchdog`]: live-edge latency watchdog deciding
//!   between a cheap seek-to-live and a cooldown-limited stream reload
//! - [`continuity`]: background continuity strategy for hidden tabs
//! - [`session::SessionSync`]: orchestrator folding both transports into one
//!   watchable session snapshot

pub mod backoff;
pub mod bus;
pub mod channel;
pub mod config;
pub mod continuity;
pub mod error;
pub mod events;
pub mod logging;
pub mod session;
pub mod watchdog;

pub use config::Config;
pub use error::{Error, Result};

//! Turn-timer synchronization core.
//!
//! One host per session owns the authoritative clock and persists it on
//! the encounter document; every other participant mirrors it through
//! change notifications and renders the same countdown.

pub mod channel;
pub mod clock;
pub mod config;
pub mod display;
pub mod document;
pub mod encounter;
pub mod error;
pub mod event;
pub mod harness;
pub mod host;
pub mod policy;
pub mod presenter;
pub mod replica;
pub mod rng;
pub mod role;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod throttle;
pub mod tick_loop;
pub mod time;
pub mod types;
pub mod wait;

pub use error::{TimerError, TimerResult};
pub use role::{Intent, Phase, RoleKind};
pub use service::TimerService;

//! Centrally-led, replicated key/value store.
//!
//! One distinguished leader accepts reads and writes, stamps each
//! accepted write with the next monotonic sequence number, and publishes
//! it to a fleet of followers. Followers catch up on startup with a
//! snapshot exchange, then apply published updates that advance their
//! sequence and serve reads locally; writes sent to a follower are
//! rejected, never forwarded.
//!
//! The leader is chosen statically: the configured replica with the
//! smallest precedence id. There is no election, failover, or durable
//! state. A restarting follower rebuilds from a fresh snapshot, and the
//! publish channel is best-effort by design.
//!
//! # Modules
//!
//! - [`message`]: the four-frame wire codec
//! - [`socket`]: router/dealer/publish/subscribe socket roles over TCP
//! - [`replica`]: peer records, peers-file loading, leader selection
//! - [`store`]: per-engine key/value state and sequence counter
//! - [`leader`], [`follower`]: the two engine roles
//! - [`client`]: single request/reply client stub
//! - [`cli`]: the serve/get/put command-line surface

pub mod cli;
pub mod client;
pub mod error;
pub mod follower;
pub mod leader;
pub mod message;
pub mod replica;
pub mod socket;
pub mod store;

pub use error::{Error, Result};

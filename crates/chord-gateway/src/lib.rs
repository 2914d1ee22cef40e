//! chord-gateway - sharded Discord Gateway client
//!
//! One [`Shard`] is one WebSocket connection: connect, IDENTIFY or RESUME,
//! heartbeat on the server-provided cadence, and reconnect with backoff when
//! the connection drops. The [`GatewayClient`] manages the fleet: it
//! negotiates the shard count, launches shards in IDENTIFY-concurrency
//! buckets, and tracks fleet-wide readiness.
//!
//! Dispatched events flow out through a channel and into the [`Cache`],
//! whose population is gated by [`CacheFlags`].

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

mod cache;
mod client;
mod error;
mod flags;
mod payload;
mod shard;
mod status;

pub use cache::{Cache, CacheEntry, GuildCacheView};
pub use client::{partition_shards, shard_by_guild_id, GatewayClient, GatewayConfig};
pub use error::GatewayError;
pub use flags::{denied_intents, ApplicationFlags, CacheFlags, Intents};
pub use payload::{
    is_fatal_close, is_resumable_close, GatewayPayload, Hello, Opcode, PlayingStatus, Ready,
    StatusKind, CLOSE_NON_RESUMABLE,
};
pub use shard::{Shard, ShardEvent, ShardSnapshot};
pub use status::status_router;

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

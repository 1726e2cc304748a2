//! Infrastructure-backed transports.
//!
//! The transport abstraction and the in-memory implementation live in
//! `ddmrp-events`; this module adds the Redis Streams one.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsError, RedisStreamsTransport};

//! Infrastructure layer: environment configuration and the Redis Streams
//! transport (feature `redis`).

pub mod config;
pub mod event_bus;

pub use config::{ConfigError, EngineConfig};
#[cfg(feature = "redis")]
pub use event_bus::{RedisStreamsError, RedisStreamsTransport};

//! Infrastructure layer - StateStore adapters

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

pub use memory::InMemoryStateStore;

#[cfg(feature = "redis")]
pub use self::redis::RedisStateStore;

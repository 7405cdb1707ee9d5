pub mod memory;
pub mod redis;

pub use memory::InMemoryKvStore;
pub use redis::RedisKvStore;

pub mod database;
pub mod kv;
pub mod queue;

pub use database::sqlite::{
    SqliteAttemptRepository, SqliteDeadLetterRepository, SqliteSmsRequestRepository,
};
pub use kv::{InMemoryKvStore, RedisKvStore};
pub use queue::KvTaskQueue;

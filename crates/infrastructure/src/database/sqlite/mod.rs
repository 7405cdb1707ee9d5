pub mod sqlite_attempt_repository;
pub mod sqlite_dead_letter_repository;
pub mod sqlite_request_repository;

pub use sqlite_attempt_repository::SqliteAttemptRepository;
pub use sqlite_dead_letter_repository::SqliteDeadLetterRepository;
pub use sqlite_request_repository::SqliteSmsRequestRepository;

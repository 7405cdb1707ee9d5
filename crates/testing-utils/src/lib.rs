//! Test doubles for the gateway pipeline
//!
//! In-memory mock implementations of the repository traits and a
//! scripted provider client, usable without a database or network.

pub mod builders;
pub mod mocks;

pub use builders::request;
pub use mocks::{
    MockAttemptRepository, MockDeadLetterRepository, MockProviderClient, MockSmsRequestRepository,
};

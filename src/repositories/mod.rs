//! # Repository Layer
//!
//! Repository implementations that wrap SeaORM operations for connections, execution records and
//! credentials. State transitions that guard concurrency (claiming a connection, finalizing a
//! record) are single conditional `UPDATE`s.

pub mod connection;
pub mod credential;
pub mod execution;

pub use connection::{ConnectionRepository, NewConnection};
pub use credential::{CredentialRepository, SealedTokens};
pub use execution::{ExecutionOutcome, ExecutionRepository};

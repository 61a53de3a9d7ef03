//! # adsync
//!
//! Connection sync scheduler and execution engine: matches connection schedules against the
//! clock, runs each due connection through its source adapter and loads the rows into the
//! warehouse, recording every attempt.

pub mod config;
pub mod credential_store;
pub mod crypto;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod models;
pub mod repositories;
pub mod scheduler;
pub mod service_account;
pub mod sources;
pub mod sync_executor;
pub mod telemetry;
pub mod warehouse;
pub use migration;

//! # Probe data store
//!
//! Persistence for beacon-chain probe telemetry:
//! - Block and head delays (latest observation wins)
//! - Aggregate attestations and attestation summaries (first write wins)
//! - Filter-driven readers with ordering, selection and limits
//! - Caller-owned transactions for grouping writes
//! - Versioned schema migrations
//! - Configuration resolution for the daemon

pub mod config;
pub mod db;
pub mod error;

pub use db::{init_database, ProbeDb, ProbeTx};
pub use error::{Error, Result};

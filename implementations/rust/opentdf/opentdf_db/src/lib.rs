//! Connection layer of the OpenTDF policy store.
//!
//! This crate provides:
//!
//!  - a [`SqlxDatabase`](storage::database::SqlxDatabase) handle routing writes to the primary
//!    and reads to circuit-broken read replicas, with failover between primaries
//!  - a migrator running embedded SQL migrations in a configurable schema
//!  - the error type shared by the policy store
//!  - helpers to read configuration from the environment and to set up logging
#![deny(unsafe_code)]
#![warn(trivial_casts, unused_import_braces)]

mod error;

/// Environment variables parsing
pub mod env;
/// Logging setup
pub mod logs;
/// Storage support
pub mod storage;

pub use error::*;
pub use storage::database::*;

//! Policy store of the OpenTDF platform.
//!
//! This crate stores the attribute-based access control policy:
//!
//!  - namespaces, attribute definitions and their ordered values
//!  - key access servers, their keys, and the grants and key mappings attaching them
//!    to namespaces, attributes and values
//!  - the base key of the platform and the provider configs of the key managers
//!  - subject condition sets and subject mappings, with the lookup of the mappings
//!    matching some subject properties
//!  - resource mappings and resource mapping groups
//!  - actions, obligations, obligation values and their triggers
//!  - registered resources and the actions on attribute values attached to their values
//!
//! Every entity of the attribute tree, obligation and resource mapping group has a
//! fully-qualified name (FQN), indexed in the same transaction as the entity.
//!
//! All the repositories are implemented by [`PolicyDbClient`]. Several operations can be
//! grouped in a single transaction with [`PolicyDbClient::run_in_tx`].
#![deny(unsafe_code)]
#![warn(trivial_casts, unused_import_braces)]

mod config;

/// FQN construction and parsing
pub mod fqn;
/// Policy entities and requests
pub mod models;
/// Repositories and their SQL implementation
pub mod storage;
/// Validation of names, identifiers and keys
pub mod validation;

pub use config::*;
pub use opentdf_db::{Error, ErrorKind, Result};
pub use storage::*;

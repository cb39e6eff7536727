//! Shared primitives: errors, time, configuration, storage.
//!
//! Nothing in here knows about proofs. The ledger stores opaque bytes and the
//! snapshot store opaque JSON.

pub mod blobs;
pub mod config;
pub mod error;
pub mod hash;
pub mod ledger;
pub mod snapshot;
pub mod store;
pub mod time;

//! Sweep Firestore - REST backend for the sweep engine
//!
//! Implements [`sweep_core::DocumentStore`] against the Firestore REST v1 API:
//! - Pages come from `runQuery` ordered by document name with a `startAt`
//!   cursor that excludes the previous page's last document
//! - Direct updates are single-write `commit`s guarded by an
//!   `exists` precondition
//! - Conditional updates run in a read-write transaction, retried on
//!   contention
//!
//! Credentials are a pre-minted bearer token, or nothing at all against the
//! local emulator.

#![warn(unreachable_pub)]

pub mod client;
pub mod codec;
pub mod config;
pub mod transaction;

pub use client::FirestoreStore;
pub use config::{FirestoreConfig, FirestoreConfigError, DEFAULT_DATABASE, DEFAULT_ENDPOINT};
pub use transaction::TransactionOps;

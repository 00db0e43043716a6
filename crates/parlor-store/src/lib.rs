//! # parlor-store
//!
//! User-record store for Parlor, backed by SQLite.
//!
//! Each user row carries the participant's ordered channel subscription
//! list next to whatever the auth layer keeps about them. The crate exposes
//! a synchronous `Database` handle; async callers are expected to run it on
//! the blocking thread pool.

pub mod database;
pub mod migrations;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;

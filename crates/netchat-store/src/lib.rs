//! # netchat-store
//!
//! SQLite persistence for the netchat server.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed helpers for the three stores the chat
//! core depends on: credentials, durable per-stream logs with consumer
//! groups, and the activity rank aggregate.

pub mod credentials;
pub mod database;
pub mod migrations;
pub mod models;
pub mod rank;
pub mod streams;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;

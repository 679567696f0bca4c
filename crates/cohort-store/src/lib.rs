//! # cohort-store
//!
//! SQLite persistence for study rooms. The crate exposes a synchronous
//! `Database` handle that wraps a `rusqlite::Connection` and provides typed
//! helpers for every domain operation: rooms and membership, the session
//! state machine, chat history, shared content with annotations and the
//! collaborative edit log, and progress / leaderboard aggregation.
//!
//! Role rules come from `cohort_shared::role`; this crate looks the roles up
//! and applies them inside the same call that performs the mutation.

pub mod chat;
pub mod content;
pub mod database;
pub mod members;
pub mod migrations;
pub mod progress;
pub mod rooms;
pub mod sessions;
pub mod users;

mod error;
mod rows;

#[cfg(test)]
pub(crate) mod testutil;

pub use cohort_shared::models::{self, *};
pub use database::Database;
pub use error::{Result, StoreError};

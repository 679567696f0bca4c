//! # cohort-shared
//!
//! Types shared by the store and the server: domain records, room roles and
//! their permission rules, channel keys, the socket wire protocol and the
//! client-facing error codes.

pub mod code;
pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod role;
pub mod types;

pub use error::ErrorCode;
pub use role::Role;

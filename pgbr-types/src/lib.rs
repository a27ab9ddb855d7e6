//! Core value types shared by every pgbackrest-rs crate.
//!
//! Kept dependency-free of storage/io/repo concerns on purpose: this is the
//! crate every other crate in the workspace depends on, the same role
//! `pbs-api-types` plays for the teacher's workspace.

mod error;
mod label;
mod pgcontrol;
mod stanza;

pub use error::{Error, ErrorKind};
pub use label::{BackupLabel, BackupType, Timestamp15};
pub use pgcontrol::{PgControl, PgHistoryEntry};
pub use stanza::StanzaName;

/// Result type used across the workspace's library crates.
pub type Result<T> = std::result::Result<T, Error>;

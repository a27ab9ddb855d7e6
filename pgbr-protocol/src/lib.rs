//! The remote-agent message channel and the `PgClient` capability, both
//! named as external collaborators in the specification (§6) and modeled
//! here only through their interfaces. Framing is grounded on the teacher's
//! `create_control_socket` line-based JSON protocol
//! (`src/server/command_socket.rs`), adapted from async Tokio streams to a
//! synchronous `BufRead`/`Write` pair since the executor (`pgbr-executor`)
//! drives workers from a single-threaded cooperative dispatcher.

mod frame;
mod pgclient;

pub use frame::{Channel, Request, Response};
pub use pgclient::{PgClient, StopBackupResult, StartBackupResult};

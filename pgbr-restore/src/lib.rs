//! The restore engine: selects a backup set, remaps it onto a destination,
//! cleans the destination per §4.6.1, copies files back in parallel, and
//! emits recovery settings so the restored cluster comes up in recovery.

mod clean;
mod copy;
mod engine;
mod ownership;
mod paths;
mod recovery;
mod remap;
mod select;
mod selective;
mod targetmap;

pub use copy::RestoreOutcome;
pub use engine::{cmd_restore, RestoreOptions};
pub use recovery::{RecoveryOptions, RecoveryTarget, TargetAction};
pub use remap::RemapOptions;

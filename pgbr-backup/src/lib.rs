//! The backup engine: builds a manifest from a live cluster, reconciles it
//! against a prior backup for diff/incr requests, copies changed files into
//! the repository in parallel, and finalizes the backup set.

mod copy;
mod engine;
mod incr_prior;
mod paths;
mod resume;

pub use copy::CopyOutcome;
pub use engine::{cmd_backup, BackupOptions};
pub use incr_prior::IncrPrior;
pub use resume::ResumeCandidate;

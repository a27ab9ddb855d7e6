//! Argument grammar. Covers the flags the engine crates actually consume;
//! the full pgBackRest option surface (help renderer, config-file loader,
//! per-command `set`/`unset` overrides) is out of scope and left for a
//! later pass.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pgbr", author, version, about = "A pgBackRest-style PostgreSQL backup/restore tool")]
pub struct Cli {
    /// Stanza name (a configured PostgreSQL cluster + repository pair).
    #[arg(long, global = true)]
    pub stanza: String,

    /// Repository root directory.
    #[arg(long, global = true, default_value = "/var/lib/pgbackrest")]
    pub repo_path: PathBuf,

    /// Lock file directory.
    #[arg(long, global = true, default_value = "/tmp/pgbackrest")]
    pub lock_path: PathBuf,

    /// Number of worker threads the parallel copy step uses.
    #[arg(long, global = true, default_value_t = 1)]
    pub process_max: usize,

    /// Worker hang timeout, in seconds, for the parallel copy step.
    #[arg(long, global = true, default_value_t = 60)]
    pub protocol_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Take a full, differential or incremental backup.
    Backup(BackupArgs),
    /// Restore a backup set onto a destination data directory.
    Restore(RestoreArgs),
    /// Create the stop file, halting new commands against this stanza.
    Stop(StopArgs),
    /// Clear the stop file created by `stop`.
    Start,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum BackupTypeArg {
    Full,
    Diff,
    Incr,
}

#[derive(Parser)]
pub struct BackupArgs {
    /// PostgreSQL data directory to read the live cluster from.
    #[arg(long)]
    pub pg1_path: PathBuf,

    #[arg(long, value_enum, default_value_t = BackupTypeArg::Full)]
    pub backup_type: BackupTypeArg,

    #[arg(long)]
    pub compress: bool,

    #[arg(long)]
    pub checksum_page: bool,

    #[arg(long)]
    pub delta: bool,

    #[arg(long)]
    pub backup_standby: bool,

    /// Regex of paths to exclude from the manifest, repeatable.
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// Numeric identity of the PostgreSQL cluster within this stanza.
    #[arg(long, default_value_t = 1)]
    pub pg_id: u32,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum RecoveryTypeArg {
    Default,
    Immediate,
    Name,
    Time,
    Xid,
    Lsn,
    Preserve,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum TargetActionArg {
    Pause,
    Promote,
    Shutdown,
}

#[derive(Parser)]
pub struct RestoreArgs {
    /// Destination data directory.
    #[arg(long)]
    pub pg1_path: PathBuf,

    /// Backup set label, or "latest" for the newest backup (default).
    #[arg(long)]
    pub set: Option<String>,

    #[arg(long)]
    pub delta: bool,

    #[arg(long)]
    pub force: bool,

    #[arg(long, value_enum, default_value_t = RecoveryTypeArg::Default)]
    pub restore_type: RecoveryTypeArg,

    /// Target name/time/xid/lsn value, required unless --restore-type=immediate/default/preserve.
    #[arg(long)]
    pub target: Option<String>,

    #[arg(long)]
    pub target_timeline: Option<String>,

    #[arg(long, value_enum)]
    pub target_action: Option<TargetActionArg>,

    #[arg(long)]
    pub target_exclusive: Option<bool>,

    /// Command run by the restored cluster to fetch WAL segments.
    #[arg(long, default_value = "")]
    pub restore_command: String,

    /// Database name or id to keep; repeat for more than one. Every other
    /// user database is zero-filled instead of restored.
    #[arg(long = "db-include")]
    pub db_include: Vec<String>,

    /// `name=path` pair, repeatable, overriding one tablespace's destination.
    #[arg(long = "tablespace-map")]
    pub tablespace_map: Vec<String>,

    /// Redirect every unmapped tablespace under this directory.
    #[arg(long)]
    pub tablespace_map_all: Option<String>,

    /// `name=path` pair, repeatable, overriding one non-tablespace link's destination.
    #[arg(long = "link-map")]
    pub link_map: Vec<String>,

    /// Restore every non-tablespace link unchanged without requiring --link-map.
    #[arg(long)]
    pub link_all: bool,

    #[arg(long)]
    pub standby_mode: bool,
}

#[derive(Parser)]
pub struct StopArgs {
    #[arg(long)]
    pub force: bool,
}

//! Wires the parsed CLI onto the engine crates: builds the storage/lock
//! handles every command needs and translates `pgbr_types::Error` into the
//! `anyhow::Error` the binary reports at its edge.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;

use pgbr_backup::BackupOptions;
use pgbr_restore::{RecoveryOptions, RecoveryTarget, RemapOptions, RestoreOptions, TargetAction};
use pgbr_storage::{PosixStorage, Storage};
use pgbr_types::BackupType;

use crate::cli::{BackupArgs, BackupTypeArg, Cli, RecoveryTypeArg, RestoreArgs, StopArgs, TargetActionArg};
use crate::pgclient_local::LocalPgClient;

fn repo_storage(cli: &Cli) -> Arc<dyn Storage> {
    Arc::new(PosixStorage::new(cli.repo_path.join(&cli.stanza)))
}

/// The manifest's target/link paths are already absolute once remapped, so
/// the destination storage is rooted at `/` and every path given to it is
/// used as-is.
fn dest_storage() -> Arc<dyn Storage> {
    Arc::new(PosixStorage::new("/"))
}

pub fn run_backup(cli: &Cli, args: &BackupArgs) -> Result<()> {
    let pg = LocalPgClient::new(&args.pg1_path);
    let pg_storage: Arc<dyn Storage> = Arc::new(PosixStorage::new(&args.pg1_path));
    let repo_storage = repo_storage(cli);

    let exclude = args
        .exclude
        .iter()
        .map(|pattern| Regex::new(pattern).with_context(|| format!("invalid --exclude pattern '{pattern}'")))
        .collect::<Result<Vec<_>>>()?;

    let opts = BackupOptions {
        stanza: cli.stanza.clone(),
        pg_id: args.pg_id,
        backup_type: match args.backup_type {
            BackupTypeArg::Full => BackupType::Full,
            BackupTypeArg::Diff => BackupType::Diff,
            BackupTypeArg::Incr => BackupType::Incr,
        },
        compress: args.compress,
        checksum_page: args.checksum_page,
        backup_standby: args.backup_standby,
        delta: args.delta,
        exclude,
        process_max: cli.process_max,
        protocol_timeout: Duration::from_secs(cli.protocol_timeout),
    };

    let label = pgbr_backup::cmd_backup(&pg, pg_storage, repo_storage, &cli.lock_path, &opts)?;
    log::info!("backup '{label}' complete");
    println!("{label}");
    Ok(())
}

pub fn run_restore(cli: &Cli, args: &RestoreArgs) -> Result<()> {
    let repo_storage = repo_storage(cli);
    let dest_storage = dest_storage();

    let destination = args
        .pg1_path
        .to_str()
        .context("--pg1-path must be valid UTF-8")?
        .to_string();

    let tablespace_map = parse_pairs(&args.tablespace_map, "--tablespace-map")?;
    let link_map = parse_pairs(&args.link_map, "--link-map")?;

    let remap = RemapOptions {
        destination,
        tablespace_map,
        tablespace_map_id: HashMap::new(),
        tablespace_map_all: args.tablespace_map_all.clone(),
        link_map,
        link_all: args.link_all,
    };

    let (target, target_value, recovery_preserve) = match args.restore_type {
        RecoveryTypeArg::Default => (None, None, false),
        RecoveryTypeArg::Preserve => (None, None, true),
        RecoveryTypeArg::Immediate => (Some(RecoveryTarget::Immediate), Some(String::new()), false),
        RecoveryTypeArg::Name => (Some(RecoveryTarget::Name), Some(require_target(args)?), false),
        RecoveryTypeArg::Time => (Some(RecoveryTarget::Time), Some(require_target(args)?), false),
        RecoveryTypeArg::Xid => (Some(RecoveryTarget::Xid), Some(require_target(args)?), false),
        RecoveryTypeArg::Lsn => (Some(RecoveryTarget::Lsn), Some(require_target(args)?), false),
    };

    let recovery = RecoveryOptions {
        standby_mode: args.standby_mode,
        target,
        target_value,
        target_timeline: args.target_timeline.clone(),
        target_action: args.target_action.map(|a| match a {
            TargetActionArg::Pause => TargetAction::Pause,
            TargetActionArg::Promote => TargetAction::Promote,
            TargetActionArg::Shutdown => TargetAction::Shutdown,
        }),
        target_exclusive: args.target_exclusive,
        restore_command: args.restore_command.clone(),
        extra: Vec::new(),
    };

    let opts = RestoreOptions {
        stanza: cli.stanza.clone(),
        set: args.set.clone(),
        delta: args.delta,
        force: args.force,
        remap,
        db_include: args.db_include.clone(),
        recovery,
        recovery_preserve,
        process_max: cli.process_max,
        protocol_timeout: Duration::from_secs(cli.protocol_timeout),
    };

    let label = pgbr_restore::cmd_restore(repo_storage, dest_storage, &cli.lock_path, &opts)?;
    log::info!("restored backup '{label}'");
    println!("{label}");
    Ok(())
}

fn require_target(args: &RestoreArgs) -> Result<String> {
    args.target.clone().context("--target is required for this --restore-type")
}

fn parse_pairs(entries: &[String], flag: &str) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    for entry in entries {
        let Some((key, value)) = entry.split_once('=') else {
            bail!("{flag} entry '{entry}' is not in name=path form");
        };
        out.insert(key.to_string(), value.to_string());
    }
    Ok(out)
}

pub fn run_stop(cli: &Cli, args: &StopArgs) -> Result<()> {
    pgbr_lock::cmd_stop(&cli.lock_path, Some(&cli.stanza), args.force)?;
    Ok(())
}

pub fn run_start(cli: &Cli) -> Result<()> {
    pgbr_lock::cmd_start(&cli.lock_path, Some(&cli.stanza))?;
    Ok(())
}

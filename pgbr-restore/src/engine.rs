//! The restore engine (component G): `cmd_restore`'s steps, from acquiring
//! the stanza lock through writing recovery settings and fsyncing
//! `global/`. Grounded on the specification's restore-engine walkthrough
//! (§4.6/§4.6.1); the parallel copy step reuses `pgbr-executor`'s
//! cooperative dispatcher exactly the way the backup engine's copy step
//! does, but builds one queue per destination target root instead of a
//! flat round-robin split (spec §4.7's `job_source` sweep).

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use pgbr_executor::{Executor, QueueSweep};
use pgbr_lock::LockType;
use pgbr_manifest::{Manifest, ManifestFile};
use pgbr_repo::{ArchiveInfo, BackupInfo, ARCHIVE_INFO_PATH_SUFFIX, BACKUP_INFO_PATH_SUFFIX};
use pgbr_storage::Storage;
use pgbr_types::{BackupLabel, Error, ErrorKind};

use crate::clean::{self, CleanOptions};
use crate::copy;
use crate::ownership::resolve_ownership;
use crate::paths;
use crate::recovery::{self, RecoveryOptions};
use crate::remap::{self, RemapOptions};
use crate::select;
use crate::selective;
use crate::targetmap;

pub struct RestoreOptions {
    pub stanza: String,
    pub set: Option<String>,
    pub delta: bool,
    pub force: bool,
    pub remap: RemapOptions,
    pub db_include: Vec<String>,
    pub recovery: RecoveryOptions,
    /// True for `--type=preserve`: keeps an existing `recovery.conf`
    /// instead of overwriting it, and exempts it from the strict clean
    /// walk.
    pub recovery_preserve: bool,
    pub process_max: usize,
    pub protocol_timeout: Duration,
}

/// Restores `opts.set` (or the latest backup) from `repo_storage` (rooted
/// at the stanza's directory) into `opts.remap.destination`, through
/// `dest_storage` (rooted at `/`, so the manifest's already-absolute
/// target paths can be used as `Storage` path arguments directly).
/// Returns the label of the backup that was restored.
pub fn cmd_restore(repo_storage: Arc<dyn Storage>, dest_storage: Arc<dyn Storage>, lock_path: &Path, opts: &RestoreOptions) -> Result<BackupLabel, Error> {
    pgbr_lock::lock_stop_test(lock_path, &opts.stanza)?;
    let _lock = pgbr_lock::acquire(lock_path, &opts.stanza, LockType::Backup)?;

    let destination = opts.remap.destination.clone();
    let (delta, force) = validate_destination(dest_storage.as_ref(), &destination, opts.delta, opts.force)?;

    let backup_info = BackupInfo::load(repo_storage.as_ref(), BACKUP_INFO_PATH_SUFFIX)?;
    let archive_info = ArchiveInfo::load(repo_storage.as_ref(), ARCHIVE_INFO_PATH_SUFFIX)?;
    let manifest_cipher_pass = archive_info.cipher_pass();

    let entry = select::select_backup_set(&backup_info, opts.set.as_deref())?;

    let manifest_path = paths::backup_manifest_path(&entry.label);
    let mut manifest = pgbr_manifest::load(repo_storage.as_ref(), &manifest_path, manifest_cipher_pass.as_deref())?;
    if manifest.data.label != entry.label {
        return Err(Error::new(
            ErrorKind::BackupMismatch,
            format!("manifest label '{}' does not match selected backup set '{}'", manifest.data.label, entry.label),
        ));
    }

    remap::remap(&mut manifest, &opts.remap)?;
    pgbr_manifest::link_check(&manifest)?;
    resolve_ownership(&mut manifest, dest_storage.as_ref(), &destination)?;

    clean::disable_pg_control(dest_storage.as_ref(), &destination)?;
    let clean_opts = CleanOptions {
        delta,
        force,
        preserve_recovery_conf: opts.recovery_preserve,
    };
    clean::clean_targets(dest_storage.as_ref(), &manifest, &clean_opts)?;

    let selective_regex = selective::selective_restore_regex(&manifest, &opts.db_include)?;

    let dest_manifest_path = format!("{}/backup.manifest", destination.trim_end_matches('/'));
    pgbr_manifest::save(&manifest, dest_storage.as_ref(), &dest_manifest_path, manifest_cipher_pass.as_deref())?;

    let sub_pass_by_label = load_reference_sub_passes(repo_storage.as_ref(), &manifest, manifest_cipher_pass.as_deref())?;

    let pg_control = restore_files(repo_storage.clone(), dest_storage.clone(), &manifest, selective_regex.as_ref(), &sub_pass_by_label, delta, force, opts)?;

    clean::create_missing(dest_storage.as_ref(), &manifest)?;

    recovery::write_recovery_settings(dest_storage.as_ref(), &destination, manifest.data.pg_version, &opts.recovery, opts.recovery_preserve)?;

    restore_pg_control_last(repo_storage.as_ref(), dest_storage.as_ref(), pg_control, &destination, manifest.data.option_compress)?;

    Ok(manifest.data.label.clone())
}

/// Step 1: destination checks, with the silent delta/force downgrade for
/// a destination that looks like neither a live cluster nor a resumed
/// restore.
fn validate_destination(dest_storage: &dyn Storage, destination: &str, delta: bool, force: bool) -> Result<(bool, bool), Error> {
    let postmaster_pid = format!("{}/postmaster.pid", destination.trim_end_matches('/'));
    if dest_storage.exists(&postmaster_pid)? {
        return Err(Error::new(ErrorKind::PathNotEmpty, "postmaster.pid exists at the destination")
            .with_hint("stop the PostgreSQL instance running at the destination before restoring"));
    }

    let pg_version_marker = format!("{}/PG_VERSION", destination.trim_end_matches('/'));
    let existing_manifest = format!("{}/backup.manifest", destination.trim_end_matches('/'));
    if !dest_storage.exists(&pg_version_marker)? && !dest_storage.exists(&existing_manifest)? {
        Ok((false, false))
    } else {
        Ok((delta, force))
    }
}

/// Files carrying a `reference` were unchanged since an earlier backup in
/// the chain and live (and were encrypted) under that backup's directory,
/// which may have been saved with a different `cipher_sub_pass` than the
/// one restored here. Loads each distinct referenced manifest once to
/// resolve the content-encryption pass each reference actually needs.
fn load_reference_sub_passes(repo_storage: &dyn Storage, manifest: &Manifest, manifest_cipher_pass: Option<&str>) -> Result<HashMap<BackupLabel, Option<String>>, Error> {
    let mut out = HashMap::new();
    out.insert(manifest.data.label.clone(), manifest.data.cipher_sub_pass.clone());
    for file in &manifest.files {
        let Some(label) = &file.reference else { continue };
        if out.contains_key(label) {
            continue;
        }
        let path = paths::backup_manifest_path(label);
        let referenced = pgbr_manifest::load(repo_storage, &path, manifest_cipher_pass)?;
        out.insert(label.clone(), referenced.data.cipher_sub_pass);
    }
    Ok(out)
}

struct RestoreJob {
    file: ManifestFile,
    dest_path: String,
    repo_path: String,
    cipher_sub_pass: Option<String>,
    excluded: bool,
}

/// Steps 10/11: one queue per target root (pg_data plus each tablespace),
/// sorted descending by size with name as tie-breaker, dispatched through
/// the shared `pgbr-executor` pool using `QueueSweep`'s restore sweep.
/// `global/pg_control` is pulled out of `pg_data`'s queue and handed back
/// to the caller instead of being dispatched here: `clean::disable_pg_control`
/// already unlinked the old one, and nothing about this loop's completion
/// order otherwise guarantees it lands after every other file.
fn restore_files(
    repo_storage: Arc<dyn Storage>,
    dest_storage: Arc<dyn Storage>,
    manifest: &Manifest,
    selective_regex: Option<&Regex>,
    sub_pass_by_label: &HashMap<BackupLabel, Option<String>>,
    delta: bool,
    force: bool,
    opts: &RestoreOptions,
) -> Result<Option<RestoreJob>, Error> {
    let mut by_target: HashMap<String, Vec<RestoreJob>> = HashMap::new();
    let mut pg_control = None;
    for file in &manifest.files {
        let (target, rel) = targetmap::resolve(&manifest.targets, &file.name);
        let dest_path = targetmap::destination_path(target, rel);
        let label_for_content = file.reference.as_ref().unwrap_or(&manifest.data.label);
        let repo_path = paths::repo_file_path(label_for_content, &file.name);
        let cipher_sub_pass = sub_pass_by_label.get(label_for_content).cloned().flatten();
        let excluded = copy::is_selectively_excluded(&file.name, selective_regex);
        let job = RestoreJob {
            file: file.clone(),
            dest_path,
            repo_path,
            cipher_sub_pass,
            excluded,
        };
        if target.name == "pg_data" && file.name == "global/pg_control" {
            pg_control = Some(job);
            continue;
        }
        by_target.entry(target.name.clone()).or_default().push(job);
    }

    let mut queues: Vec<VecDeque<RestoreJob>> = Vec::new();
    let mut total = 0usize;
    for (_, mut jobs) in by_target {
        jobs.sort_by(|a, b| b.file.size.cmp(&a.file.size).then_with(|| a.file.name.cmp(&b.file.name)));
        total += jobs.len();
        queues.push(jobs.into_iter().collect());
    }
    if total == 0 {
        return Ok(pg_control);
    }

    let mut sweep = QueueSweep::new(queues);
    let workers = opts.process_max.max(1);
    let compress = manifest.data.option_compress;

    let mut executor: Executor<RestoreJob, ()> = Executor::new(workers, opts.protocol_timeout, move |job: RestoreJob| {
        if job.excluded {
            return copy::zero_fill(dest_storage.as_ref(), &job.dest_path, &job.file);
        }
        if delta && copy::delta_skip(dest_storage.as_ref(), &job.dest_path, &job.file)? {
            return Ok(());
        }
        if force && !delta && copy::force_skip(dest_storage.as_ref(), &job.dest_path, &job.file)? {
            return Ok(());
        }
        copy::restore_file(
            repo_storage.as_ref(),
            dest_storage.as_ref(),
            &job.repo_path,
            &job.dest_path,
            &job.file,
            job.cipher_sub_pass.as_deref(),
            compress,
        )?;
        Ok(())
    });

    let mut done = 0usize;
    while done < total {
        let finished = executor.step(&mut |client_idx| sweep.next_for(client_idx))?;
        for (_client_idx, result) in finished {
            done += 1;
            result?;
        }
    }

    Ok(pg_control)
}

/// Step 13: restores `global/pg_control` (held back by `restore_files`)
/// only once every other file and the recovery settings are in place, then
/// fsyncs `global/` so the write is durable before the lock is released.
/// A restore that fails before this point leaves the destination without a
/// control file, so it can never be mistaken for a startable cluster.
fn restore_pg_control_last(repo_storage: &dyn Storage, dest_storage: &dyn Storage, pg_control: Option<RestoreJob>, destination: &str, compressed: bool) -> Result<(), Error> {
    let Some(job) = pg_control else {
        return Ok(());
    };
    if !job.excluded {
        copy::restore_file(repo_storage, dest_storage, &job.repo_path, &job.dest_path, &job.file, job.cipher_sub_pass.as_deref(), compressed)?;
    } else {
        copy::zero_fill(dest_storage, &job.dest_path, &job.file)?;
    }
    let global_dir = format!("{}/global", destination.trim_end_matches('/'));
    dest_storage.path_sync(&global_dir)
}

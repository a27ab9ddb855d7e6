//! The backup engine (component F): `cmd_backup`'s thirteen steps, from
//! acquiring the stanza lock through archiving the completed manifest.
//! Grounded on the specification's backup-engine walkthrough (§4.5); the
//! parallel copy step reuses `pgbr-executor`'s cooperative dispatcher the
//! way the teacher's backup verify job drives `ParallelHandler`.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use openssl::hash::{Hasher, MessageDigest};

use pgbr_executor::{Executor, QueueSweep};
use pgbr_io::{Filter, Gzip};
use pgbr_lock::LockType;
use pgbr_manifest::{BuildOptions, Manifest, ManifestData, ManifestFile};
use pgbr_protocol::{PgClient, StopBackupResult};
use pgbr_repo::{ArchiveInfo, BackupCurrentEntry, BackupInfo, ARCHIVE_INFO_PATH_SUFFIX, BACKREST_FORMAT, BACKREST_VERSION, BACKUP_INFO_PATH_SUFFIX};
use pgbr_storage::{Storage, WriteOptions};
use pgbr_tools::crypt::random_bytes;
use pgbr_types::{BackupLabel, BackupType, Error, ErrorKind, Timestamp15};

use crate::copy::{copy_file, CopyOutcome};
use crate::incr_prior::build_incr_prior;
use crate::paths;
use crate::resume::{find_resumable, is_usable};

pub struct BackupOptions {
    pub stanza: String,
    pub pg_id: u32,
    pub backup_type: BackupType,
    pub compress: bool,
    pub checksum_page: bool,
    pub backup_standby: bool,
    pub delta: bool,
    pub exclude: Vec<Regex>,
    pub process_max: usize,
    pub protocol_timeout: Duration,
}

/// Runs a full/diff/incr backup against `pg`, reading the live cluster
/// through `pg_storage` (rooted at `PgClient::data_dir()`) and writing into
/// `repo_storage` (rooted at the stanza's directory in the repository).
/// Returns the label of the backup just taken.
pub fn cmd_backup(
    pg: &dyn PgClient,
    pg_storage: Arc<dyn Storage>,
    repo_storage: Arc<dyn Storage>,
    lock_path: &Path,
    opts: &BackupOptions,
) -> Result<BackupLabel, Error> {
    pgbr_lock::lock_stop_test(lock_path, &opts.stanza)?;
    let _lock = pgbr_lock::acquire(lock_path, &opts.stanza, LockType::Backup)?;

    let mut backup_info = BackupInfo::load(repo_storage.as_ref(), BACKUP_INFO_PATH_SUFFIX)?;
    let archive_info = ArchiveInfo::load(repo_storage.as_ref(), ARCHIVE_INFO_PATH_SUFFIX)?;
    let manifest_cipher_pass = archive_info.cipher_pass();

    let control = pg.control_info()?;
    let (_, backup_version, backup_system_id) = backup_info.current_history_identity()?;
    if backup_version != control.version || backup_system_id != control.system_id {
        return Err(Error::new(
            ErrorKind::BackupMismatch,
            "live cluster does not match the stanza's recorded database history",
        )
        .with_hint("run stanza-upgrade if the cluster was legitimately upgraded"));
    }

    let backup_standby = if opts.backup_standby && !pg.is_standby().unwrap_or(false) {
        log::warn!("backup-standby requested but no standby is configured; reading from the primary");
        false
    } else {
        opts.backup_standby
    };

    let data = ManifestData {
        label: BackupLabel::new_full(Timestamp15::now_local()),
        prior_label: None,
        backup_type: BackupType::Full,
        timestamp_copy_start: 0,
        timestamp_start: current_unix_time(),
        timestamp_stop: 0,
        pg_version: control.version,
        pg_system_id: control.system_id,
        pg_id: opts.pg_id,
        option_compress: opts.compress,
        option_hardlink: false,
        option_online: true,
        option_backup_standby: backup_standby,
        option_checksum_page: opts.checksum_page,
        option_delta: opts.delta,
        archive_start: None,
        archive_stop: None,
        lsn_start: None,
        lsn_stop: None,
        backrest_version: BACKREST_VERSION.to_string(),
        backrest_format: BACKREST_FORMAT,
        cipher_sub_pass: None,
    };
    let build_opts = BuildOptions {
        pg_version: control.version,
        exclude: &opts.exclude,
    };
    let mut manifest = pgbr_manifest::build_from_live_cluster(pg_storage.as_ref(), data, &build_opts)?;
    pgbr_manifest::link_check(&manifest)?;

    let mut requested_type = opts.backup_type;
    if requested_type != BackupType::Full {
        match build_incr_prior(&backup_info, opts.pg_id, requested_type, manifest_cipher_pass.as_deref(), repo_storage.as_ref())? {
            Some(prior) => {
                manifest.data.backup_type = requested_type;
                manifest.data.prior_label = Some(prior.entry.label.clone());
                manifest = pgbr_manifest::build_incremental(manifest, &prior.manifest, opts.delta);
            }
            None => {
                log::warn!("no usable prior backup for pg_id {}; taking a full backup instead", opts.pg_id);
                requested_type = BackupType::Full;
            }
        }
    }

    let copy_start = current_unix_time();
    pgbr_manifest::validate(&mut manifest, opts.delta, copy_start, copy_start);

    let mut resumed = false;
    if let Some(candidate) = find_resumable(repo_storage.as_ref(), manifest_cipher_pass.as_deref())? {
        if is_usable(&candidate.manifest, &manifest) {
            log::info!("resuming backup '{}'", candidate.label);
            adopt_resumed_progress(&mut manifest, &candidate.manifest);
            manifest.data.label = candidate.label;
            if requested_type == BackupType::Full {
                manifest.data.cipher_sub_pass = candidate.manifest.data.cipher_sub_pass.clone();
            }
            resumed = true;
        } else {
            log::warn!("found an interrupted backup that does not match this backup's shape; starting fresh");
            repo_storage.remove(&paths::backup_dir(&candidate.label), true)?;
        }
    }

    if !resumed {
        let current_labels = backup_info.list_current();
        let used = |ts: &str| current_labels.iter().any(|l| l.starts_with(ts));
        manifest.data.label = pgbr_manifest::next_unique_label(requested_type, Timestamp15::now_local(), &used);
    }
    if manifest.data.cipher_sub_pass.is_none() && manifest_cipher_pass.is_some() {
        let mut raw = [0u8; 32];
        random_bytes(&mut raw)?;
        manifest.data.cipher_sub_pass = Some(hex::encode(raw));
    }
    let label = manifest.data.label.clone();

    let manifest_copy_path = paths::backup_manifest_copy_path(&label);
    pgbr_manifest::save(&manifest, repo_storage.as_ref(), &manifest_copy_path, manifest_cipher_pass.as_deref())?;

    let start = pg.start_backup(label.as_str())?;
    manifest.data.archive_start = Some(start.wal_start);
    manifest.data.lsn_start = Some(start.lsn_start);

    copy_manifest_files(pg_storage.clone(), repo_storage.clone(), &label, &mut manifest, opts)?;

    let stop = pg.stop_backup()?;
    manifest.data.archive_stop = Some(stop.wal_stop.clone());
    manifest.data.lsn_stop = Some(stop.lsn_stop.clone());
    manifest.data.timestamp_stop = current_unix_time();
    write_label_files(repo_storage.as_ref(), &label, &mut manifest, &stop)?;

    let manifest_path = paths::backup_manifest_path(&label);
    pgbr_manifest::save(&manifest, repo_storage.as_ref(), &manifest_path, manifest_cipher_pass.as_deref())?;
    repo_storage.remove(&manifest_copy_path, false)?;

    let entry = build_current_entry(&manifest);
    backup_info.add_current(&entry);
    backup_info.save(repo_storage.as_ref(), BACKUP_INFO_PATH_SUFFIX)?;

    archive_manifest_copy(repo_storage.as_ref(), &label)?;

    Ok(label)
}

fn current_unix_time() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Carries forward the checksum/size-repo state of every file a previous,
/// interrupted run of this same backup already finished copying, so
/// `copy_manifest_files` only re-copies what's left.
fn adopt_resumed_progress(current: &mut Manifest, resumed: &Manifest) {
    for file in current.files.iter_mut() {
        if file.checksum_sha1.is_some() {
            continue;
        }
        if let Some(done) = resumed
            .files
            .iter()
            .find(|f| f.name == file.name && f.size == file.size && f.timestamp == file.timestamp && f.checksum_sha1.is_some())
        {
            file.checksum_sha1 = done.checksum_sha1;
            file.checksum_page = done.checksum_page;
            file.checksum_page_error = done.checksum_page_error.clone();
            file.size_repo = done.size_repo;
        }
    }
}

struct CopyJobOutcome {
    name: String,
    outcome: CopyOutcome,
}

/// Step 10: dispatches every file that isn't already covered by a
/// reference or resumed progress through `pgbr-executor`'s worker pool,
/// using `QueueSweep` the way the restore engine's file dispatch does
/// (spec §4.7), split into `process_max` home queues by round-robin.
fn copy_manifest_files(
    pg_storage: Arc<dyn Storage>,
    repo_storage: Arc<dyn Storage>,
    label: &BackupLabel,
    manifest: &mut Manifest,
    opts: &BackupOptions,
) -> Result<(), Error> {
    let mut to_copy: Vec<(String, u64)> = manifest
        .files
        .iter()
        .filter(|f| f.reference.is_none() && f.checksum_sha1.is_none())
        .map(|f| (f.name.clone(), f.size))
        .collect();
    to_copy.sort_by_key(|(_, size)| std::cmp::Reverse(*size));

    if to_copy.is_empty() {
        return Ok(());
    }

    let workers = opts.process_max.max(1);
    let mut queues: Vec<VecDeque<String>> = vec![VecDeque::new(); workers];
    for (i, (name, _)) in to_copy.into_iter().enumerate() {
        queues[i % workers].push_back(name);
    }
    let total: usize = queues.iter().map(|q| q.len()).sum();
    let mut sweep = QueueSweep::new(queues);

    let label_str = label.as_str().to_string();
    let cipher_sub_pass = manifest.data.cipher_sub_pass.clone();
    let compress = manifest.data.option_compress;
    let checksum_page = manifest.data.option_checksum_page;

    let mut executor: Executor<String, CopyJobOutcome> = Executor::new(workers, opts.protocol_timeout, move |name: String| {
        let repo_path = paths::repo_file_path_for(&label_str, &name);
        let outcome = copy_file(pg_storage.as_ref(), repo_storage.as_ref(), &repo_path, &name, cipher_sub_pass.as_deref(), compress, checksum_page)?;
        Ok(CopyJobOutcome { name, outcome })
    });

    let mut done = 0usize;
    while done < total {
        let finished = executor.step(&mut |client_idx| sweep.next_for(client_idx))?;
        for (_client_idx, result) in finished {
            done += 1;
            let job = result?;
            apply_copy_outcome(manifest, &job.name, job.outcome);
        }
    }

    Ok(())
}

fn apply_copy_outcome(manifest: &mut Manifest, name: &str, outcome: CopyOutcome) {
    if let Some(file) = manifest.file_mut(name) {
        file.size = outcome.size;
        file.size_repo = Some(outcome.size_repo);
        file.checksum_sha1 = Some(outcome.checksum_sha1);
        file.checksum_page = outcome.checksum_page;
        file.checksum_page_error = outcome.checksum_page_error.into_iter().flat_map(|(start, end)| start..=end).collect();
    }
}

/// `backup_label`/`tablespace_map` come from `stop_backup`'s output, not
/// from the live filesystem (an online cluster's copy of either may be
/// stale or absent while the backup is in progress), so they're written
/// directly into the repository and added to the manifest here rather
/// than through the copy pipeline.
fn write_label_files(repo_storage: &dyn Storage, label: &BackupLabel, manifest: &mut Manifest, stop: &StopBackupResult) -> Result<(), Error> {
    write_one(repo_storage, label, manifest, "backup_label", &stop.backup_label_bytes)?;
    if let Some(bytes) = &stop.tablespace_map_bytes {
        write_one(repo_storage, label, manifest, "tablespace_map", bytes)?;
    }
    Ok(())
}

fn write_one(repo_storage: &dyn Storage, label: &BackupLabel, manifest: &mut Manifest, name: &str, bytes: &[u8]) -> Result<(), Error> {
    let repo_path = paths::repo_file_path(label, name);
    let mut writer = repo_storage.write(&repo_path, WriteOptions::new())?;
    writer.write_all(bytes).map_err(|e| Error::from_io(ErrorKind::FileWrite, repo_path.clone(), e))?;
    writer.flush().map_err(|e| Error::from_io(ErrorKind::FileWrite, repo_path.clone(), e))?;

    let entry = ManifestFile {
        name: name.to_string(),
        size: bytes.len() as u64,
        size_repo: Some(bytes.len() as u64),
        timestamp: current_unix_time(),
        mode: 0o600,
        user: None,
        group: None,
        checksum_sha1: Some(sha1_hex(bytes)?),
        checksum_page: None,
        checksum_page_error: Vec::new(),
        reference: None,
        primary: true,
    };
    match manifest.file_mut(name) {
        Some(existing) => *existing = entry,
        None => manifest.files.push(entry),
    }
    Ok(())
}

fn sha1_hex(data: &[u8]) -> Result<[u8; 20], Error> {
    let mut hasher = Hasher::new(MessageDigest::sha1()).map_err(|e| Error::new(ErrorKind::Crypto, "sha1 init failed").with_source(e))?;
    hasher.update(data).map_err(|e| Error::new(ErrorKind::Crypto, "sha1 update failed").with_source(e))?;
    let digest = hasher.finish().map_err(|e| Error::new(ErrorKind::Crypto, "sha1 finish failed").with_source(e))?;
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    Ok(out)
}

fn build_current_entry(manifest: &Manifest) -> BackupCurrentEntry {
    let mut reference: Vec<BackupLabel> = manifest.files.iter().filter_map(|f| f.reference.clone()).collect();
    reference.sort();
    reference.dedup();

    BackupCurrentEntry {
        label: manifest.data.label.clone(),
        backup_type: manifest.data.backup_type,
        prior: manifest.data.prior_label.clone(),
        reference,
        archive_start: manifest.data.archive_start.clone(),
        archive_stop: manifest.data.archive_stop.clone(),
        info_size: manifest.files.iter().map(|f| f.size).sum(),
        info_size_delta: manifest.files.iter().filter(|f| f.reference.is_none()).map(|f| f.size).sum(),
        repo_size: manifest.files.iter().filter_map(|f| f.size_repo).sum(),
        repo_size_delta: manifest
            .files
            .iter()
            .filter(|f| f.reference.is_none())
            .filter_map(|f| f.size_repo)
            .sum(),
        timestamp_start: manifest.data.timestamp_start,
        timestamp_stop: manifest.data.timestamp_stop,
        backrest_version: manifest.data.backrest_version.clone(),
        backrest_format: manifest.data.backrest_format,
        pg_id: manifest.data.pg_id,
        checksum_page: Some(manifest.data.option_checksum_page),
    }
}

/// Step 13: archives a gzip-compressed copy of the just-written manifest
/// under `backup.history/<year>/`, re-reading the bytes `pgbr_manifest::save`
/// just wrote rather than re-rendering the document a second time.
fn archive_manifest_copy(repo_storage: &dyn Storage, label: &BackupLabel) -> Result<(), Error> {
    let manifest_path = paths::backup_manifest_path(label);
    let mut reader = repo_storage
        .read(&manifest_path, false, None, None)?
        .ok_or_else(|| Error::new(ErrorKind::FileMissing, manifest_path.clone()))?;
    let mut raw = Vec::new();
    reader
        .read_to_end(&mut raw)
        .map_err(|e| Error::from_io(ErrorKind::FileRead, manifest_path.clone(), e))?;

    let mut compressor = Gzip::compress(6);
    let mut compressed = Vec::new();
    let mut out_buf = [0u8; 64 * 1024];
    let mut offset = 0;
    while offset < raw.len() {
        let (consumed, produced) = compressor
            .process_inout(Some(&raw[offset..]), &mut out_buf)
            .map_err(|e| Error::new(ErrorKind::FileWrite, "manifest history compression failed").with_source(e))?;
        offset += consumed;
        compressed.extend_from_slice(&out_buf[..produced]);
    }
    loop {
        let (_, produced) = compressor
            .process_inout(None, &mut out_buf)
            .map_err(|e| Error::new(ErrorKind::FileWrite, "manifest history compression failed").with_source(e))?;
        compressed.extend_from_slice(&out_buf[..produced]);
        if compressor.done() {
            break;
        }
    }

    let history_path = paths::history_path(label);
    let mut writer = repo_storage.write(&history_path, WriteOptions::new())?;
    writer
        .write_all(&compressed)
        .map_err(|e| Error::from_io(ErrorKind::FileWrite, history_path.clone(), e))?;
    writer.flush().map_err(|e| Error::from_io(ErrorKind::FileWrite, history_path, e))
}

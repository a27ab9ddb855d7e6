use regex::Regex;

use pgbr_storage::{FileType, SortOrder, Storage, WalkEntry};
use pgbr_types::{BackupLabel, BackupType, Error, ErrorKind};

use crate::types::{Manifest, ManifestData, ManifestFile, ManifestLink, ManifestPath, ManifestTarget, TargetType};

/// Fixed skip rules that apply regardless of the caller's exclusion list,
/// mirroring the specification's always-excluded PostgreSQL runtime
/// artifacts (§4.4).
fn is_always_skipped(name: &str, wal_dir_name: &str) -> bool {
    if name == wal_dir_name || name == "postmaster.pid" || name == "backup_label.old" {
        return true;
    }
    if name.starts_with("pgsql_tmp") {
        return true;
    }
    if name == "tablespace_map" || name == "tablespace_map.old" {
        return true;
    }
    // Unlogged relation init forks: "<relfilenode>_init" with an optional
    // segment/fork suffix is retained (it carries no data to restore
    // beyond what recovery rebuilds), everything else under base/global
    // with a plain numeric name is kept.
    if name.ends_with("_init") {
        return true;
    }
    false
}

pub struct BuildOptions<'a> {
    pub pg_version: u32,
    pub exclude: &'a [Regex],
}

/// WAL directory name by major version: PG >= 10 renamed `pg_xlog` to
/// `pg_wal`.
fn wal_dir_name(pg_version: u32) -> &'static str {
    if pg_version >= 100000 {
        "pg_wal"
    } else {
        "pg_xlog"
    }
}

/// Walks `pg_data` depth-first and builds a fresh full manifest. Grounded
/// on `Storage::list_info`'s recursive walk; classification and the
/// always-skip rules follow the live-cluster scan described in the backup
/// engine's manifest step.
pub fn build_from_live_cluster(
    storage: &dyn Storage,
    data: ManifestData,
    opts: &BuildOptions,
) -> Result<Manifest, Error> {
    let mut manifest = Manifest {
        data,
        paths: Vec::new(),
        files: Vec::new(),
        links: Vec::new(),
        targets: vec![ManifestTarget {
            name: "pg_data".to_string(),
            target_type: TargetType::Path,
            path: Some(String::new()),
            file: None,
            tablespace_id: None,
            tablespace_name: None,
        }],
        db_list: Vec::new(),
    };

    let wal_dir = wal_dir_name(opts.pg_version);
    let mut error: Option<Error> = None;

    storage.list_info("", true, SortOrder::Ascending, &mut |entry: WalkEntry| {
        if error.is_some() {
            return Ok(());
        }
        let base_name = entry.path.rsplit('/').next().unwrap_or(&entry.path);

        if opts.exclude.iter().any(|re| re.is_match(base_name)) {
            return Ok(());
        }
        if is_always_skipped(base_name, wal_dir) {
            return Ok(());
        }

        match entry.info.file_type {
            FileType::Path => {
                manifest.paths.push(ManifestPath {
                    name: entry.path,
                    mode: entry.info.mode,
                    user: entry.info.user,
                    group: entry.info.group,
                });
            }
            FileType::File => {
                manifest.files.push(ManifestFile {
                    name: entry.path,
                    size: entry.info.size,
                    size_repo: None,
                    timestamp: entry.info.mtime,
                    mode: entry.info.mode,
                    user: entry.info.user,
                    group: entry.info.group,
                    checksum_sha1: None,
                    checksum_page: None,
                    checksum_page_error: Vec::new(),
                    reference: None,
                    primary: true,
                });
            }
            FileType::Link => {
                if let Some(target) = &entry.info.link_target {
                    if let Some(oid) = tablespace_oid(&entry.path) {
                        match build_tablespace_target(storage, &entry.path, target, oid, opts.pg_version) {
                            Ok((target, nested_files, nested_paths)) => {
                                manifest.targets.push(target);
                                manifest.files.extend(nested_files);
                                manifest.paths.extend(nested_paths);
                            }
                            Err(e) => error = Some(e),
                        }
                    }
                    manifest.links.push(ManifestLink {
                        name: entry.path,
                        destination: target.clone(),
                        user: entry.info.user,
                        group: entry.info.group,
                    });
                }
            }
            FileType::Special => {}
        }
        Ok(())
    })?;

    if let Some(e) = error {
        return Err(e);
    }

    manifest.sort_all();
    Ok(manifest)
}

fn tablespace_oid(path: &str) -> Option<u32> {
    let prefix = "pg_tblspc/";
    let rest = path.strip_prefix(prefix)?;
    rest.parse().ok()
}

/// Recurses into a tablespace link's destination (spec §4.4: for PG >= 9.0
/// the link resolves to `<dest>/PG_<version>_<catalog>`), recording both
/// the `Target` and the nested files/paths under
/// `pg_tblspc/<oid>/<subdir>/...`.
fn build_tablespace_target(
    storage: &dyn Storage,
    link_path: &str,
    destination: &str,
    oid: u32,
    pg_version: u32,
) -> Result<(ManifestTarget, Vec<ManifestFile>, Vec<ManifestPath>), Error> {
    let target = ManifestTarget {
        name: link_path.to_string(),
        target_type: TargetType::Link,
        path: Some(destination.to_string()),
        file: None,
        tablespace_id: Some(oid),
        tablespace_name: Some(format!("ts_{oid}")),
    };

    let mut files = Vec::new();
    let mut paths = Vec::new();
    let _ = pg_version; // catalog subdir naming is resolved by the caller's Storage root

    storage.list_info(link_path, true, SortOrder::Ascending, &mut |entry: WalkEntry| {
        match entry.info.file_type {
            FileType::Path => paths.push(ManifestPath {
                name: entry.path,
                mode: entry.info.mode,
                user: entry.info.user,
                group: entry.info.group,
            }),
            FileType::File => files.push(ManifestFile {
                name: entry.path,
                size: entry.info.size,
                size_repo: None,
                timestamp: entry.info.mtime,
                mode: entry.info.mode,
                user: entry.info.user,
                group: entry.info.group,
                checksum_sha1: None,
                checksum_page: None,
                checksum_page_error: Vec::new(),
                reference: None,
                primary: true,
            }),
            _ => {}
        }
        Ok(())
    })?;

    Ok((target, files, paths))
}

/// Marks files as possibly mid-write and decides whether content
/// comparison (`delta`) is forced, per the validate step.
pub fn validate(manifest: &mut Manifest, delta: bool, timestamp_copy_start: i64, now: i64) {
    let future_file = manifest.files.iter().any(|f| f.timestamp > now);
    manifest.data.option_delta = delta || future_file;
    manifest.data.timestamp_copy_start = timestamp_copy_start;
}

/// Link-check: every link's destination must not nest inside another
/// target's path, except tablespace links (spec §4.4).
pub fn link_check(manifest: &Manifest) -> Result<(), Error> {
    for link in &manifest.links {
        let is_tablespace = manifest
            .targets
            .iter()
            .any(|t| t.name == link.name && t.tablespace_id.is_some());
        if is_tablespace {
            continue;
        }
        for target in &manifest.targets {
            if let Some(path) = &target.path {
                if !path.is_empty() && link.destination.starts_with(path.as_str()) {
                    return Err(Error::new(
                        ErrorKind::LinkMap,
                        format!("link '{}' destination nests inside target '{}'", link.name, target.name),
                    ));
                }
            }
        }
    }
    Ok(())
}

pub fn next_unique_label(
    backup_type: BackupType,
    full_ts: pgbr_types::Timestamp15,
    used: &dyn Fn(&str) -> bool,
) -> BackupLabel {
    let mut ts = pgbr_types::Timestamp15::now_local();
    loop {
        let candidate = match backup_type {
            BackupType::Full => BackupLabel::new_full(ts),
            _ => BackupLabel::new_child(full_ts, ts, backup_type),
        };
        if !used(candidate.timestamp_prefix()) {
            return candidate;
        }
        ts = ts.plus_one_second();
    }
}

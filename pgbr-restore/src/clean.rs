//! Step 6 (§4.6.1) of `cmd_restore`: validates and empties every
//! destination target before files are copied back in, then (after the
//! caller has copied files) recreates the empty directories and links the
//! manifest expects but the destination doesn't have yet.
//!
//! `Storage` has no generic chmod/chown primitive (it abstracts over
//! backends, including ones with no owner model at all), so the
//! delta/force reconciliation pass below only ever keeps-or-removes a
//! recognized entry; it does not repair a mismatched mode or owner in
//! place the way a POSIX-only implementation could. A removed-and-missing
//! entry is simply recreated by the restore copy step that follows, which
//! gets mode/owner right from the manifest on every write.

use std::collections::{HashMap, HashSet};

use pgbr_manifest::{Manifest, ManifestFile, ManifestLink, ManifestTarget};
use pgbr_storage::{FileType, SortOrder, Storage};
use pgbr_types::{Error, ErrorKind};

use crate::targetmap;

pub struct CleanOptions {
    pub delta: bool,
    pub force: bool,
    /// True when `recovery-option type=preserve`: an existing
    /// `recovery.conf` at the `pg_data` root survives cleaning.
    pub preserve_recovery_conf: bool,
}

/// Unlinks `pg_data`'s `global/pg_control` and fsyncs `global/` so a
/// restore that fails partway through can never leave a cluster that looks
/// startable. Must run before `clean_targets`.
pub fn disable_pg_control(storage: &dyn Storage, pg_data_root: &str) -> Result<(), Error> {
    let control_path = format!("{}/global/pg_control", pg_data_root.trim_end_matches('/'));
    if storage.exists(&control_path)? {
        storage.remove(&control_path, false)?;
    }
    let global_dir = format!("{}/global", pg_data_root.trim_end_matches('/'));
    if storage.path_exists(&global_dir)? {
        storage.path_sync(&global_dir)?;
    }
    Ok(())
}

pub fn clean_targets(storage: &dyn Storage, manifest: &Manifest, opts: &CleanOptions) -> Result<(), Error> {
    for target in &manifest.targets {
        clean_one_target(storage, target, manifest, opts)?;
    }
    Ok(())
}

fn clean_one_target(storage: &dyn Storage, target: &ManifestTarget, manifest: &Manifest, opts: &CleanOptions) -> Result<(), Error> {
    let root = target.path.clone().unwrap_or_default();
    let info = storage
        .info(&root, false)?
        .ok_or_else(|| Error::new(ErrorKind::PathOpen, format!("destination target '{}' ('{}') does not exist", target.name, root)))?;
    if info.file_type != FileType::Path {
        return Err(Error::new(ErrorKind::PathOpen, format!("destination target '{}' is not a directory", target.name)));
    }
    if info.mode & 0o700 != 0o700 {
        return Err(Error::new(
            ErrorKind::PathOpen,
            format!("destination target '{}' does not grant the owner read/write/execute", target.name),
        ));
    }

    let (known_paths, known_files, known_links) = index_for_target(manifest, target);
    let is_pg_data = target.name == "pg_data";

    if !opts.delta && !opts.force {
        let mut offender: Option<String> = None;
        storage.list_info(&root, true, SortOrder::Ascending, &mut |entry| {
            if offender.is_some() {
                return Ok(());
            }
            let rel = relative(&entry.path, &root);
            if is_pg_data && is_allowed_extra(rel, opts) {
                return Ok(());
            }
            if !known_paths.contains(rel) && !known_files.contains_key(rel) && !known_links.contains_key(rel) {
                offender = Some(entry.path.clone());
            }
            Ok(())
        })?;
        if let Some(bad) = offender {
            return Err(Error::new(
                ErrorKind::PathNotEmpty,
                format!("destination path '{bad}' is not empty and neither delta nor force restore was requested"),
            ));
        }
        return Ok(());
    }

    storage.list_info(&root, true, SortOrder::Ascending, &mut |entry| {
        let rel = relative(&entry.path, &root).to_string();
        if is_pg_data && is_allowed_extra(&rel, opts) {
            return Ok(());
        }
        match entry.info.file_type {
            FileType::Path => {
                if known_paths.contains(&rel) {
                    Ok(())
                } else {
                    storage.remove(&entry.path, true)
                }
            }
            FileType::File => {
                if known_files.contains_key(&rel) {
                    Ok(())
                } else {
                    storage.remove(&entry.path, false)
                }
            }
            FileType::Link => match known_links.get(&rel) {
                Some(link) if entry.info.link_target.as_deref() == Some(link.destination.as_str()) => Ok(()),
                _ => storage.remove(&entry.path, false),
            },
            FileType::Special => storage.remove(&entry.path, false),
        }
    })?;

    Ok(())
}

fn relative<'a>(path: &'a str, root: &str) -> &'a str {
    let prefix = format!("{}/", root.trim_end_matches('/'));
    path.strip_prefix(&prefix).unwrap_or(path)
}

fn is_allowed_extra(rel: &str, opts: &CleanOptions) -> bool {
    rel == "backup.manifest" || (rel == "recovery.conf" && opts.preserve_recovery_conf)
}

type TargetIndex<'a> = (HashSet<String>, HashMap<String, &'a ManifestFile>, HashMap<String, &'a ManifestLink>);

fn index_for_target<'a>(manifest: &'a Manifest, target: &ManifestTarget) -> TargetIndex<'a> {
    let mut paths = HashSet::new();
    let mut files = HashMap::new();
    let mut links = HashMap::new();

    for p in &manifest.paths {
        let (t, rel) = targetmap::resolve(&manifest.targets, &p.name);
        if t.name == target.name {
            paths.insert(rel.to_string());
        }
    }
    for f in &manifest.files {
        let (t, rel) = targetmap::resolve(&manifest.targets, &f.name);
        if t.name == target.name {
            files.insert(rel.to_string(), f);
        }
    }
    for l in &manifest.links {
        if l.name == target.name {
            continue; // the tablespace symlink itself lives in pg_data, handled separately
        }
        let (t, rel) = targetmap::resolve(&manifest.targets, &l.name);
        if t.name == target.name {
            links.insert(rel.to_string(), l);
        }
    }
    (paths, files, links)
}

/// After the destination has been cleaned (and, separately, after files
/// have been copied back), creates every manifest path/link the
/// destination doesn't already have. Paths are created in name order so a
/// parent directory is always created before its children; tablespace
/// links point at the (possibly remapped) target path recorded on the
/// manifest's `pg_tblspc/<oid>` target.
pub fn create_missing(storage: &dyn Storage, manifest: &Manifest) -> Result<(), Error> {
    let mut names: Vec<&str> = manifest.paths.iter().map(|p| p.name.as_str()).collect();
    names.sort();
    for name in names {
        let (target, rel) = targetmap::resolve(&manifest.targets, name);
        let dest = targetmap::destination_path(target, rel);
        if !storage.path_exists(&dest)? {
            let mode = manifest.paths.iter().find(|p| p.name == name).map(|p| p.mode);
            storage.path_create(&dest, mode, true, false)?;
        }
    }

    for link in &manifest.links {
        let (target, rel) = targetmap::resolve(&manifest.targets, &link.name);
        let dest = targetmap::destination_path(target, rel);
        if storage.info(&dest, false)?.is_none() {
            storage.link_create(&dest, &link.destination)?;
        }
    }

    Ok(())
}

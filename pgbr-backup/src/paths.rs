//! Repository path layout for one stanza's backup set. All paths are
//! relative to the `Storage` rooted at the stanza's directory, matching
//! `pgbr-repo`'s `archive.info`/`backup.info` convention of living at that
//! same root.

use pgbr_types::BackupLabel;

pub fn backup_dir(label: &BackupLabel) -> String {
    format!("backup/{label}")
}

pub fn backup_manifest_path(label: &BackupLabel) -> String {
    format!("{}/backup.manifest", backup_dir(label))
}

pub fn backup_manifest_copy_path(label: &BackupLabel) -> String {
    format!("{}.copy", backup_manifest_path(label))
}

/// `backup.history/<year>/<label>.manifest.gz`: the gzip-compressed
/// manifest archived after a successful backup (spec §4.5 step 13).
pub fn history_path(label: &BackupLabel) -> String {
    let year = &label.as_str()[0..4];
    format!("backup/backup.history/{year}/{label}.manifest.gz")
}

/// Repository path for one manifest file. A tablespace-linked file's
/// manifest name already carries its `pg_tblspc/<oid>/...` prefix (set
/// when the manifest was built), so only `pg_data`-target files need the
/// `pg_data/` subdirectory added here.
pub fn repo_file_path(label: &BackupLabel, manifest_name: &str) -> String {
    repo_file_path_for(label.as_str(), manifest_name)
}

pub fn repo_file_path_for(label_str: &str, manifest_name: &str) -> String {
    if manifest_name.starts_with("pg_tblspc/") {
        format!("backup/{label_str}/{manifest_name}")
    } else {
        format!("backup/{label_str}/pg_data/{manifest_name}")
    }
}

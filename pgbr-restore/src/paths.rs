//! Repository path layout for reading back one stanza's backup set.
//! Mirrors `pgbr-backup::paths`'s grammar exactly (the two engines read and
//! write the same repository, so the split between `pg_data/...` and
//! `pg_tblspc/<oid>/...` prefixes has to agree); kept as its own small
//! module rather than a shared dependency since backup and restore are
//! separate workspace members with no other reason to depend on each other.

use pgbr_types::BackupLabel;

pub fn backup_dir(label: &BackupLabel) -> String {
    format!("backup/{label}")
}

pub fn backup_manifest_path(label: &BackupLabel) -> String {
    format!("{}/backup.manifest", backup_dir(label))
}

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

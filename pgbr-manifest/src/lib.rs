//! Manifest data model and codec (components D/E): the file inventory a
//! backup carries, built from a live cluster walk, reconciled against a
//! prior backup for differential/incremental backups, and persisted as a
//! checksummed, optionally encrypted INI document alongside the backup.

mod build;
mod codec;
mod incremental;
mod types;

pub use build::{build_from_live_cluster, link_check, next_unique_label, validate, BuildOptions};
pub use codec::{load, save};
pub use incremental::build_incremental;
pub use types::{
    Manifest, ManifestData, ManifestDb, ManifestFile, ManifestLink, ManifestPath, ManifestTarget, TargetType,
};

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use pgbr_storage::PosixStorage;
    use pgbr_types::{BackupLabel, BackupType};

    use super::*;

    fn sample_manifest(label: &str) -> Manifest {
        let mut m = Manifest {
            data: ManifestData {
                label: BackupLabel::parse(label).unwrap(),
                prior_label: None,
                backup_type: BackupType::Full,
                timestamp_copy_start: 1000,
                timestamp_start: 1000,
                timestamp_stop: 1010,
                pg_version: 150000,
                pg_system_id: 7000000000000000001,
                pg_id: 1,
                option_compress: true,
                option_hardlink: false,
                option_online: true,
                option_backup_standby: false,
                option_checksum_page: true,
                option_delta: false,
                archive_start: Some("000000010000000000000001".to_string()),
                archive_stop: Some("000000010000000000000002".to_string()),
                lsn_start: Some("0/1000000".to_string()),
                lsn_stop: Some("0/2000000".to_string()),
                backrest_version: "0.1.0".to_string(),
                backrest_format: 5,
                cipher_sub_pass: None,
            },
            paths: vec![types::ManifestPath {
                name: "pg_data".to_string(),
                mode: 0o700,
                user: Some("postgres".to_string()),
                group: Some("postgres".to_string()),
            }],
            files: vec![types::ManifestFile {
                name: "pg_data/PG_VERSION".to_string(),
                size: 3,
                size_repo: Some(3),
                timestamp: 1000,
                mode: 0o600,
                user: Some("postgres".to_string()),
                group: Some("postgres".to_string()),
                checksum_sha1: Some([1u8; 20]),
                checksum_page: None,
                checksum_page_error: Vec::new(),
                reference: None,
                primary: true,
            }],
            links: Vec::new(),
            targets: vec![types::ManifestTarget {
                name: "pg_data".to_string(),
                target_type: TargetType::Path,
                path: Some(String::new()),
                file: None,
                tablespace_id: None,
                tablespace_name: None,
            }],
            db_list: vec![types::ManifestDb {
                name: "postgres".to_string(),
                id: 5,
                last_system_id: 16383,
            }],
        };
        m.sort_all();
        m
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile_dir();
        let storage = PosixStorage::new(dir.clone());
        let manifest = sample_manifest("20230101-000000F");

        save(&manifest, &storage, "backup.manifest", None).unwrap();
        let loaded = load(&storage, "backup.manifest", None).unwrap();

        assert_eq!(loaded.data.label, manifest.data.label);
        assert_eq!(loaded.files.len(), manifest.files.len());
        assert_eq!(loaded.files[0].checksum_sha1, manifest.files[0].checksum_sha1);
        assert_eq!(loaded.paths[0].user, manifest.paths[0].user);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn save_then_load_round_trips_encrypted() {
        let dir = tempfile_dir();
        let storage = PosixStorage::new(dir.clone());
        let manifest = sample_manifest("20230101-000000F");

        save(&manifest, &storage, "backup.manifest", Some("s3cret")).unwrap();
        let loaded = load(&storage, "backup.manifest", Some("s3cret")).unwrap();
        assert_eq!(loaded.data.label, manifest.data.label);

        assert!(load(&storage, "backup.manifest", Some("wrong")).is_err());

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn incremental_inherits_unchanged_file_reference() {
        let prior = sample_manifest("20230101-000000F");
        let mut current = sample_manifest("20230101-000000F_20230102-000000I");
        current.data.prior_label = Some(prior.data.label.clone());

        let merged = build_incremental(current, &prior, false);
        let file = merged.files.iter().find(|f| f.name == "pg_data/PG_VERSION").unwrap();
        assert_eq!(file.reference, Some(prior.data.label.clone()));
        assert_eq!(file.checksum_sha1, prior.files[0].checksum_sha1);
    }

    #[test]
    fn link_check_rejects_nested_destination() {
        let mut manifest = sample_manifest("20230101-000000F");
        manifest.links.push(types::ManifestLink {
            name: "pg_data/pg_wal".to_string(),
            destination: "pg_data/bad_nested".to_string(),
            user: None,
            group: None,
        });
        manifest.targets.push(types::ManifestTarget {
            name: "pg_data/pg_wal".to_string(),
            target_type: TargetType::Link,
            path: Some("pg_data/bad_nested".to_string()),
            file: None,
            tablespace_id: None,
            tablespace_name: None,
        });
        assert!(link_check(&manifest).is_err());
    }

    fn tempfile_dir() -> std::path::PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("pgbr-manifest-test-{}-{n}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}

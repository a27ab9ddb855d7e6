//! End-to-end coverage for `cmd_restore`: runs a real backup through
//! `pgbr-backup` against a filesystem fixture, then restores it through
//! `pgbr-restore` into a fresh destination, exercising cleaning and
//! selective restore.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pgbr_manifest::ManifestDb;
use pgbr_protocol::{PgClient, StartBackupResult, StopBackupResult};
use pgbr_repo::{ArchiveInfo, BackupInfo, ARCHIVE_INFO_PATH_SUFFIX, BACKUP_INFO_PATH_SUFFIX};
use pgbr_restore::{RecoveryOptions, RemapOptions, RestoreOptions};
use pgbr_storage::{PosixStorage, Storage};
use pgbr_types::{BackupType, Error, PgControl, PgHistoryEntry};

struct FixtureClient {
    control: PgControl,
    data_dir: PathBuf,
}

impl PgClient for FixtureClient {
    fn control_info(&self) -> Result<PgControl, Error> {
        Ok(self.control)
    }
    fn is_standby(&self) -> Result<bool, Error> {
        Ok(false)
    }
    fn start_backup(&self, _label: &str) -> Result<StartBackupResult, Error> {
        Ok(StartBackupResult {
            lsn_start: "0/2000028".to_string(),
            wal_start: "000000010000000000000002".to_string(),
        })
    }
    fn stop_backup(&self) -> Result<StopBackupResult, Error> {
        Ok(StopBackupResult {
            lsn_stop: "0/20000F8".to_string(),
            wal_stop: "000000010000000000000002".to_string(),
            backup_label_bytes: b"START WAL LOCATION: 0/2000028\n".to_vec(),
            tablespace_map_bytes: None,
        })
    }
    fn wait_wal_archive(&self, _segment: &str, _timeout: Duration) -> Result<(), Error> {
        Ok(())
    }
    fn wal_switch(&self) -> Result<String, Error> {
        Ok("000000010000000000000003".to_string())
    }
    fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }
}

fn tempdir(tag: &str) -> PathBuf {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("pgbr-restore-it-{tag}-{}-{n}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_cluster_fixture(data_dir: &std::path::Path) {
    std::fs::write(data_dir.join("PG_VERSION"), b"15\n").unwrap();
    std::fs::create_dir_all(data_dir.join("global")).unwrap();
    std::fs::write(data_dir.join("global/pg_control"), vec![0u8; 8192]).unwrap();
    std::fs::create_dir_all(data_dir.join("base/16385")).unwrap();
    std::fs::write(data_dir.join("base/16385/16386"), vec![1u8; 8192]).unwrap();
    std::fs::create_dir_all(data_dir.join("base/16390")).unwrap();
    std::fs::write(data_dir.join("base/16390/16391"), vec![2u8; 8192]).unwrap();
}

/// Runs a full backup against a fresh fixture cluster and returns the
/// repository storage plus the label just written.
fn run_fixture_backup(repo_dir: &std::path::Path, data_dir: &std::path::Path) -> (Arc<dyn Storage>, pgbr_types::BackupLabel) {
    write_cluster_fixture(data_dir);
    let pg_storage: Arc<dyn Storage> = Arc::new(PosixStorage::new(data_dir));
    let repo_storage: Arc<dyn Storage> = Arc::new(PosixStorage::new(repo_dir));

    let control = PgControl {
        version: 150000,
        system_id: 7_000_000_000_000_000_002,
        control_version: 1300,
        catalog_version: 202307071,
        page_size: 8192,
        wal_segment_size: 16 * 1024 * 1024,
        page_checksum_enabled: false,
    };
    let history = [PgHistoryEntry {
        history_id: 1,
        system_id: control.system_id,
        version: control.version,
        catalog_version: Some(control.catalog_version),
        control_version: Some(control.control_version),
    }];
    let mut archive_info = ArchiveInfo::new(&history, None);
    archive_info.save(repo_storage.as_ref(), ARCHIVE_INFO_PATH_SUFFIX).unwrap();
    let mut backup_info = BackupInfo::new(&history, None);
    backup_info.save(repo_storage.as_ref(), BACKUP_INFO_PATH_SUFFIX).unwrap();

    let pg = FixtureClient { control, data_dir: data_dir.to_path_buf() };
    let lock_dir = tempdir("backup-lock");
    let opts = pgbr_backup::BackupOptions {
        stanza: "main".to_string(),
        pg_id: 1,
        backup_type: BackupType::Full,
        compress: false,
        checksum_page: false,
        backup_standby: false,
        delta: false,
        exclude: Vec::new(),
        process_max: 2,
        protocol_timeout: Duration::from_secs(30),
    };
    let label = pgbr_backup::cmd_backup(&pg, pg_storage, repo_storage.clone(), &lock_dir, &opts).unwrap();
    std::fs::remove_dir_all(lock_dir).ok();
    (repo_storage, label)
}

fn restore_opts(destination: String, db_include: Vec<String>) -> RestoreOptions {
    RestoreOptions {
        stanza: "main".to_string(),
        set: None,
        delta: false,
        force: false,
        remap: RemapOptions {
            destination,
            ..Default::default()
        },
        db_include,
        recovery: RecoveryOptions::default(),
        recovery_preserve: false,
        process_max: 2,
        protocol_timeout: Duration::from_secs(30),
    }
}

#[test]
fn restore_populates_destination_and_writes_recovery_signal() {
    let data_dir = tempdir("src-data");
    let repo_dir = tempdir("repo");
    let dest_dir = tempdir("dest");
    let (repo_storage, _label) = run_fixture_backup(&repo_dir, &data_dir);

    let dest_storage: Arc<dyn Storage> = Arc::new(PosixStorage::new("/"));
    let lock_dir = tempdir("restore-lock");

    let opts = restore_opts(dest_dir.to_str().unwrap().to_string(), Vec::new());
    pgbr_restore::cmd_restore(repo_storage, dest_storage, &lock_dir, &opts).unwrap();

    assert_eq!(std::fs::read(dest_dir.join("base/16385/16386")).unwrap(), vec![1u8; 8192]);
    assert_eq!(std::fs::read(dest_dir.join("base/16390/16391")).unwrap(), vec![2u8; 8192]);
    assert_eq!(std::fs::read(dest_dir.join("global/pg_control")).unwrap(), vec![0u8; 8192]);
    assert!(dest_dir.join("recovery.signal").exists());
    assert!(dest_dir.join("postgresql.auto.conf").exists());

    std::fs::remove_dir_all(data_dir).ok();
    std::fs::remove_dir_all(repo_dir).ok();
    std::fs::remove_dir_all(dest_dir).ok();
    std::fs::remove_dir_all(lock_dir).ok();
}

#[test]
fn restore_rejects_nonempty_destination_without_delta_or_force() {
    let data_dir = tempdir("src-data");
    let repo_dir = tempdir("repo");
    let dest_dir = tempdir("dest");
    std::fs::write(dest_dir.join("stray.txt"), b"not part of the backup").unwrap();
    let (repo_storage, _label) = run_fixture_backup(&repo_dir, &data_dir);

    let dest_storage: Arc<dyn Storage> = Arc::new(PosixStorage::new("/"));
    let lock_dir = tempdir("restore-lock");

    let opts = restore_opts(dest_dir.to_str().unwrap().to_string(), Vec::new());
    let err = pgbr_restore::cmd_restore(repo_storage, dest_storage, &lock_dir, &opts).unwrap_err();
    assert_eq!(err.kind, pgbr_types::ErrorKind::PathNotEmpty);

    std::fs::remove_dir_all(data_dir).ok();
    std::fs::remove_dir_all(repo_dir).ok();
    std::fs::remove_dir_all(dest_dir).ok();
    std::fs::remove_dir_all(lock_dir).ok();
}

#[test]
fn selective_restore_zero_fills_excluded_database() {
    let data_dir = tempdir("src-data");
    let repo_dir = tempdir("repo");
    let dest_dir = tempdir("dest");
    let (repo_storage, label) = run_fixture_backup(&repo_dir, &data_dir);

    let manifest_path = format!("backup/{label}/backup.manifest");
    let mut manifest = pgbr_manifest::load(repo_storage.as_ref(), &manifest_path, None).unwrap();
    manifest.db_list = vec![
        ManifestDb { name: "app".to_string(), id: 16385, last_system_id: 16383 },
        ManifestDb { name: "reports".to_string(), id: 16390, last_system_id: 16383 },
    ];
    pgbr_manifest::save(&manifest, repo_storage.as_ref(), &manifest_path, None).unwrap();

    let dest_storage: Arc<dyn Storage> = Arc::new(PosixStorage::new("/"));
    let lock_dir = tempdir("restore-lock");

    let opts = restore_opts(dest_dir.to_str().unwrap().to_string(), vec!["app".to_string()]);
    pgbr_restore::cmd_restore(repo_storage, dest_storage, &lock_dir, &opts).unwrap();

    assert_eq!(std::fs::read(dest_dir.join("base/16385/16386")).unwrap(), vec![1u8; 8192]);
    assert_eq!(std::fs::read(dest_dir.join("base/16390/16391")).unwrap(), vec![0u8; 8192]);

    std::fs::remove_dir_all(data_dir).ok();
    std::fs::remove_dir_all(repo_dir).ok();
    std::fs::remove_dir_all(dest_dir).ok();
    std::fs::remove_dir_all(lock_dir).ok();
}

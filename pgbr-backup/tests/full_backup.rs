//! End-to-end coverage for a fresh full backup against a filesystem-fixture
//! `PgClient` double: a live "cluster" directory standing in for a real
//! PostgreSQL data directory, with no wire protocol involved.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pgbr_protocol::{PgClient, StartBackupResult, StopBackupResult};
use pgbr_repo::{ArchiveInfo, BackupInfo, ARCHIVE_INFO_PATH_SUFFIX, BACKUP_INFO_PATH_SUFFIX};
use pgbr_storage::PosixStorage;
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
    let dir = std::env::temp_dir().join(format!("pgbr-backup-it-{tag}-{}-{n}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_cluster_fixture(data_dir: &std::path::Path) {
    std::fs::write(data_dir.join("PG_VERSION"), b"15\n").unwrap();
    std::fs::create_dir_all(data_dir.join("global")).unwrap();
    std::fs::write(data_dir.join("global/pg_control"), vec![0u8; 8192]).unwrap();
    std::fs::create_dir_all(data_dir.join("base/1")).unwrap();
    std::fs::write(data_dir.join("base/1/1255"), vec![7u8; 16384]).unwrap();
}

#[test]
fn fresh_full_backup_populates_manifest_and_backup_info() {
    let data_dir = tempdir("data");
    let repo_dir = tempdir("repo");
    write_cluster_fixture(&data_dir);

    let pg_storage: Arc<dyn pgbr_storage::Storage> = Arc::new(PosixStorage::new(&data_dir));
    let repo_storage: Arc<dyn pgbr_storage::Storage> = Arc::new(PosixStorage::new(&repo_dir));

    let control = PgControl {
        version: 150000,
        system_id: 7_000_000_000_000_000_001,
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

    let pg = FixtureClient { control, data_dir: data_dir.clone() };
    let lock_dir = tempdir("lock");

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

    let manifest_path = format!("backup/{label}/backup.manifest");
    assert!(repo_storage.exists(&manifest_path).unwrap());
    let manifest = pgbr_manifest::load(repo_storage.as_ref(), &manifest_path, None).unwrap();
    assert!(manifest.files.iter().any(|f| f.name == "base/1/1255" && f.checksum_sha1.is_some()));
    assert!(manifest.files.iter().any(|f| f.name == "backup_label" && f.checksum_sha1.is_some()));
    assert_eq!(manifest.data.lsn_start.as_deref(), Some("0/2000028"));
    assert_eq!(manifest.data.lsn_stop.as_deref(), Some("0/20000F8"));

    let reloaded_backup_info = BackupInfo::load(repo_storage.as_ref(), BACKUP_INFO_PATH_SUFFIX).unwrap();
    let entries = reloaded_backup_info.current_entries_newest_first().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].label, label);

    let history_year = &label.as_str()[0..4];
    let history_path = format!("backup/backup.history/{history_year}/{label}.manifest.gz");
    assert!(repo_storage.exists(&history_path).unwrap());

    std::fs::remove_dir_all(data_dir).ok();
    std::fs::remove_dir_all(repo_dir).ok();
    std::fs::remove_dir_all(lock_dir).ok();
}

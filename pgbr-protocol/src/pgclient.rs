use std::path::PathBuf;
use std::time::Duration;

use pgbr_types::{Error, PgControl};

pub struct StartBackupResult {
    pub lsn_start: String,
    pub wal_start: String,
}

pub struct StopBackupResult {
    pub lsn_stop: String,
    pub wal_stop: String,
    pub backup_label_bytes: Vec<u8>,
    pub tablespace_map_bytes: Option<Vec<u8>>,
}

/// The PostgreSQL wire-protocol client capability the backup/restore
/// engines depend on. Credential handling, the actual backup-start/stop
/// SQL, WAL switching and standby detection are out of scope (spec §1);
/// this trait is the seam the core consumes them through.
pub trait PgClient: Send + Sync {
    fn control_info(&self) -> Result<PgControl, Error>;
    fn is_standby(&self) -> Result<bool, Error>;
    fn start_backup(&self, label: &str) -> Result<StartBackupResult, Error>;
    fn stop_backup(&self) -> Result<StopBackupResult, Error>;
    fn wait_wal_archive(&self, segment: &str, timeout: Duration) -> Result<(), Error>;
    fn wal_switch(&self) -> Result<String, Error>;
    fn data_dir(&self) -> PathBuf;
}

//! A `PgClient` that only ever answers the one question the filesystem can
//! answer on its own (`data_dir`). Talking to a live PostgreSQL instance —
//! running `pg_backup_start`/`pg_backup_stop`, checking standby status,
//! waiting on WAL archiving — needs a wire-protocol connection, which is
//! out of scope for this tool; those methods fail loudly instead of
//! pretending to work.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pgbr_protocol::{PgClient, StartBackupResult, StopBackupResult};
use pgbr_types::{Error, ErrorKind, PgControl};

pub struct LocalPgClient {
    data_dir: PathBuf,
}

impl LocalPgClient {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    fn unavailable(what: &str) -> Error {
        Error::new(ErrorKind::HostConnect, format!("{what} requires a live PostgreSQL connection, which this build does not provide"))
            .with_hint("run pg_backup_start/pg_backup_stop through psql or a wrapper that has libpq access, or use a PgClient that does")
    }
}

impl PgClient for LocalPgClient {
    fn control_info(&self) -> Result<PgControl, Error> {
        Err(Self::unavailable("reading the cluster's control file"))
    }

    fn is_standby(&self) -> Result<bool, Error> {
        Err(Self::unavailable("checking standby status"))
    }

    fn start_backup(&self, _label: &str) -> Result<StartBackupResult, Error> {
        Err(Self::unavailable("pg_backup_start"))
    }

    fn stop_backup(&self) -> Result<StopBackupResult, Error> {
        Err(Self::unavailable("pg_backup_stop"))
    }

    fn wait_wal_archive(&self, _segment: &str, _timeout: Duration) -> Result<(), Error> {
        Err(Self::unavailable("waiting for WAL archiving"))
    }

    fn wal_switch(&self) -> Result<String, Error> {
        Err(Self::unavailable("pg_switch_wal"))
    }

    fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }
}

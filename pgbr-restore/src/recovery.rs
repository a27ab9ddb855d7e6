//! Step 12 of `cmd_restore`: recovery settings emission. PG < 12 gets a
//! `recovery.conf`; PG >= 12 folds the same settings into
//! `postgresql.auto.conf` and drives recovery mode through a
//! `recovery.signal`/`standby.signal` marker file instead.

use pgbr_storage::{Storage, WriteOptions};
use pgbr_types::{Error, ErrorKind};

const PG_VERSION_95: u32 = 90500;
const PG_VERSION_12: u32 = 120000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryTarget {
    Immediate,
    Name,
    Time,
    Xid,
    Lsn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetAction {
    Pause,
    Promote,
    Shutdown,
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryOptions {
    pub standby_mode: bool,
    pub target: Option<RecoveryTarget>,
    pub target_value: Option<String>,
    pub target_timeline: Option<String>,
    pub target_action: Option<TargetAction>,
    pub target_exclusive: Option<bool>,
    pub restore_command: String,
    /// Arbitrary `recovery-option key=value` pairs passed through verbatim.
    pub extra: Vec<(String, String)>,
}

/// Writes whatever recovery configuration the target `pg_data` destination
/// needs to come up in recovery, given the backed-up cluster's
/// `pg_version`. `preserve` keeps a pre-existing `recovery.conf` (the
/// `clean` step already exempted it from deletion) instead of overwriting
/// it.
pub fn write_recovery_settings(storage: &dyn Storage, pg_data_root: &str, pg_version: u32, opts: &RecoveryOptions, preserve: bool) -> Result<(), Error> {
    if let Some(TargetAction::Shutdown) = opts.target_action {
        if pg_version < PG_VERSION_95 {
            return Err(Error::new(
                ErrorKind::OptionInvalidValue,
                "recovery target-action=shutdown requires PostgreSQL 9.5 or newer",
            ));
        }
    }

    if preserve {
        return Ok(());
    }

    let settings = build_settings(opts);

    if pg_version < PG_VERSION_12 {
        write_pre_12(storage, pg_data_root, &settings)
    } else {
        write_post_12(storage, pg_data_root, &settings, opts.standby_mode)
    }
}

fn build_settings(opts: &RecoveryOptions) -> Vec<(String, String)> {
    let mut out = Vec::new();
    out.push(("restore_command".to_string(), opts.restore_command.clone()));

    if let (Some(target), Some(value)) = (opts.target, &opts.target_value) {
        let key = match target {
            RecoveryTarget::Immediate => "recovery_target",
            RecoveryTarget::Name => "recovery_target_name",
            RecoveryTarget::Time => "recovery_target_time",
            RecoveryTarget::Xid => "recovery_target_xid",
            RecoveryTarget::Lsn => "recovery_target_lsn",
        };
        if target == RecoveryTarget::Immediate {
            out.push(("recovery_target".to_string(), "immediate".to_string()));
        } else {
            out.push((key.to_string(), value.clone()));
        }
    }
    if let Some(timeline) = &opts.target_timeline {
        out.push(("recovery_target_timeline".to_string(), timeline.clone()));
    }
    if let Some(action) = opts.target_action {
        let value = match action {
            TargetAction::Pause => "pause",
            TargetAction::Promote => "promote",
            TargetAction::Shutdown => "shutdown",
        };
        out.push(("recovery_target_action".to_string(), value.to_string()));
    }
    if let Some(exclusive) = opts.target_exclusive {
        out.push(("recovery_target_inclusive".to_string(), (!exclusive).to_string()));
    }
    out.extend(opts.extra.iter().cloned());
    out
}

fn write_pre_12(storage: &dyn Storage, pg_data_root: &str, settings: &[(String, String)]) -> Result<(), Error> {
    let mut body = String::new();
    for (key, value) in settings {
        body.push_str(key);
        body.push_str(" = '");
        body.push_str(&value.replace('\'', "''"));
        body.push_str("'\n");
    }
    let path = format!("{}/recovery.conf", pg_data_root.trim_end_matches('/'));
    write_text(storage, &path, &body)
}

fn write_post_12(storage: &dyn Storage, pg_data_root: &str, settings: &[(String, String)], standby_mode: bool) -> Result<(), Error> {
    let mut body = String::new();
    for (key, value) in settings {
        body.push_str(key);
        body.push_str(" = '");
        body.push_str(&value.replace('\'', "''"));
        body.push_str("'\n");
    }
    let auto_conf_path = format!("{}/postgresql.auto.conf", pg_data_root.trim_end_matches('/'));
    append_text(storage, &auto_conf_path, &body)?;

    let signal_name = if standby_mode { "standby.signal" } else { "recovery.signal" };
    let signal_path = format!("{}/{}", pg_data_root.trim_end_matches('/'), signal_name);
    write_text(storage, &signal_path, "")
}

fn write_text(storage: &dyn Storage, path: &str, body: &str) -> Result<(), Error> {
    use std::io::Write;
    let mut writer = storage.write(path, WriteOptions::new())?;
    writer
        .write_all(body.as_bytes())
        .map_err(|e| Error::from_io(ErrorKind::FileWrite, path.to_string(), e))?;
    writer.flush().map_err(|e| Error::from_io(ErrorKind::FileWrite, path.to_string(), e))
}

fn append_text(storage: &dyn Storage, path: &str, body: &str) -> Result<(), Error> {
    use std::io::Read;
    let mut existing = String::new();
    if let Some(mut reader) = storage.read(path, true, None, None)? {
        reader
            .read_to_string(&mut existing)
            .map_err(|e| Error::from_io(ErrorKind::FileRead, path.to_string(), e))?;
    }
    if !existing.is_empty() && !existing.ends_with('\n') {
        existing.push('\n');
    }
    existing.push_str(body);
    write_text(storage, path, &existing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgbr_storage::PosixStorage;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn tempdir() -> std::path::PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("pgbr-restore-recovery-test-{}-{n}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn pre_12_writes_recovery_conf() {
        let dir = tempdir();
        let storage = PosixStorage::new(&dir);
        let opts = RecoveryOptions {
            restore_command: "pgbr-cli archive-get %f %p".to_string(),
            ..Default::default()
        };
        write_recovery_settings(&storage, "", 110000, &opts, false).unwrap();
        let content = std::fs::read_to_string(dir.join("recovery.conf")).unwrap();
        assert!(content.contains("restore_command"));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn post_12_writes_signal_and_auto_conf() {
        let dir = tempdir();
        let storage = PosixStorage::new(&dir);
        let opts = RecoveryOptions {
            standby_mode: true,
            restore_command: "pgbr-cli archive-get %f %p".to_string(),
            ..Default::default()
        };
        write_recovery_settings(&storage, "", 150000, &opts, false).unwrap();
        assert!(dir.join("standby.signal").exists());
        assert!(!dir.join("recovery.signal").exists());
        let content = std::fs::read_to_string(dir.join("postgresql.auto.conf")).unwrap();
        assert!(content.contains("restore_command"));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn shutdown_target_action_below_95_is_rejected() {
        let dir = tempdir();
        let storage = PosixStorage::new(&dir);
        let opts = RecoveryOptions {
            target_action: Some(TargetAction::Shutdown),
            restore_command: String::new(),
            ..Default::default()
        };
        let err = write_recovery_settings(&storage, "", 90400, &opts, false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OptionInvalidValue);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn preserve_keeps_existing_recovery_conf() {
        let dir = tempdir();
        std::fs::write(dir.join("recovery.conf"), "standby_mode = 'on'\n").unwrap();
        let storage = PosixStorage::new(&dir);
        let opts = RecoveryOptions::default();
        write_recovery_settings(&storage, "", 110000, &opts, true).unwrap();
        let content = std::fs::read_to_string(dir.join("recovery.conf")).unwrap();
        assert_eq!(content, "standby_mode = 'on'\n");
        std::fs::remove_dir_all(dir).ok();
    }
}

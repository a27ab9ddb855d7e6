//! Step 2 of `cmd_restore`: picks which backup in `backup.info`'s current
//! history the restore will apply.

use pgbr_repo::{BackupCurrentEntry, BackupInfo};
use pgbr_types::{BackupLabel, Error, ErrorKind};

/// `set` is `None` or `"latest"` for the newest backup in current history,
/// otherwise the exact label of a `[backup:current]` entry.
pub fn select_backup_set(backup_info: &BackupInfo, set: Option<&str>) -> Result<BackupCurrentEntry, Error> {
    match set {
        None | Some("latest") => backup_info
            .current_entries_newest_first()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::new(ErrorKind::BackupSetInvalid, "repository has no current backups")),
        Some(label_str) => {
            let label = BackupLabel::parse(label_str)
                .map_err(|_| Error::new(ErrorKind::BackupSetInvalid, format!("'{label_str}' is not a valid backup label")))?;
            backup_info
                .get_current(&label)?
                .ok_or_else(|| Error::new(ErrorKind::BackupSetInvalid, format!("backup set '{label_str}' not found")))
        }
    }
}

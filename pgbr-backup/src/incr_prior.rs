//! Step 5 of `cmd_backup`: finds the backup a diff/incr build reconciles
//! against by walking `backup.info`'s current list newest-first.

use pgbr_manifest::Manifest;
use pgbr_repo::{BackupCurrentEntry, BackupInfo};
use pgbr_storage::Storage;
use pgbr_types::{BackupType, Error};

pub struct IncrPrior {
    pub manifest: Manifest,
    pub entry: BackupCurrentEntry,
}

/// `Some` names the most recent backup this `pg_id` can build against (for
/// `Diff`, it must itself be a `Full`); `None` means no usable prior
/// exists and the caller should demote the request to `Full`.
pub fn build_incr_prior(
    backup_info: &BackupInfo,
    pg_id: u32,
    requested_type: BackupType,
    manifest_cipher_pass: Option<&str>,
    repo_storage: &dyn Storage,
) -> Result<Option<IncrPrior>, Error> {
    let entries = backup_info.current_entries_newest_first()?;
    let candidate = entries
        .into_iter()
        .find(|e| e.pg_id == pg_id && (requested_type != BackupType::Diff || e.backup_type == BackupType::Full));

    let Some(entry) = candidate else {
        return Ok(None);
    };

    let manifest_path = crate::paths::backup_manifest_path(&entry.label);
    let manifest = pgbr_manifest::load(repo_storage, &manifest_path, manifest_cipher_pass)?;
    Ok(Some(IncrPrior { manifest, entry }))
}

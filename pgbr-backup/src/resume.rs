//! Step 7 of `cmd_backup`: resuming a backup interrupted mid-copy. Only the
//! single most recent backup directory is considered, matching the
//! specification's "only the most recent candidate" rule.

use pgbr_manifest::Manifest;
use pgbr_storage::Storage;
use pgbr_types::{BackupLabel, Error};

pub struct ResumeCandidate {
    pub label: BackupLabel,
    pub manifest: Manifest,
}

/// A directory is resumable when its `.copy` manifest checkpoint exists
/// but the final `backup.manifest` was never written (the only point in
/// `cmd_backup` between those two writes is mid-copy, step 10).
pub fn find_resumable(repo_storage: &dyn Storage, manifest_cipher_pass: Option<&str>) -> Result<Option<ResumeCandidate>, Error> {
    let mut labels = repo_storage.list("backup", None)?;
    labels.retain(|l| l != "backup.history");
    labels.sort();
    labels.reverse();

    let Some(label_str) = labels.into_iter().next() else {
        return Ok(None);
    };
    let label = BackupLabel::parse(&label_str)?;
    let manifest_path = crate::paths::backup_manifest_path(&label);
    let copy_path = crate::paths::backup_manifest_copy_path(&label);

    if repo_storage.exists(&copy_path)? && !repo_storage.exists(&manifest_path)? {
        let manifest = pgbr_manifest::load(repo_storage, &copy_path, manifest_cipher_pass)?;
        return Ok(Some(ResumeCandidate { label, manifest }));
    }

    Ok(None)
}

/// A resumed manifest is only usable if the new backup would have made the
/// identical top-level choices; anything else and the caller discards the
/// old directory and starts fresh.
pub fn is_usable(resume: &Manifest, current: &Manifest) -> bool {
    resume.data.backup_type == current.data.backup_type
        && resume.data.prior_label == current.data.prior_label
        && resume.data.option_compress == current.data.option_compress
        && resume.data.option_hardlink == current.data.option_hardlink
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgbr_manifest::{Manifest, ManifestData};
    use pgbr_storage::PosixStorage;
    use pgbr_types::{BackupLabel, BackupType, Timestamp15};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn tempdir() -> std::path::PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("pgbr-backup-resume-test-{}-{n}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn sample(label: BackupLabel) -> Manifest {
        Manifest {
            data: ManifestData {
                label,
                prior_label: None,
                backup_type: BackupType::Full,
                timestamp_copy_start: 0,
                timestamp_start: 0,
                timestamp_stop: 0,
                pg_version: 150000,
                pg_system_id: 1,
                pg_id: 1,
                option_compress: true,
                option_hardlink: false,
                option_online: true,
                option_backup_standby: false,
                option_checksum_page: false,
                option_delta: false,
                archive_start: None,
                archive_stop: None,
                lsn_start: None,
                lsn_stop: None,
                backrest_version: "0.1.0".to_string(),
                backrest_format: 5,
                cipher_sub_pass: None,
            },
            paths: Vec::new(),
            files: Vec::new(),
            links: Vec::new(),
            targets: Vec::new(),
            db_list: Vec::new(),
        }
    }

    #[test]
    fn finds_copy_without_final_manifest() {
        let dir = tempdir();
        let storage = PosixStorage::new(&dir);
        let label = BackupLabel::new_full(Timestamp15::parse("20230101-000000").unwrap());
        let manifest = sample(label.clone());
        pgbr_manifest::save(&manifest, &storage, &crate::paths::backup_manifest_copy_path(&label), None).unwrap();

        let found = find_resumable(&storage, None).unwrap().unwrap();
        assert_eq!(found.label, label);
        assert!(is_usable(&found.manifest, &manifest));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn ignores_a_completed_backup() {
        let dir = tempdir();
        let storage = PosixStorage::new(&dir);
        let label = BackupLabel::new_full(Timestamp15::parse("20230101-000000").unwrap());
        let manifest = sample(label.clone());
        pgbr_manifest::save(&manifest, &storage, &crate::paths::backup_manifest_copy_path(&label), None).unwrap();
        pgbr_manifest::save(&manifest, &storage, &crate::paths::backup_manifest_path(&label), None).unwrap();

        assert!(find_resumable(&storage, None).unwrap().is_none());
        std::fs::remove_dir_all(dir).ok();
    }
}

use serde_json::{json, Value};

use pgbr_storage::Storage;
use pgbr_types::{BackupLabel, BackupType, Error, ErrorKind, PgHistoryEntry};

pub const BACKUP_INFO_PATH_SUFFIX: &str = "backup.info";

use crate::info::InfoFile;

/// One `[backup:current]` entry: everything the repository remembers about
/// a completed backup without re-reading its manifest (spec §4.3).
#[derive(Debug, Clone)]
pub struct BackupCurrentEntry {
    pub label: BackupLabel,
    pub backup_type: BackupType,
    pub prior: Option<BackupLabel>,
    pub reference: Vec<BackupLabel>,
    pub archive_start: Option<String>,
    pub archive_stop: Option<String>,
    pub info_size: u64,
    pub info_size_delta: u64,
    pub repo_size: u64,
    pub repo_size_delta: u64,
    pub timestamp_start: i64,
    pub timestamp_stop: i64,
    pub backrest_version: String,
    pub backrest_format: u32,
    pub pg_id: u32,
    pub checksum_page: Option<bool>,
}

pub struct BackupInfo {
    inner: InfoFile,
}

impl BackupInfo {
    pub fn new(history: &[PgHistoryEntry], cipher_pass: Option<&str>) -> Self {
        let mut inner = InfoFile::new();
        for entry in history {
            inner.doc.set(
                "db:history",
                &entry.history_id.to_string(),
                json!({
                    "db-version": entry.version.to_string(),
                    "db-systemid": entry.system_id,
                    "db-catalog-version": entry.catalog_version,
                    "db-control-version": entry.control_version,
                }),
            );
        }
        if let Some(pass) = cipher_pass {
            inner.doc.set("cipher", "cipher-pass", Value::from(pass));
        }
        Self { inner }
    }

    pub fn load(storage: &dyn Storage, path: &str) -> Result<Self, Error> {
        Ok(Self {
            inner: InfoFile::load(storage, path)?,
        })
    }

    pub fn save(&mut self, storage: &dyn Storage, path: &str) -> Result<(), Error> {
        self.inner.save(storage, path)
    }

    pub fn cipher_pass(&self) -> Option<String> {
        self.inner
            .doc
            .get("cipher", "cipher-pass")
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    pub fn current_history_identity(&self) -> Result<(u32, u32, u64), Error> {
        let entries = self.inner.doc.section("db:history").unwrap_or(&[]);
        let mut newest: Option<(u32, u32, u64)> = None;
        for (key, value) in entries {
            let history_id: u32 = key
                .parse()
                .map_err(|_| Error::new(ErrorKind::FileInvalid, "non-numeric db:history key"))?;
            if newest.map(|(id, _, _)| history_id > id).unwrap_or(true) {
                let version: u32 = value["db-version"]
                    .as_str()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| Error::new(ErrorKind::FileInvalid, "missing db-version"))?;
                let system_id = value["db-systemid"]
                    .as_u64()
                    .ok_or_else(|| Error::new(ErrorKind::FileInvalid, "missing db-systemid"))?;
                newest = Some((history_id, version, system_id));
            }
        }
        newest.ok_or_else(|| Error::new(ErrorKind::FileInvalid, "backup.info has no history entries"))
    }

    pub fn add_current(&mut self, entry: &BackupCurrentEntry) {
        self.inner.doc.set(
            "backup:current",
            entry.label.as_str(),
            json!({
                "backup-type": entry.backup_type.as_str(),
                "backup-prior": entry.prior.as_ref().map(|l| l.as_str().to_string()),
                "backup-reference": entry.reference.iter().map(|l| l.as_str().to_string()).collect::<Vec<_>>(),
                "archive-start": entry.archive_start,
                "archive-stop": entry.archive_stop,
                "backup-info-size": entry.info_size,
                "backup-info-size-delta": entry.info_size_delta,
                "backup-info-repository-size": entry.repo_size,
                "backup-info-repository-size-delta": entry.repo_size_delta,
                "backup-timestamp-start": entry.timestamp_start,
                "backup-timestamp-stop": entry.timestamp_stop,
                "backrest-version": entry.backrest_version,
                "backrest-format": entry.backrest_format,
                "backup-pg-id": entry.pg_id,
                "option-checksum-page": entry.checksum_page,
            }),
        );
    }

    pub fn remove_current(&mut self, label: &BackupLabel) {
        // IniDocument has no remove-key primitive yet; overwrite with a
        // tombstone marker the listing below filters out.
        self.inner
            .doc
            .set("backup:current", label.as_str(), Value::Null);
    }

    pub fn list_current(&self) -> Vec<String> {
        self.inner
            .doc
            .section("backup:current")
            .unwrap_or(&[])
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Every live `[backup:current]` entry, newest label first (labels are
    /// fixed-width timestamp-prefixed, so lexicographic descending order is
    /// chronological descending order too).
    pub fn current_entries_newest_first(&self) -> Result<Vec<BackupCurrentEntry>, Error> {
        let mut labels = self.list_current();
        labels.sort_by(|a, b| b.cmp(a));
        labels
            .into_iter()
            .map(|label| {
                self.get_current(&BackupLabel::parse(&label)?)?
                    .ok_or_else(|| Error::new(ErrorKind::FileInvalid, format!("backup:current entry '{label}' vanished")))
            })
            .collect()
    }

    pub fn get_current(&self, label: &BackupLabel) -> Result<Option<BackupCurrentEntry>, Error> {
        let Some(entry) = self.inner.doc.section("backup:current").and_then(|s| {
            s.iter().find(|(k, v)| k == label.as_str() && !v.is_null()).map(|(_, v)| v)
        }) else {
            return Ok(None);
        };

        let missing = |k: &str| Error::new(ErrorKind::FileInvalid, format!("backup:current '{label}' missing '{k}'"));
        let backup_type = match entry["backup-type"].as_str() {
            Some("full") => BackupType::Full,
            Some("diff") => BackupType::Diff,
            Some("incr") => BackupType::Incr,
            _ => return Err(missing("backup-type")),
        };
        let prior = entry["backup-prior"].as_str().map(BackupLabel::parse).transpose()?;
        let reference = entry["backup-reference"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str()).map(BackupLabel::parse).collect::<Result<Vec<_>, _>>())
            .transpose()?
            .unwrap_or_default();

        Ok(Some(BackupCurrentEntry {
            label: label.clone(),
            backup_type,
            prior,
            reference,
            archive_start: entry["archive-start"].as_str().map(String::from),
            archive_stop: entry["archive-stop"].as_str().map(String::from),
            info_size: entry["backup-info-size"].as_u64().unwrap_or(0),
            info_size_delta: entry["backup-info-size-delta"].as_u64().unwrap_or(0),
            repo_size: entry["backup-info-repository-size"].as_u64().unwrap_or(0),
            repo_size_delta: entry["backup-info-repository-size-delta"].as_u64().unwrap_or(0),
            timestamp_start: entry["backup-timestamp-start"].as_i64().unwrap_or(0),
            timestamp_stop: entry["backup-timestamp-stop"].as_i64().unwrap_or(0),
            backrest_version: entry["backrest-version"].as_str().unwrap_or("").to_string(),
            backrest_format: entry["backrest-format"].as_u64().unwrap_or(0) as u32,
            pg_id: entry["backup-pg-id"].as_u64().unwrap_or(1) as u32,
            checksum_page: entry["option-checksum-page"].as_bool(),
        }))
    }
}

/// Cross-file consistency check (spec §4.3): if both info files exist
/// their current history entries must agree on `{history_id, version,
/// system_id}`.
pub fn check_history_agreement(
    archive: &crate::ArchiveInfo,
    backup: &BackupInfo,
) -> Result<(), Error> {
    let archive_current = archive.current()?;
    let backup_current = backup.current_history_identity()?;
    let archive_identity = (
        archive_current.history_id,
        archive_current.version,
        archive_current.system_id,
    );
    if archive_identity != backup_current {
        return Err(Error::new(
            ErrorKind::FileInvalid,
            "archive.info and backup.info disagree on current database history",
        )
        .with_hint("the stanza may be corrupt or was never upgraded consistently; run stanza-upgrade"));
    }
    Ok(())
}

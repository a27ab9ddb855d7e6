use serde_json::{json, Value};

use pgbr_storage::Storage;
use pgbr_types::{Error, ErrorKind, PgHistoryEntry};

use crate::info::InfoFile;

pub const ARCHIVE_INFO_PATH_SUFFIX: &str = "archive.info";

/// Typed view over an `archive.info` `InfoFile`: `[db]`, `[db:history]` and
/// the optional `[cipher]` section holding the archive subpass.
pub struct ArchiveInfo {
    inner: InfoFile,
}

impl ArchiveInfo {
    pub fn new(history: &[PgHistoryEntry], cipher_pass: Option<&str>) -> Self {
        let mut inner = InfoFile::new();
        write_history(&mut inner, history);
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

    /// History entries newest-first; element 0 is "current" (spec §3.1).
    pub fn history(&self) -> Result<Vec<PgHistoryEntry>, Error> {
        read_history(&self.inner)
    }

    pub fn current(&self) -> Result<PgHistoryEntry, Error> {
        self.history()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::new(ErrorKind::FileInvalid, "archive.info has no history entries"))
    }
}

fn write_history(info: &mut InfoFile, history: &[PgHistoryEntry]) {
    for (i, entry) in history.iter().enumerate() {
        info.doc.set(
            "db",
            &format!("history-id-{i}"),
            Value::from(entry.history_id),
        );
        info.doc.set(
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
    if let Some(first) = history.first() {
        info.doc.set("db", "db-id", Value::from(first.history_id));
        info.doc
            .set("db", "db-system-id", Value::from(first.system_id));
        info.doc
            .set("db", "db-version", Value::from(first.version.to_string()));
    }
}

fn read_history(info: &InfoFile) -> Result<Vec<PgHistoryEntry>, Error> {
    let entries = info.doc.section("db:history").unwrap_or(&[]);
    let mut out = Vec::new();
    for (key, value) in entries {
        let history_id: u32 = key
            .parse()
            .map_err(|_| Error::new(ErrorKind::FileInvalid, "non-numeric db:history key"))?;
        let version: u32 = value["db-version"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::new(ErrorKind::FileInvalid, "db:history missing db-version"))?;
        let system_id = value["db-systemid"]
            .as_u64()
            .ok_or_else(|| Error::new(ErrorKind::FileInvalid, "db:history missing db-systemid"))?;
        out.push(PgHistoryEntry {
            history_id,
            system_id,
            version,
            catalog_version: value["db-catalog-version"].as_u64().map(|v| v as u32),
            control_version: value["db-control-version"].as_u64().map(|v| v as u32),
        });
    }
    out.sort_by(|a, b| b.history_id.cmp(&a.history_id));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_history_newest_first() {
        let history = vec![
            PgHistoryEntry {
                history_id: 2,
                system_id: 222,
                version: 150000,
                catalog_version: Some(202301001),
                control_version: Some(1300),
            },
            PgHistoryEntry {
                history_id: 1,
                system_id: 111,
                version: 140000,
                catalog_version: Some(202201001),
                control_version: Some(1300),
            },
        ];
        let mut info = ArchiveInfo::new(&history, Some("subpass"));
        let bytes = info.inner.to_bytes().unwrap();
        let loaded = InfoFile::from_bytes(&bytes, false).unwrap();
        let view = ArchiveInfo { inner: loaded };
        let round = view.history().unwrap();
        assert_eq!(round[0].history_id, 2);
        assert_eq!(round[1].history_id, 1);
        assert_eq!(view.cipher_pass().as_deref(), Some("subpass"));
    }
}

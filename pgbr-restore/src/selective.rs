//! Step 8 of `cmd_restore`: selective restore. `db-include` names the
//! databases to keep; every other non-system database's files are zero
//! filled instead of copied, but their manifest entries (and the catalog
//! files needed to boot the cluster) still get created.

use regex::Regex;

use pgbr_manifest::Manifest;
use pgbr_types::{Error, ErrorKind};

/// The lowest object id PostgreSQL ever assigns to a user-created database;
/// anything below this is a system catalog database and is always kept.
pub const PG_USER_OBJECT_MIN_ID: u32 = 16384;

/// Resolves `db_include` (names or numeric ids) against the manifest's
/// `db_list` and returns a regex matching every file path that belongs to
/// an excluded user database, or `None` if nothing is excluded (including
/// the empty `db_include` case, which means "restore everything").
pub fn selective_restore_regex(manifest: &Manifest, db_include: &[String]) -> Result<Option<Regex>, Error> {
    if db_include.is_empty() {
        return Ok(None);
    }

    let mut included = Vec::new();
    for want in db_include {
        let found = manifest.db_list.iter().find(|db| db.name == *want || db.id.to_string() == *want);
        match found {
            Some(db) => included.push(db.id),
            None => {
                return Err(Error::new(
                    ErrorKind::OptionInvalidValue,
                    format!("--db-include '{want}' does not match any database in the backup"),
                ))
            }
        }
    }

    let excluded: Vec<u32> = manifest
        .db_list
        .iter()
        .filter(|db| db.id >= PG_USER_OBJECT_MIN_ID && !included.contains(&db.id))
        .map(|db| db.id)
        .collect();

    if excluded.is_empty() {
        return Ok(None);
    }

    let alternation = excluded.iter().map(|id| id.to_string()).collect::<Vec<_>>().join("|");
    let pattern = format!(r"^(?:base/(?:{alt})/|pg_tblspc/[0-9]+/(?:[^/]+/)?(?:{alt})/)", alt = alternation);
    Regex::new(&pattern)
        .map(Some)
        .map_err(|e| Error::new(ErrorKind::Format, "failed to build selective-restore regex").with_source(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgbr_manifest::ManifestDb;
    use pgbr_manifest::{ManifestData, ManifestTarget, TargetType};
    use pgbr_types::{BackupLabel, BackupType};

    fn manifest_with_dbs(dbs: &[(u32, &str)]) -> Manifest {
        Manifest {
            data: ManifestData {
                label: BackupLabel::parse("20230101-000000F").unwrap(),
                prior_label: None,
                backup_type: BackupType::Full,
                timestamp_copy_start: 0,
                timestamp_start: 0,
                timestamp_stop: 0,
                pg_version: 150000,
                pg_system_id: 1,
                pg_id: 1,
                option_compress: false,
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
            targets: vec![ManifestTarget {
                name: "pg_data".to_string(),
                target_type: TargetType::Path,
                path: Some(String::new()),
                file: None,
                tablespace_id: None,
                tablespace_name: None,
            }],
            db_list: dbs
                .iter()
                .map(|(id, name)| ManifestDb {
                    name: name.to_string(),
                    id: *id,
                    last_system_id: 16383,
                })
                .collect(),
        }
    }

    #[test]
    fn no_include_means_no_exclusion() {
        let manifest = manifest_with_dbs(&[(16385, "app")]);
        assert!(selective_restore_regex(&manifest, &[]).unwrap().is_none());
    }

    #[test]
    fn excludes_non_included_user_database() {
        let manifest = manifest_with_dbs(&[(16385, "app"), (16390, "reports")]);
        let re = selective_restore_regex(&manifest, &["app".to_string()]).unwrap().unwrap();
        assert!(re.is_match("base/16390/16391"));
        assert!(!re.is_match("base/16385/16386"));
        assert!(re.is_match("pg_tblspc/20000/PG_15_202307071/16390/16391"));
    }

    #[test]
    fn system_databases_are_never_excluded() {
        let manifest = manifest_with_dbs(&[(1, "template1"), (16385, "app")]);
        let re = selective_restore_regex(&manifest, &["app".to_string()]).unwrap();
        assert!(re.is_none());
    }

    #[test]
    fn unknown_db_include_is_rejected() {
        let manifest = manifest_with_dbs(&[(16385, "app")]);
        let err = selective_restore_regex(&manifest, &["missing".to_string()]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OptionInvalidValue);
    }
}

//! Step 4 of `cmd_restore`: rewrites the loaded manifest's targets/links in
//! place so every later step (clean, copy, recovery settings) reads
//! destination paths rather than the paths the backup was originally taken
//! from.

use std::collections::HashMap;

use pgbr_manifest::Manifest;
use pgbr_types::{Error, ErrorKind};

#[derive(Debug, Clone, Default)]
pub struct RemapOptions {
    pub destination: String,
    pub tablespace_map: HashMap<String, String>,
    pub tablespace_map_id: HashMap<u32, String>,
    pub tablespace_map_all: Option<String>,
    pub link_map: HashMap<String, String>,
    pub link_all: bool,
}

/// Applies `opts` to `manifest.targets[0]` (always `pg_data`) and to every
/// tablespace target and non-tablespace link, in place.
pub fn remap(manifest: &mut Manifest, opts: &RemapOptions) -> Result<(), Error> {
    {
        let pg_data = manifest
            .targets
            .iter_mut()
            .find(|t| t.name == "pg_data")
            .ok_or_else(|| Error::new(ErrorKind::Assert, "manifest has no pg_data target"))?;
        pg_data.path = Some(opts.destination.clone());
    }

    let mut remapped_tablespace_ids = Vec::new();
    for target in manifest.targets.iter_mut().filter(|t| t.tablespace_id.is_some()) {
        let id = target.tablespace_id.unwrap();
        let by_name = target.tablespace_name.as_ref().and_then(|n| opts.tablespace_map.get(n));
        let by_id = opts.tablespace_map_id.get(&id);
        if let Some(new_path) = by_id.or(by_name) {
            target.path = Some(new_path.clone());
            remapped_tablespace_ids.push(id);
        } else if let Some(root) = &opts.tablespace_map_all {
            let name = target.tablespace_name.clone().unwrap_or_else(|| format!("ts_{id}"));
            target.path = Some(format!("{}/{}", root.trim_end_matches('/'), name));
            remapped_tablespace_ids.push(id);
        }
    }

    let requested: Vec<&String> = opts.tablespace_map.keys().collect();
    for name in requested {
        let found = manifest
            .targets
            .iter()
            .any(|t| t.tablespace_name.as_deref() == Some(name.as_str()));
        if !found {
            return Err(Error::new(
                ErrorKind::TablespaceMap,
                format!("--tablespace-map references unknown tablespace '{name}'"),
            ));
        }
    }
    for id in opts.tablespace_map_id.keys() {
        if !manifest.targets.iter().any(|t| t.tablespace_id == Some(*id)) {
            return Err(Error::new(
                ErrorKind::TablespaceMap,
                format!("--tablespace-map-id references unknown tablespace oid {id}"),
            ));
        }
    }

    // Every tablespace link's destination must track its target's
    // (possibly just-remapped) path.
    for target in manifest.targets.iter().filter(|t| t.tablespace_id.is_some()) {
        if let Some(link) = manifest.links.iter_mut().find(|l| l.name == target.name) {
            link.destination = target.path.clone().unwrap_or_default();
        }
    }

    let tablespace_link_names: Vec<String> = manifest
        .targets
        .iter()
        .filter(|t| t.tablespace_id.is_some())
        .map(|t| t.name.clone())
        .collect();

    for key in opts.link_map.keys() {
        let found = manifest.links.iter().any(|l| link_short_name(&l.name) == key.as_str());
        if !found {
            return Err(Error::new(
                ErrorKind::LinkMap,
                format!("--link-map references unknown link '{key}'"),
            ));
        }
    }

    let mut unmapped = Vec::new();
    for link in manifest.links.iter_mut() {
        if tablespace_link_names.contains(&link.name) {
            continue;
        }
        let short = link_short_name(&link.name).to_string();
        if let Some(new_dest) = opts.link_map.get(&short) {
            link.destination = new_dest.clone();
        } else if !opts.link_all {
            unmapped.push(link.name.clone());
        }
    }
    if let Some(first) = unmapped.first() {
        return Err(Error::new(
            ErrorKind::LinkMap,
            format!("link '{first}' has no --link-map entry and --link-all was not given"),
        )
        .with_hint("pass --link-map=<name>=<path> for every non-tablespace link, or --link-all to restore them unchanged"));
    }

    Ok(())
}

fn link_short_name(manifest_name: &str) -> &str {
    manifest_name.rsplit('/').next().unwrap_or(manifest_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgbr_manifest::{ManifestData, ManifestLink, ManifestTarget, TargetType};
    use pgbr_types::{BackupLabel, BackupType};

    fn empty_manifest() -> Manifest {
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
            db_list: Vec::new(),
        }
    }

    #[test]
    fn sets_pg_data_destination() {
        let mut manifest = empty_manifest();
        let opts = RemapOptions {
            destination: "/var/lib/pgsql/15/data".to_string(),
            ..Default::default()
        };
        remap(&mut manifest, &opts).unwrap();
        assert_eq!(manifest.targets[0].path.as_deref(), Some("/var/lib/pgsql/15/data"));
    }

    #[test]
    fn rejects_tablespace_map_for_unknown_name() {
        let mut manifest = empty_manifest();
        let mut opts = RemapOptions {
            destination: "/data".to_string(),
            ..Default::default()
        };
        opts.tablespace_map.insert("ts_99".to_string(), "/mnt/ts".to_string());
        let err = remap(&mut manifest, &opts).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TablespaceMap);
    }

    #[test]
    fn remaps_tablespace_by_id_and_updates_link() {
        let mut manifest = empty_manifest();
        manifest.targets.push(ManifestTarget {
            name: "pg_tblspc/16500".to_string(),
            target_type: TargetType::Link,
            path: Some("/old/ts".to_string()),
            file: None,
            tablespace_id: Some(16500),
            tablespace_name: Some("ts_16500".to_string()),
        });
        manifest.links.push(ManifestLink {
            name: "pg_tblspc/16500".to_string(),
            destination: "/old/ts".to_string(),
            user: None,
            group: None,
        });
        let mut opts = RemapOptions {
            destination: "/data".to_string(),
            link_all: true,
            ..Default::default()
        };
        opts.tablespace_map_id.insert(16500, "/new/ts".to_string());
        remap(&mut manifest, &opts).unwrap();
        assert_eq!(manifest.targets[1].path.as_deref(), Some("/new/ts"));
        assert_eq!(manifest.links[0].destination, "/new/ts");
    }

    #[test]
    fn unmapped_link_without_link_all_is_rejected() {
        let mut manifest = empty_manifest();
        manifest.links.push(ManifestLink {
            name: "pg_data/pg_wal".to_string(),
            destination: "/old/wal".to_string(),
            user: None,
            group: None,
        });
        let opts = RemapOptions {
            destination: "/data".to_string(),
            ..Default::default()
        };
        let err = remap(&mut manifest, &opts).unwrap_err();
        assert_eq!(err.kind, ErrorKind::LinkMap);
    }
}

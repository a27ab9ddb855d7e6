//! Maps manifest names (which carry a `pg_tblspc/<oid>/...` prefix for
//! tablespace-linked entries and no prefix at all for everything else) onto
//! the destination target that owns them and the absolute filesystem path
//! under that target. Shared by the clean algorithm and the per-file
//! restore dispatch, both of which need "which target root does this
//! manifest entry restore under" (spec §4.6 step 10's "longest prefix"
//! rule).

use pgbr_manifest::ManifestTarget;

/// `target.name` is `"pg_data"` for the data directory (matches every name
/// without a more specific prefix) or `"pg_tblspc/<oid>"` for a tablespace.
pub fn resolve<'a>(targets: &'a [ManifestTarget], name: &'a str) -> (&'a ManifestTarget, &'a str) {
    let mut best: Option<&ManifestTarget> = None;
    for target in targets {
        if target.name == "pg_data" {
            continue;
        }
        let prefix = format!("{}/", target.name);
        if name.starts_with(&prefix) {
            if best.map(|b| target.name.len() > b.name.len()).unwrap_or(true) {
                best = Some(target);
            }
        }
    }
    match best {
        Some(target) => {
            let rest = name.strip_prefix(&format!("{}/", target.name)).unwrap_or(name);
            (target, rest)
        }
        None => {
            let pg_data = targets
                .iter()
                .find(|t| t.name == "pg_data")
                .expect("manifest always has a pg_data target");
            (pg_data, name)
        }
    }
}

/// Joins a target's (already remapped) absolute root with the file's
/// relative name under that target.
pub fn destination_path(target: &ManifestTarget, relative: &str) -> String {
    let root = target.path.as_deref().unwrap_or("");
    if relative.is_empty() {
        root.to_string()
    } else {
        format!("{}/{}", root.trim_end_matches('/'), relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgbr_manifest::TargetType;

    fn targets() -> Vec<ManifestTarget> {
        vec![
            ManifestTarget {
                name: "pg_data".to_string(),
                target_type: TargetType::Path,
                path: Some("/data".to_string()),
                file: None,
                tablespace_id: None,
                tablespace_name: None,
            },
            ManifestTarget {
                name: "pg_tblspc/16500".to_string(),
                target_type: TargetType::Link,
                path: Some("/mnt/ts".to_string()),
                file: None,
                tablespace_id: Some(16500),
                tablespace_name: Some("ts_16500".to_string()),
            },
        ]
    }

    #[test]
    fn plain_file_resolves_to_pg_data() {
        let targets = targets();
        let (target, rest) = resolve(&targets, "base/1/1255");
        assert_eq!(target.name, "pg_data");
        assert_eq!(rest, "base/1/1255");
        assert_eq!(destination_path(target, rest), "/data/base/1/1255");
    }

    #[test]
    fn tablespace_file_resolves_to_its_target() {
        let targets = targets();
        let (target, rest) = resolve(&targets, "pg_tblspc/16500/PG_15_202307071/16390/16391");
        assert_eq!(target.name, "pg_tblspc/16500");
        assert_eq!(rest, "PG_15_202307071/16390/16391");
        assert_eq!(destination_path(target, rest), "/mnt/ts/PG_15_202307071/16390/16391");
    }
}

use std::collections::HashMap;
use std::io::{Read, Write};

use openssl::hash::MessageDigest;
use serde_json::{json, Value};

use pgbr_io::{CipherBlock, FilterGroup};
use pgbr_repo::InfoFile;
use pgbr_storage::{Storage, WriteOptions};
use pgbr_types::{BackupLabel, BackupType, Error, ErrorKind};

use crate::types::{Manifest, ManifestData, ManifestFile, ManifestLink, ManifestPath, ManifestTarget, TargetType};

type OwnerTriple = (u32, Option<String>, Option<String>);

fn most_common<I: Iterator<Item = OwnerTriple>>(triples: I) -> OwnerTriple {
    let mut counts: HashMap<OwnerTriple, usize> = HashMap::new();
    for t in triples {
        *counts.entry(t).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|(t, _)| t)
        .unwrap_or((0o644, None, None))
}

fn to_ini(manifest: &Manifest) -> InfoFile {
    let mut info = InfoFile::new();
    let data = &manifest.data;

    info.doc.set("backup", "backup-label", Value::from(data.label.as_str()));
    info.doc.set(
        "backup",
        "backup-prior",
        data.prior_label.as_ref().map(|l| Value::from(l.as_str())).unwrap_or(Value::Null),
    );
    info.doc.set("backup", "backup-type", Value::from(data.backup_type.as_str()));
    info.doc.set("backup", "backup-timestamp-copy-start", Value::from(data.timestamp_copy_start));
    info.doc.set("backup", "backup-timestamp-start", Value::from(data.timestamp_start));
    info.doc.set("backup", "backup-timestamp-stop", Value::from(data.timestamp_stop));
    info.doc.set("backup", "db-version", Value::from(data.pg_version));
    info.doc.set("backup", "db-system-id", Value::from(data.pg_system_id));
    info.doc.set("backup", "backup-pg-id", Value::from(data.pg_id));
    info.doc.set("backup", "backup-archive-start", json_opt(&data.archive_start));
    info.doc.set("backup", "backup-archive-stop", json_opt(&data.archive_stop));
    info.doc.set("backup", "backup-lsn-start", json_opt(&data.lsn_start));
    info.doc.set("backup", "backup-lsn-stop", json_opt(&data.lsn_stop));
    info.doc.set("backup", "backrest-version", Value::from(data.backrest_version.clone()));
    info.doc.set("backup", "backrest-format", Value::from(data.backrest_format));
    info.doc.set("backup", "cipher-sub-pass", json_opt(&data.cipher_sub_pass));

    info.doc.set("backup:option", "option-compress", Value::from(data.option_compress));
    info.doc.set("backup:option", "option-hardlink", Value::from(data.option_hardlink));
    info.doc.set("backup:option", "option-online", Value::from(data.option_online));
    info.doc.set("backup:option", "option-backup-standby", Value::from(data.option_backup_standby));
    info.doc.set("backup:option", "option-checksum-page", Value::from(data.option_checksum_page));
    info.doc.set("backup:option", "option-delta", Value::from(data.option_delta));

    for target in &manifest.targets {
        info.doc.set(
            "backup:target",
            &target.name,
            json!({
                "type": match target.target_type { TargetType::Path => "path", TargetType::Link => "link" },
                "path": target.path,
                "file": target.file,
                "tablespace-id": target.tablespace_id,
                "tablespace-name": target.tablespace_name,
            }),
        );
    }

    for db in &manifest.db_list {
        info.doc.set(
            "backup:db",
            &db.name,
            json!({ "db-id": db.id, "db-last-system-id": db.last_system_id }),
        );
    }

    let path_default = most_common(manifest.paths.iter().map(|p| (p.mode, p.user.clone(), p.group.clone())));
    info.doc.set(
        "target:path:default",
        "mode",
        json!({ "mode": path_default.0, "user": path_default.1, "group": path_default.2 }),
    );
    for path in &manifest.paths {
        let triple = (path.mode, path.user.clone(), path.group.clone());
        let mut entry = json!({});
        if triple != path_default {
            entry["mode"] = Value::from(path.mode);
            entry["user"] = json_opt(&path.user);
            entry["group"] = json_opt(&path.group);
        }
        info.doc.set("target:path", &path.name, entry);
    }

    let file_default = most_common(manifest.files.iter().map(|f| (f.mode, f.user.clone(), f.group.clone())));
    info.doc.set(
        "target:file:default",
        "mode",
        json!({ "mode": file_default.0, "user": file_default.1, "group": file_default.2 }),
    );
    for file in &manifest.files {
        let triple = (file.mode, file.user.clone(), file.group.clone());
        let mut entry = json!({
            "size": file.size,
            "timestamp": file.timestamp,
        });
        if triple != file_default {
            entry["mode"] = Value::from(file.mode);
            entry["user"] = json_opt(&file.user);
            entry["group"] = json_opt(&file.group);
        }
        if let Some(checksum) = &file.checksum_sha1 {
            entry["checksum"] = Value::from(hex::encode(checksum));
        }
        if let Some(page) = file.checksum_page {
            entry["checksum-page"] = Value::from(page);
        }
        if !file.checksum_page_error.is_empty() {
            entry["checksum-page-error"] = Value::from(file.checksum_page_error.clone());
        }
        if let Some(reference) = &file.reference {
            entry["reference"] = Value::from(reference.as_str());
        }
        if let Some(size_repo) = file.size_repo {
            entry["size-repo"] = Value::from(size_repo);
        }
        info.doc.set("target:file", &file.name, entry);
    }

    let link_default = most_common(manifest.links.iter().map(|l| (0, l.user.clone(), l.group.clone())));
    info.doc.set(
        "target:link:default",
        "owner",
        json!({ "user": link_default.1, "group": link_default.2 }),
    );
    for link in &manifest.links {
        let triple = (0u32, link.user.clone(), link.group.clone());
        let mut entry = json!({ "destination": link.destination });
        if triple != link_default {
            entry["user"] = json_opt(&link.user);
            entry["group"] = json_opt(&link.group);
        }
        info.doc.set("target:link", &link.name, entry);
    }

    info
}

fn json_opt(v: &Option<String>) -> Value {
    v.as_ref().map(|s| Value::from(s.as_str())).unwrap_or(Value::Null)
}

fn from_ini(info: InfoFile) -> Result<Manifest, Error> {
    let doc = &info.doc;
    let missing = |k: &str| Error::new(ErrorKind::FileInvalid, format!("manifest missing '{k}'"));

    let label = doc
        .get("backup", "backup-label")
        .and_then(|v| v.as_str())
        .ok_or_else(|| missing("backup-label"))?;
    let label = BackupLabel::parse(label)?;
    let prior_label = doc
        .get("backup", "backup-prior")
        .and_then(|v| v.as_str())
        .map(BackupLabel::parse)
        .transpose()?;
    let backup_type = match doc.get("backup", "backup-type").and_then(|v| v.as_str()) {
        Some("full") => BackupType::Full,
        Some("diff") => BackupType::Diff,
        Some("incr") => BackupType::Incr,
        _ => return Err(missing("backup-type")),
    };

    let data = ManifestData {
        label,
        prior_label,
        backup_type,
        timestamp_copy_start: doc.get("backup", "backup-timestamp-copy-start").and_then(|v| v.as_i64()).unwrap_or(0),
        timestamp_start: doc.get("backup", "backup-timestamp-start").and_then(|v| v.as_i64()).unwrap_or(0),
        timestamp_stop: doc.get("backup", "backup-timestamp-stop").and_then(|v| v.as_i64()).unwrap_or(0),
        pg_version: doc.get("backup", "db-version").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        pg_system_id: doc.get("backup", "db-system-id").and_then(|v| v.as_u64()).unwrap_or(0),
        pg_id: doc.get("backup", "backup-pg-id").and_then(|v| v.as_u64()).unwrap_or(1) as u32,
        option_compress: doc.get("backup:option", "option-compress").and_then(|v| v.as_bool()).unwrap_or(false),
        option_hardlink: doc.get("backup:option", "option-hardlink").and_then(|v| v.as_bool()).unwrap_or(false),
        option_online: doc.get("backup:option", "option-online").and_then(|v| v.as_bool()).unwrap_or(true),
        option_backup_standby: doc.get("backup:option", "option-backup-standby").and_then(|v| v.as_bool()).unwrap_or(false),
        option_checksum_page: doc.get("backup:option", "option-checksum-page").and_then(|v| v.as_bool()).unwrap_or(false),
        option_delta: doc.get("backup:option", "option-delta").and_then(|v| v.as_bool()).unwrap_or(false),
        archive_start: doc.get("backup", "backup-archive-start").and_then(|v| v.as_str()).map(String::from),
        archive_stop: doc.get("backup", "backup-archive-stop").and_then(|v| v.as_str()).map(String::from),
        lsn_start: doc.get("backup", "backup-lsn-start").and_then(|v| v.as_str()).map(String::from),
        lsn_stop: doc.get("backup", "backup-lsn-stop").and_then(|v| v.as_str()).map(String::from),
        backrest_version: doc.get("backup", "backrest-version").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        backrest_format: doc.get("backup", "backrest-format").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        cipher_sub_pass: doc.get("backup", "cipher-sub-pass").and_then(|v| v.as_str()).map(String::from),
    };

    let path_default = doc
        .section("target:path:default")
        .and_then(|e| e.iter().find(|(k, _)| k == "mode"))
        .map(|(_, v)| v.clone())
        .unwrap_or(json!({}));
    let mut paths = Vec::new();
    for (name, entry) in doc.section("target:path").unwrap_or(&[]) {
        paths.push(ManifestPath {
            name: name.clone(),
            mode: entry["mode"].as_u64().or(path_default["mode"].as_u64()).unwrap_or(0o750) as u32,
            user: entry["user"].as_str().or(path_default["user"].as_str()).map(String::from),
            group: entry["group"].as_str().or(path_default["group"].as_str()).map(String::from),
        });
    }

    let file_default = doc
        .section("target:file:default")
        .and_then(|e| e.iter().find(|(k, _)| k == "mode"))
        .map(|(_, v)| v.clone())
        .unwrap_or(json!({}));
    let mut files = Vec::new();
    for (name, entry) in doc.section("target:file").unwrap_or(&[]) {
        let checksum_sha1 = entry["checksum"].as_str().map(|s| {
            let bytes = hex::decode(s).unwrap_or_default();
            let mut arr = [0u8; 20];
            arr[..bytes.len().min(20)].copy_from_slice(&bytes[..bytes.len().min(20)]);
            arr
        });
        files.push(ManifestFile {
            name: name.clone(),
            size: entry["size"].as_u64().unwrap_or(0),
            size_repo: entry["size-repo"].as_u64(),
            timestamp: entry["timestamp"].as_i64().unwrap_or(0),
            mode: entry["mode"].as_u64().or(file_default["mode"].as_u64()).unwrap_or(0o640) as u32,
            user: entry["user"].as_str().or(file_default["user"].as_str()).map(String::from),
            group: entry["group"].as_str().or(file_default["group"].as_str()).map(String::from),
            checksum_sha1,
            checksum_page: entry["checksum-page"].as_bool(),
            checksum_page_error: entry["checksum-page-error"]
                .as_array()
                .map(|a| a.iter().filter_map(|v| v.as_u64().map(|n| n as u32)).collect())
                .unwrap_or_default(),
            reference: entry["reference"].as_str().map(BackupLabel::parse).transpose()?,
            primary: true,
        });
    }

    let link_default = doc
        .section("target:link:default")
        .and_then(|e| e.iter().find(|(k, _)| k == "owner"))
        .map(|(_, v)| v.clone())
        .unwrap_or(json!({}));
    let mut links = Vec::new();
    for (name, entry) in doc.section("target:link").unwrap_or(&[]) {
        links.push(ManifestLink {
            name: name.clone(),
            destination: entry["destination"].as_str().unwrap_or_default().to_string(),
            user: entry["user"].as_str().or(link_default["user"].as_str()).map(String::from),
            group: entry["group"].as_str().or(link_default["group"].as_str()).map(String::from),
        });
    }

    let mut targets = Vec::new();
    for (name, entry) in doc.section("backup:target").unwrap_or(&[]) {
        targets.push(ManifestTarget {
            name: name.clone(),
            target_type: if entry["type"].as_str() == Some("link") {
                TargetType::Link
            } else {
                TargetType::Path
            },
            path: entry["path"].as_str().map(String::from),
            file: entry["file"].as_str().map(String::from),
            tablespace_id: entry["tablespace-id"].as_u64().map(|v| v as u32),
            tablespace_name: entry["tablespace-name"].as_str().map(String::from),
        });
    }

    let mut db_list = Vec::new();
    for (name, entry) in doc.section("backup:db").unwrap_or(&[]) {
        db_list.push(crate::types::ManifestDb {
            name: name.clone(),
            id: entry["db-id"].as_u64().unwrap_or(0) as u32,
            last_system_id: entry["db-last-system-id"].as_u64().unwrap_or(0) as u32,
        });
    }

    let mut manifest = Manifest {
        data,
        paths,
        files,
        links,
        targets,
        db_list,
    };
    manifest.sort_all();
    Ok(manifest)
}

/// Saves the manifest through a streamed `FilterGroup`, optionally
/// carrying `CipherBlock(encrypt)` when `cipher_pass` (the archive info's
/// current-history pass, distinct from the manifest's own
/// `cipher_sub_pass`) is set, matching the streamed-save rule in §4.4.
pub fn save(
    manifest: &Manifest,
    storage: &dyn Storage,
    path: &str,
    cipher_pass: Option<&str>,
) -> Result<(), Error> {
    let mut info = to_ini(manifest);
    let plaintext = info.to_bytes()?;

    let bytes = match cipher_pass {
        Some(pass) => encrypt_bytes(&plaintext, pass)?,
        None => plaintext,
    };

    let mut writer = storage.write(path, WriteOptions::new())?;
    writer
        .write_all(&bytes)
        .map_err(|e| Error::from_io(ErrorKind::FileWrite, path, e))?;
    writer
        .flush()
        .map_err(|e| Error::from_io(ErrorKind::FileWrite, path, e))
}

pub fn load(storage: &dyn Storage, path: &str, cipher_pass: Option<&str>) -> Result<Manifest, Error> {
    let mut reader = storage
        .read(path, false, None, None)?
        .ok_or_else(|| Error::new(ErrorKind::FileMissing, path.to_string()))?;
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| Error::from_io(ErrorKind::FileRead, path, e))?;

    let plaintext = match cipher_pass {
        Some(pass) => decrypt_bytes(&bytes, pass)?,
        None => bytes,
    };

    let info = InfoFile::from_bytes(&plaintext, false)?;
    from_ini(info)
}

fn encrypt_bytes(data: &[u8], pass: &str) -> Result<Vec<u8>, Error> {
    let mut group = FilterGroup::new(vec![Box::new(CipherBlock::encrypt(pass.as_bytes().to_vec(), MessageDigest::sha1()))]);
    drive_filter_group(&mut group, data)
}

fn decrypt_bytes(data: &[u8], pass: &str) -> Result<Vec<u8>, Error> {
    let mut group = FilterGroup::new(vec![Box::new(CipherBlock::decrypt(pass.as_bytes().to_vec(), MessageDigest::sha1()))]);
    drive_filter_group(&mut group, data)
}

fn drive_filter_group(group: &mut FilterGroup, data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    let mut scratch = [0u8; 8192];
    let mut pos = 0;
    while pos < data.len() {
        let end = (pos + scratch.len()).min(data.len());
        let n = group
            .process(Some(&data[pos..end]), &mut scratch)
            .map_err(|e| Error::new(ErrorKind::Crypto, "cipher stream error").with_source(e))?;
        out.extend_from_slice(&scratch[..n]);
        pos = end;
    }
    while !group.done() {
        let n = group
            .process(None, &mut scratch)
            .map_err(|e| Error::new(ErrorKind::Crypto, "cipher stream error").with_source(e))?;
        out.extend_from_slice(&scratch[..n]);
        if n == 0 && group.done() {
            break;
        }
        if n == 0 {
            break;
        }
    }
    Ok(out)
}

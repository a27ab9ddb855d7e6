//! Step 10 of `cmd_backup`: the per-file copy pipeline. Grounded on
//! `pgbr-io`'s `FilterGroup` (component B) chaining `Size -> Hash(SHA-1) ->
//! [Gzip] -> [CipherBlock]`, with data-page checksum validation run as an
//! independent pass over the same source file since `PageChecksumFilter`
//! is a sink that reports its own typed result rather than a `dyn Filter`
//! stage that could sit in the same chain as the transformers.

use std::io::{Read, Write};

use openssl::hash::MessageDigest;

use pgbr_io::{CipherBlock, Filter, FilterGroup, FilterResult, Gzip, Hash, HashAlgorithm, PageChecksumFilter, PageChecksumResult, Size};
use pgbr_storage::{Storage, WriteOptions};
use pgbr_types::{Error, ErrorKind};

const CHUNK: usize = 64 * 1024;

pub struct CopyOutcome {
    pub size: u64,
    pub size_repo: u64,
    pub checksum_sha1: [u8; 20],
    pub checksum_page: Option<bool>,
    pub checksum_page_error: Vec<(u32, u32)>,
}

/// A relation file lives under `base/<dbid>/` or `global/` with a plain
/// numeric (optionally `.<segment>`/`_<fork>`-suffixed) name.
fn is_relation_file(name: &str) -> bool {
    if !(name.starts_with("base/") || name.starts_with("global/")) {
        return false;
    }
    let base = name.rsplit('/').next().unwrap_or(name);
    let digits = base.split(['.', '_']).next().unwrap_or(base);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

pub fn copy_file(
    pg_storage: &dyn Storage,
    repo_storage: &dyn Storage,
    repo_path: &str,
    manifest_name: &str,
    cipher_sub_pass: Option<&str>,
    compress: bool,
    validate_page_checksum: bool,
) -> Result<CopyOutcome, Error> {
    let page_result = if validate_page_checksum && is_relation_file(manifest_name) {
        Some(run_page_checksum(pg_storage, manifest_name)?)
    } else {
        None
    };

    let mut reader = pg_storage
        .read(manifest_name, false, None, None)?
        .ok_or_else(|| Error::new(ErrorKind::FileMissing, manifest_name.to_string()))?;

    let hash = Hash::new(HashAlgorithm::Sha1).map_err(|e| Error::new(ErrorKind::Crypto, "sha1 init failed").with_source(e))?;
    let mut filters: Vec<Box<dyn Filter>> = vec![Box::new(Size::new()), Box::new(hash)];
    if compress {
        filters.push(Box::new(Gzip::compress(6)));
    }
    if let Some(pass) = cipher_sub_pass {
        filters.push(Box::new(CipherBlock::encrypt(pass.as_bytes().to_vec(), MessageDigest::sha1())));
    }
    let mut group = FilterGroup::new(filters);

    let mut writer = repo_storage.write(repo_path, WriteOptions::new())?;
    let mut in_buf = [0u8; CHUNK];
    let mut out_buf = [0u8; CHUNK];

    loop {
        let n = reader
            .read(&mut in_buf)
            .map_err(|e| Error::from_io(ErrorKind::FileRead, manifest_name.to_string(), e))?;
        if n == 0 {
            flush_group(&mut group, &mut writer, &mut out_buf, repo_path)?;
            break;
        }
        let produced = group
            .process(Some(&in_buf[..n]), &mut out_buf)
            .map_err(|e| Error::from_io(ErrorKind::FileWrite, repo_path.to_string(), e))?;
        if produced > 0 {
            writer
                .write_all(&out_buf[..produced])
                .map_err(|e| Error::from_io(ErrorKind::FileWrite, repo_path.to_string(), e))?;
        }
    }
    writer
        .flush()
        .map_err(|e| Error::from_io(ErrorKind::FileWrite, repo_path.to_string(), e))?;

    let size = match group.result(0) {
        FilterResult::Size(s) => s,
        _ => 0,
    };
    let checksum_sha1 = match group.result(1) {
        FilterResult::Hash(hex_digest) => {
            let mut out = [0u8; 20];
            let decoded = hex::decode(&hex_digest).map_err(|e| Error::new(ErrorKind::Crypto, "bad sha1 hex").with_source(e))?;
            if decoded.len() != 20 {
                return Err(Error::new(ErrorKind::Crypto, "sha1 digest has the wrong length"));
            }
            out.copy_from_slice(&decoded);
            out
        }
        _ => return Err(Error::new(ErrorKind::Assert, "hash filter produced no result")),
    };

    let size_repo = repo_storage.info(repo_path, false)?.map(|info| info.size).unwrap_or(size);

    Ok(CopyOutcome {
        size,
        size_repo,
        checksum_sha1,
        checksum_page: page_result.as_ref().map(|r| r.valid),
        checksum_page_error: page_result.map(|r| r.error_ranges).unwrap_or_default(),
    })
}

fn flush_group(group: &mut FilterGroup, writer: &mut dyn Write, out_buf: &mut [u8], repo_path: &str) -> Result<(), Error> {
    loop {
        let produced = group
            .process(None, out_buf)
            .map_err(|e| Error::from_io(ErrorKind::FileWrite, repo_path.to_string(), e))?;
        if produced > 0 {
            writer
                .write_all(&out_buf[..produced])
                .map_err(|e| Error::from_io(ErrorKind::FileWrite, repo_path.to_string(), e))?;
        }
        if group.done() || produced == 0 {
            return Ok(());
        }
    }
}

fn run_page_checksum(storage: &dyn Storage, name: &str) -> Result<PageChecksumResult, Error> {
    let mut reader = storage
        .read(name, false, None, None)?
        .ok_or_else(|| Error::new(ErrorKind::FileMissing, name.to_string()))?;
    let mut filter = PageChecksumFilter::new();
    let mut buf = [0u8; CHUNK];
    loop {
        let n = reader.read(&mut buf).map_err(|e| Error::from_io(ErrorKind::FileRead, name.to_string(), e))?;
        if n == 0 {
            filter
                .process_in(None)
                .map_err(|e| Error::new(ErrorKind::FileRead, name.to_string()).with_source(e))?;
            break;
        }
        filter
            .process_in(Some(&buf[..n]))
            .map_err(|e| Error::new(ErrorKind::FileRead, name.to_string()).with_source(e))?;
    }
    Ok(filter.into_result())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgbr_storage::PosixStorage;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn tempdir() -> std::path::PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("pgbr-backup-copy-test-{}-{n}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn copies_a_plain_file_and_reports_size_and_checksum() {
        let src_dir = tempdir();
        let dst_dir = tempdir();
        std::fs::write(src_dir.join("PG_VERSION"), b"15\n").unwrap();

        let src = PosixStorage::new(&src_dir);
        let dst = PosixStorage::new(&dst_dir);

        let outcome = copy_file(&src, &dst, "out/PG_VERSION", "PG_VERSION", None, false, false).unwrap();
        assert_eq!(outcome.size, 3);
        assert!(outcome.checksum_page.is_none());

        let written = std::fs::read(dst_dir.join("out/PG_VERSION")).unwrap();
        assert_eq!(written, b"15\n");

        std::fs::remove_dir_all(src_dir).ok();
        std::fs::remove_dir_all(dst_dir).ok();
    }

    #[test]
    fn relation_file_classification_follows_directory_and_name() {
        assert!(is_relation_file("base/16384/16385"));
        assert!(is_relation_file("base/16384/16385.1"));
        assert!(is_relation_file("global/1262"));
        assert!(!is_relation_file("base/16384/PG_VERSION"));
        assert!(!is_relation_file("pg_wal/000000010000000000000001"));
    }
}

//! Step 11 of `cmd_restore`: the per-file restore pipeline, the mirror
//! image of `pgbr-backup::copy::copy_file` with the chain built in the
//! opposite direction: `[CipherBlock::decrypt] -> [Gzip::decompress] ->
//! Hash -> Size`, reading repository bytes in and writing plaintext out.

use std::io::{Read, Write};

use openssl::hash::MessageDigest;
use regex::Regex;

use pgbr_io::{CipherBlock, Filter, FilterGroup, FilterResult, Gzip, Hash, HashAlgorithm, Size};
use pgbr_manifest::ManifestFile;
use pgbr_storage::{Storage, WriteOptions};
use pgbr_types::{Error, ErrorKind};

const CHUNK: usize = 64 * 1024;

pub struct RestoreOutcome {
    pub size: u64,
    pub checksum_sha1: [u8; 20],
}

/// Writes `file.size` zero bytes to `dest_path`, used instead of
/// [`restore_file`] when the file falls under a selective-restore
/// exclusion. The server-side catalog entry still has to exist with the
/// right size for the cluster to boot, even though its content is
/// meaningless.
pub fn zero_fill(dest_storage: &dyn Storage, dest_path: &str, file: &ManifestFile) -> Result<(), Error> {
    let write_opts = WriteOptions {
        mode: Some(file.mode),
        ..WriteOptions::new()
    };
    let mut writer = dest_storage.write(dest_path, write_opts)?;
    let zeros = [0u8; CHUNK];
    let mut remaining = file.size;
    while remaining > 0 {
        let take = remaining.min(CHUNK as u64) as usize;
        writer
            .write_all(&zeros[..take])
            .map_err(|e| Error::from_io(ErrorKind::FileWrite, dest_path.to_string(), e))?;
        remaining -= take as u64;
    }
    writer
        .flush()
        .map_err(|e| Error::from_io(ErrorKind::FileWrite, dest_path.to_string(), e))?;
    Ok(())
}

/// Reads one repository object back, running it through decrypt/decompress
/// while tallying plaintext size and SHA-1, and writes the result to
/// `dest_path`.
pub fn restore_file(
    repo_storage: &dyn Storage,
    dest_storage: &dyn Storage,
    repo_path: &str,
    dest_path: &str,
    file: &ManifestFile,
    cipher_sub_pass: Option<&str>,
    compressed: bool,
) -> Result<RestoreOutcome, Error> {
    let mut reader = repo_storage
        .read(repo_path, false, None, None)?
        .ok_or_else(|| Error::new(ErrorKind::FileMissing, repo_path.to_string()))?;

    let mut filters: Vec<Box<dyn Filter>> = Vec::new();
    if let Some(pass) = cipher_sub_pass {
        filters.push(Box::new(CipherBlock::decrypt(pass.as_bytes().to_vec(), MessageDigest::sha1())));
    }
    if compressed {
        filters.push(Box::new(Gzip::decompress()));
    }
    let hash = Hash::new(HashAlgorithm::Sha1).map_err(|e| Error::new(ErrorKind::Crypto, "sha1 init failed").with_source(e))?;
    filters.push(Box::new(hash));
    filters.push(Box::new(Size::new()));
    let size_index = filters.len() - 1;
    let hash_index = size_index - 1;
    let mut group = FilterGroup::new(filters);

    let write_opts = WriteOptions {
        mode: Some(file.mode),
        ..WriteOptions::new()
    };
    let mut writer = dest_storage.write(dest_path, write_opts)?;
    let mut in_buf = [0u8; CHUNK];
    let mut out_buf = [0u8; CHUNK];

    loop {
        let n = reader
            .read(&mut in_buf)
            .map_err(|e| Error::from_io(ErrorKind::FileRead, repo_path.to_string(), e))?;
        if n == 0 {
            flush_group(&mut group, &mut writer, &mut out_buf, dest_path)?;
            break;
        }
        let produced = group
            .process(Some(&in_buf[..n]), &mut out_buf)
            .map_err(|e| Error::from_io(ErrorKind::FileRead, repo_path.to_string(), e))?;
        if produced > 0 {
            writer
                .write_all(&out_buf[..produced])
                .map_err(|e| Error::from_io(ErrorKind::FileWrite, dest_path.to_string(), e))?;
        }
    }
    writer
        .flush()
        .map_err(|e| Error::from_io(ErrorKind::FileWrite, dest_path.to_string(), e))?;

    let size = match group.result(size_index) {
        FilterResult::Size(s) => s,
        _ => 0,
    };
    let checksum_sha1 = match group.result(hash_index) {
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

    Ok(RestoreOutcome { size, checksum_sha1 })
}

fn flush_group(group: &mut FilterGroup, writer: &mut dyn Write, out_buf: &mut [u8], dest_path: &str) -> Result<(), Error> {
    loop {
        let produced = group
            .process(None, out_buf)
            .map_err(|e| Error::from_io(ErrorKind::FileWrite, dest_path.to_string(), e))?;
        if produced > 0 {
            writer
                .write_all(&out_buf[..produced])
                .map_err(|e| Error::from_io(ErrorKind::FileWrite, dest_path.to_string(), e))?;
        }
        if group.done() || produced == 0 {
            return Ok(());
        }
    }
}

/// Delta skip: a destination file is left alone if its existing content
/// already hashes to the manifest's recorded checksum.
pub fn delta_skip(dest_storage: &dyn Storage, dest_path: &str, file: &ManifestFile) -> Result<bool, Error> {
    let Some(expected) = file.checksum_sha1 else {
        return Ok(false);
    };
    let Some(mut reader) = dest_storage.read(dest_path, true, None, None)? else {
        return Ok(false);
    };
    let hash = Hash::new(HashAlgorithm::Sha1).map_err(|e| Error::new(ErrorKind::Crypto, "sha1 init failed").with_source(e))?;
    let mut group = FilterGroup::new(vec![Box::new(hash)]);
    let mut in_buf = [0u8; CHUNK];
    let mut out_buf = [0u8; CHUNK];
    loop {
        let n = reader
            .read(&mut in_buf)
            .map_err(|e| Error::from_io(ErrorKind::FileRead, dest_path.to_string(), e))?;
        if n == 0 {
            while !group.done() {
                if group.process(None, &mut out_buf).map_err(|e| Error::from_io(ErrorKind::FileRead, dest_path.to_string(), e))? == 0
                    && group.done()
                {
                    break;
                }
            }
            break;
        }
        group
            .process(Some(&in_buf[..n]), &mut out_buf)
            .map_err(|e| Error::from_io(ErrorKind::FileRead, dest_path.to_string(), e))?;
    }
    match group.result(0) {
        FilterResult::Hash(hex_digest) => Ok(hex_digest == hex::encode(expected)),
        _ => Ok(false),
    }
}

/// Force skip (without delta): a destination file is left alone if its
/// size and mtime already match the manifest, without paying for a
/// checksum pass.
pub fn force_skip(dest_storage: &dyn Storage, dest_path: &str, file: &ManifestFile) -> Result<bool, Error> {
    match dest_storage.info(dest_path, false)? {
        Some(info) => Ok(info.size == file.size && info.mtime == file.timestamp),
        None => Ok(false),
    }
}

/// Matches a manifest file's name against the selective-restore exclusion
/// regex (see `selective::selective_restore_regex`).
pub fn is_selectively_excluded(name: &str, regex: Option<&Regex>) -> bool {
    regex.map(|re| re.is_match(name)).unwrap_or(false)
}

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::PathBuf;

use pgbr_tools::fs::fsync_dir;
use pgbr_types::{Error, ErrorKind};
use regex::Regex;

use crate::{
    join, BoxRead, BoxWrite, Feature, FileInfo, FileType, SortOrder, Storage, WalkEntry,
    WriteOptions,
};

/// Local filesystem backend. All operations; atomic writes go through a
/// `<path>.tmp` sibling renamed into place on close, mirroring the
/// temp-then-rename idiom used throughout the teacher for durable blob
/// writes (`pbs-datastore::chunk_store`, `data_blob_writer`).
pub struct PosixStorage {
    base: PathBuf,
}

impl PosixStorage {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn full(&self, path: &str) -> PathBuf {
        join(&self.base, path)
    }
}

fn file_type_of(meta: &fs::Metadata) -> FileType {
    if meta.is_dir() {
        FileType::Path
    } else if meta.file_type().is_symlink() {
        FileType::Link
    } else if meta.is_file() {
        FileType::File
    } else {
        FileType::Special
    }
}

fn info_from_metadata(meta: fs::Metadata, link_target: Option<String>) -> FileInfo {
    FileInfo {
        file_type: file_type_of(&meta),
        size: meta.size(),
        mtime: meta.mtime(),
        mode: meta.mode() & 0o7777,
        user: users_lookup::user_name(meta.uid()),
        group: users_lookup::group_name(meta.gid()),
        link_target,
    }
}

/// Minimal uid/gid -> name resolution without pulling in a new dependency;
/// falls back to `None` (storage never errors for this, per §4.1).
mod users_lookup {
    pub fn user_name(uid: u32) -> Option<String> {
        nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid))
            .ok()
            .flatten()
            .map(|u| u.name)
    }

    pub fn group_name(gid: u32) -> Option<String> {
        nix::unistd::Group::from_gid(nix::unistd::Gid::from_raw(gid))
            .ok()
            .flatten()
            .map(|g| g.name)
    }
}

impl Storage for PosixStorage {
    fn info(&self, path: &str, follow_link: bool) -> Result<Option<FileInfo>, Error> {
        let full = self.full(path);
        let meta = if follow_link {
            fs::metadata(&full)
        } else {
            fs::symlink_metadata(&full)
        };
        let meta = match meta {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::from_io(ErrorKind::FileOpen, format!("stat {path}"), e)),
        };
        let link_target = if meta.file_type().is_symlink() {
            fs::read_link(&full)
                .ok()
                .map(|p| p.to_string_lossy().into_owned())
        } else {
            None
        };
        Ok(Some(info_from_metadata(meta, link_target)))
    }

    fn list(&self, path: &str, expression: Option<&str>) -> Result<Vec<String>, Error> {
        let full = self.full(path);
        let re = expression
            .map(|e| Regex::new(&format!("^(?:{e})$")))
            .transpose()
            .map_err(|e| Error::new(ErrorKind::Format, "invalid list expression").with_source(e))?;
        let mut out = Vec::new();
        let rd = match fs::read_dir(&full) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::from_io(ErrorKind::PathOpen, format!("list {path}"), e)),
        };
        for entry in rd {
            let entry =
                entry.map_err(|e| Error::from_io(ErrorKind::PathOpen, format!("list {path}"), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if re.as_ref().map(|r| r.is_match(&name)).unwrap_or(true) {
                out.push(name);
            }
        }
        Ok(out)
    }

    fn list_info(
        &self,
        path: &str,
        recurse: bool,
        sort_order: SortOrder,
        callback: &mut dyn FnMut(WalkEntry) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let mut names = self.list(path, None)?;
        match sort_order {
            SortOrder::None => {}
            SortOrder::Ascending => names.sort(),
            SortOrder::Descending => {
                names.sort();
                names.reverse();
            }
        }
        for name in names {
            let child = if path.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", path.trim_end_matches('/'), name)
            };
            if let Some(info) = self.info(&child, false)? {
                let is_dir = info.file_type == FileType::Path;
                callback(WalkEntry {
                    path: child.clone(),
                    info,
                })?;
                if recurse && is_dir {
                    self.list_info(&child, recurse, sort_order, callback)?;
                }
            }
        }
        Ok(())
    }

    fn read(
        &self,
        path: &str,
        ignore_missing: bool,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Option<BoxRead>, Error> {
        let full = self.full(path);
        let mut file = match File::open(&full) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if ignore_missing {
                    return Ok(None);
                }
                return Err(Error::new(ErrorKind::FileMissing, path.to_string()));
            }
            Err(e) => return Err(Error::from_io(ErrorKind::FileOpen, format!("open {path}"), e)),
        };
        if let Some(offset) = offset {
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| Error::from_io(ErrorKind::FileRead, format!("seek {path}"), e))?;
        }
        let reader: BoxRead = match limit {
            Some(limit) => Box::new(file.take(limit)),
            None => Box::new(file),
        };
        Ok(Some(reader))
    }

    fn write(&self, path: &str, opts: WriteOptions) -> Result<BoxWrite, Error> {
        let full = self.full(path);
        if opts.create_path {
            if let Some(parent) = full.parent() {
                pgbr_tools::fs::create_path_all(parent, 0o750)?;
            }
        }
        let mode = opts.mode.unwrap_or(0o640);
        if opts.atomic {
            let tmp = PathBuf::from(format!("{}.tmp", full.display()));
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(mode)
                .open(&tmp)
                .map_err(|e| Error::from_io(ErrorKind::FileWrite, format!("create {path}.tmp"), e))?;
            Ok(Box::new(AtomicWriter {
                tmp,
                target: full,
                file: Some(file),
                sync_path: !opts.no_sync_path,
            }))
        } else {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(mode)
                .open(&full)
                .map_err(|e| Error::from_io(ErrorKind::FileWrite, format!("create {path}"), e))?;
            Ok(Box::new(file))
        }
    }

    fn remove(&self, path: &str, recurse: bool) -> Result<(), Error> {
        let full = self.full(path);
        let meta = match fs::symlink_metadata(&full) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::from_io(ErrorKind::PathOpen, format!("remove {path}"), e)),
        };
        if meta.is_dir() {
            if recurse {
                fs::remove_dir_all(&full)
                    .map_err(|e| Error::from_io(ErrorKind::PathOpen, format!("remove {path}"), e))?;
            } else {
                fs::remove_dir(&full).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::Other || e.raw_os_error() == Some(libc::ENOTEMPTY)
                    {
                        Error::new(ErrorKind::PathNotEmpty, path.to_string())
                    } else {
                        Error::from_io(ErrorKind::PathOpen, format!("remove {path}"), e)
                    }
                })?;
            }
        } else {
            fs::remove_file(&full)
                .map_err(|e| Error::from_io(ErrorKind::FileWrite, format!("remove {path}"), e))?;
        }
        Ok(())
    }

    fn link_create(&self, path: &str, destination: &str) -> Result<(), Error> {
        let full = self.full(path);
        std::os::unix::fs::symlink(destination, &full)
            .map_err(|e| Error::from_io(ErrorKind::PathCreate, format!("symlink {path}"), e))
    }

    fn path_create(
        &self,
        path: &str,
        mode: Option<u32>,
        no_parent_create: bool,
        error_on_exists: bool,
    ) -> Result<(), Error> {
        let full = self.full(path);
        let mode = mode.unwrap_or(0o750);
        if no_parent_create {
            match fs::create_dir(&full) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && !error_on_exists => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    return Err(Error::new(ErrorKind::PathCreate, format!("{path} already exists")))
                }
                Err(e) => {
                    return Err(Error::from_io(ErrorKind::PathCreate, format!("mkdir {path}"), e))
                }
            }
        } else {
            pgbr_tools::fs::create_path_all(&full, mode)?;
        }
        let _ = fs::set_permissions(&full, fs::Permissions::from_mode(mode));
        Ok(())
    }

    fn path_sync(&self, path: &str) -> Result<(), Error> {
        fsync_dir(&self.full(path))
    }

    fn feature(&self, flag: Feature) -> bool {
        matches!(
            flag,
            Feature::HardLink | Feature::Path | Feature::Link | Feature::Compress | Feature::Owner
        )
    }
}

/// Writer that buffers into `<path>.tmp` and renames into place on
/// `flush`-triggered close (via `Drop` on error, or explicit finish on the
/// happy path through `Write::flush` + rename below).
struct AtomicWriter {
    tmp: PathBuf,
    target: PathBuf,
    file: Option<File>,
    sync_path: bool,
}

impl std::io::Write for AtomicWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.as_mut().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.as_mut().unwrap().flush()?;
        if let Some(file) = self.file.take() {
            drop(file);
            fs::rename(&self.tmp, &self.target)?;
            if self.sync_path {
                if let Some(parent) = self.target.parent() {
                    let _ = fsync_dir(parent);
                }
            }
        }
        Ok(())
    }
}

impl Drop for AtomicWriter {
    fn drop(&mut self) {
        if self.file.is_some() {
            // flush() was never called: treat as a failed write and drop
            // the temp file rather than leave a half-written file visible
            // under the final path (storage-atomicity property, spec §8.6).
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

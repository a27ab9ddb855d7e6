//! Storage abstraction (component A): uniform read/write/list/stat/remove
//! over local POSIX filesystems, S3-compatible object stores and a remote
//! agent. Grounded on `pbs-datastore::chunk_store::ChunkStore` for the
//! POSIX path/ownership conventions and on `remote_storage` (seen in the
//! retrieval pack's `william-lbn-neon` repository) for the S3 key-space
//! model, generalized per Design Note §9's capability-set framing.

mod posix;
mod remote;
mod s3;

pub use posix::PosixStorage;
pub use remote::RemoteStorage;
pub use s3::S3Storage;

use std::io::{Read, Write};
use std::path::Path;

use pgbr_types::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Path,
    Link,
    Special,
}

#[derive(Debug, Clone)]
pub struct FileInfo {
    pub file_type: FileType,
    pub size: u64,
    pub mtime: i64,
    pub mode: u32,
    pub user: Option<String>,
    pub group: Option<String>,
    pub link_target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    HardLink,
    Path,
    Link,
    Compress,
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    None,
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub mode: Option<u32>,
    pub atomic: bool,
    pub create_path: bool,
    pub no_sync_path: bool,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self {
            mode: None,
            atomic: true,
            create_path: false,
            no_sync_path: false,
        }
    }
}

pub type BoxRead = Box<dyn Read + Send>;
pub type BoxWrite = Box<dyn Write + Send>;

/// One entry yielded by `list_info`'s recursive walk.
pub struct WalkEntry {
    pub path: String,
    pub info: FileInfo,
}

/// Uniform storage capability. Implemented by `PosixStorage`, `S3Storage`
/// and `RemoteStorage`; callers hold a `&dyn Storage` and never special-case
/// a backend directly.
pub trait Storage: Send + Sync {
    /// `None` if missing; storage never errors for a missing path.
    fn info(&self, path: &str, follow_link: bool) -> Result<Option<FileInfo>, Error>;

    /// Direct children of `path`, optionally filtered by an anchored
    /// regex. Order is implementation-defined.
    fn list(&self, path: &str, expression: Option<&str>) -> Result<Vec<String>, Error>;

    /// Depth-first walk of `path`, invoking `callback` per entry.
    fn list_info(
        &self,
        path: &str,
        recurse: bool,
        sort_order: SortOrder,
        callback: &mut dyn FnMut(WalkEntry) -> Result<(), Error>,
    ) -> Result<(), Error>;

    fn read(
        &self,
        path: &str,
        ignore_missing: bool,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Option<BoxRead>, Error>;

    fn write(&self, path: &str, opts: WriteOptions) -> Result<BoxWrite, Error>;

    fn copy(&self, src: &str, dst: &str) -> Result<u64, Error> {
        let mut reader = self
            .read(src, false, None, None)?
            .ok_or_else(|| pgbr_types::Error::new(pgbr_types::ErrorKind::FileMissing, src))?;
        let mut writer = self.write(dst, WriteOptions::new())?;
        let n = std::io::copy(&mut reader, &mut writer)
            .map_err(|e| pgbr_types::Error::from_io(pgbr_types::ErrorKind::FileWrite, dst, e))?;
        writer
            .flush()
            .map_err(|e| pgbr_types::Error::from_io(pgbr_types::ErrorKind::FileWrite, dst, e))?;
        Ok(n)
    }

    fn remove(&self, path: &str, recurse: bool) -> Result<(), Error>;

    /// Creates a symlink at `path` pointing at `destination`. Backends
    /// without a real link primitive (`feature(Feature::Link)` false)
    /// return an error; callers check the feature flag first.
    fn link_create(&self, path: &str, destination: &str) -> Result<(), Error> {
        let _ = destination;
        Err(pgbr_types::Error::new(
            pgbr_types::ErrorKind::PathCreate,
            format!("backend does not support creating links ({path})"),
        ))
    }

    fn path_create(
        &self,
        path: &str,
        mode: Option<u32>,
        no_parent_create: bool,
        error_on_exists: bool,
    ) -> Result<(), Error>;

    fn path_sync(&self, path: &str) -> Result<(), Error>;

    fn exists(&self, path: &str) -> Result<bool, Error> {
        Ok(self.info(path, false)?.is_some())
    }

    fn path_exists(&self, path: &str) -> Result<bool, Error> {
        Ok(matches!(
            self.info(path, false)?,
            Some(FileInfo {
                file_type: FileType::Path,
                ..
            })
        ))
    }

    fn feature(&self, flag: Feature) -> bool;
}

pub(crate) fn join(base: &Path, rel: &str) -> std::path::PathBuf {
    base.join(rel.trim_start_matches('/'))
}

//! S3-compatible object-store backend.
//!
//! The HTTP/SigV4 transport is pulled behind a small `S3Backend` trait
//! (`put_object`/`get_object`/`list_objects`/`delete_object`/`head_object`)
//! rather than depending on the full `aws-sdk-s3` stack, which the teacher
//! never depends on and which would dwarf this core for one backend.
//! `remote_storage` in the retrieval pack's `william-lbn-neon` repository
//! models the same "flat key space, synthetic directories" semantics this
//! module follows; a real HTTP-backed `S3Backend` implementation is wiring
//! work for the CLI edge, out of scope for the core per spec §1's treatment
//! of transport concerns as external collaborators.

use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};

use pgbr_types::{Error, ErrorKind};

use crate::{BoxRead, BoxWrite, Feature, FileInfo, FileType, SortOrder, Storage, WalkEntry, WriteOptions};

#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub size: u64,
    pub mtime: i64,
}

/// Transport seam for the S3 backend. A production implementation signs
/// and sends real HTTP requests; tests use an in-memory implementation.
pub trait S3Backend: Send + Sync {
    fn put_object(&self, key: &str, data: Vec<u8>) -> Result<(), Error>;
    fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, Error>;
    fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>, Error>;
    fn list_objects(&self, prefix: &str) -> Result<Vec<(String, ObjectMeta)>, Error>;
    fn delete_object(&self, key: &str) -> Result<(), Error>;
    fn delete_prefix(&self, prefix: &str) -> Result<(), Error>;
}

pub struct S3Storage {
    backend: Arc<dyn S3Backend>,
}

impl S3Storage {
    pub fn new(backend: impl S3Backend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    fn key(path: &str) -> String {
        path.trim_start_matches('/').to_string()
    }
}

impl Storage for S3Storage {
    fn info(&self, path: &str, _follow_link: bool) -> Result<Option<FileInfo>, Error> {
        let key = Self::key(path);
        if let Some(meta) = self.backend.head_object(&key)? {
            return Ok(Some(FileInfo {
                file_type: FileType::File,
                size: meta.size,
                mtime: meta.mtime,
                mode: 0o640,
                user: None,
                group: None,
                link_target: None,
            }));
        }
        // Path existence is synthetic: a path "exists" iff some object
        // begins with "<path>/".
        let dir_prefix = format!("{}/", key.trim_end_matches('/'));
        if !self.backend.list_objects(&dir_prefix)?.is_empty() {
            return Ok(Some(FileInfo {
                file_type: FileType::Path,
                size: 0,
                mtime: 0,
                mode: 0o750,
                user: None,
                group: None,
                link_target: None,
            }));
        }
        Ok(None)
    }

    fn list(&self, path: &str, expression: Option<&str>) -> Result<Vec<String>, Error> {
        let prefix = format!("{}/", Self::key(path).trim_end_matches('/'));
        let re = expression
            .map(regex::Regex::new)
            .transpose()
            .map_err(|e| Error::new(ErrorKind::Format, "invalid list expression").with_source(e))?;
        let mut seen = std::collections::BTreeSet::new();
        for (key, _) in self.backend.list_objects(&prefix)? {
            let rest = &key[prefix.len()..];
            let child = rest.split('/').next().unwrap_or(rest);
            if child.is_empty() {
                continue;
            }
            if re.as_ref().map(|r| r.is_match(child)).unwrap_or(true) {
                seen.insert(child.to_string());
            }
        }
        Ok(seen.into_iter().collect())
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
                name
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
        let key = Self::key(path);
        let data = match self.backend.get_object(&key)? {
            Some(d) => d,
            None => {
                if ignore_missing {
                    return Ok(None);
                }
                return Err(Error::new(ErrorKind::FileMissing, path.to_string()));
            }
        };
        let start = offset.unwrap_or(0) as usize;
        let data = data.get(start..).unwrap_or(&[]).to_vec();
        let reader: BoxRead = match limit {
            Some(limit) => Box::new(Cursor::new(data).take(limit)),
            None => Box::new(Cursor::new(data)),
        };
        Ok(Some(reader))
    }

    fn write(&self, path: &str, _opts: WriteOptions) -> Result<BoxWrite, Error> {
        Ok(Box::new(S3Writer {
            backend: Arc::clone(&self.backend),
            key: Self::key(path),
            buf: Vec::new(),
            committed: false,
        }))
    }

    fn remove(&self, path: &str, recurse: bool) -> Result<(), Error> {
        let key = Self::key(path);
        if recurse {
            self.backend.delete_prefix(&format!("{key}/"))?;
        }
        self.backend.delete_object(&key)
    }

    fn path_create(
        &self,
        _path: &str,
        _mode: Option<u32>,
        _no_parent_create: bool,
        _error_on_exists: bool,
    ) -> Result<(), Error> {
        // Synthetic: a path exists once an object is written under it.
        Ok(())
    }

    fn path_sync(&self, _path: &str) -> Result<(), Error> {
        // No-op: S3 writes commit on multipart-complete (spec §5).
        Ok(())
    }

    fn feature(&self, flag: Feature) -> bool {
        matches!(flag, Feature::Path | Feature::Compress)
    }
}

/// Buffers the whole object in memory and commits with one `put_object` on
/// flush; a real multipart implementation would flush above a threshold
/// instead of buffering the whole object, left as wiring work at the
/// transport seam (see module docs).
struct S3Writer {
    backend: Arc<dyn S3Backend>,
    key: String,
    buf: Vec<u8>,
    committed: bool,
}

impl std::io::Write for S3Writer {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if self.committed {
            return Ok(());
        }
        self.backend
            .put_object(&self.key, std::mem::take(&mut self.buf))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        self.committed = true;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) struct MemoryS3Backend {
    objects: Mutex<std::collections::BTreeMap<String, Vec<u8>>>,
}

#[cfg(test)]
impl MemoryS3Backend {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(Default::default()),
        }
    }
}

#[cfg(test)]
impl S3Backend for MemoryS3Backend {
    fn put_object(&self, key: &str, data: Vec<u8>) -> Result<(), Error> {
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    fn head_object(&self, key: &str) -> Result<Option<ObjectMeta>, Error> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .map(|d| ObjectMeta { size: d.len() as u64, mtime: 0 }))
    }

    fn list_objects(&self, prefix: &str) -> Result<Vec<(String, ObjectMeta)>, Error> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, d)| (k.clone(), ObjectMeta { size: d.len() as u64, mtime: 0 }))
            .collect())
    }

    fn delete_object(&self, key: &str) -> Result<(), Error> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<(), Error> {
        self.objects.lock().unwrap().retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_path_existence() {
        let backend = MemoryS3Backend::new();
        backend.put_object("stanza/backup/L1/file", b"x".to_vec()).unwrap();
        let storage = S3Storage::new(backend);
        assert!(storage.path_exists("stanza/backup/L1").unwrap());
        assert!(!storage.path_exists("stanza/backup/L2").unwrap());
    }

    #[test]
    fn write_then_read_round_trips() {
        let backend = MemoryS3Backend::new();
        backend.put_object("a/b", b"hello".to_vec()).unwrap();
        let storage = S3Storage::new(backend);
        let mut r = storage.read("a/b", false, None, None).unwrap().unwrap();
        let mut out = String::new();
        r.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
    }
}

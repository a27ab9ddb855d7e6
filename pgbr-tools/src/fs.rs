//! POSIX ownership/mode helpers shared by the storage and lock crates.
//!
//! Grounded on `proxmox_sys::fs::CreateOptions` as used throughout
//! `pbs-datastore::chunk_store` (owner/group/mode bundled into one value
//! passed to path/file creation) and on the directory-fsync idiom used by
//! the teacher wherever a rename must be made durable.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use nix::unistd::{Gid, Uid};
use pgbr_types::{Error, ErrorKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    pub owner: Option<Uid>,
    pub group: Option<Gid>,
    pub mode: Option<u32>,
}

impl CreateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(mut self, uid: Uid) -> Self {
        self.owner = Some(uid);
        self
    }

    pub fn group(mut self, gid: Gid) -> Self {
        self.group = Some(gid);
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn apply(&self, path: &Path) -> Result<(), Error> {
        if self.owner.is_some() || self.group.is_some() {
            nix::unistd::chown(path, self.owner, self.group).map_err(|e| {
                Error::new(ErrorKind::FileOwner, format!("chown {path:?} failed")).with_source(e)
            })?;
        }
        if let Some(mode) = self.mode {
            let perm = std::fs::Permissions::from_mode(mode);
            std::fs::set_permissions(path, perm).map_err(|e| {
                Error::from_io(ErrorKind::FileOwner, format!("chmod {path:?} failed"), e)
            })?;
        }
        Ok(())
    }
}

use std::os::unix::fs::PermissionsExt;

/// fsync the directory `path` so a preceding rename/create inside it
/// becomes durable, mirroring the teacher's dirfd-fsync pattern used after
/// atomic renames.
pub fn fsync_dir(path: &Path) -> Result<(), Error> {
    let dir = File::open(path)
        .map_err(|e| Error::from_io(ErrorKind::PathOpen, format!("open dir {path:?}"), e))?;
    nix::unistd::fsync(dir.as_raw_fd())
        .map_err(|e| Error::new(ErrorKind::PathOpen, format!("fsync dir {path:?} failed")).with_source(e))
}

/// Ensure every component of `path` exists, creating missing directories
/// with `mode`. Unlike `std::fs::create_dir_all` this tolerates the path
/// already existing as a directory without error (needed for idempotent
/// resume/restore path creation).
pub fn create_path_all(path: &Path, mode: u32) -> Result<(), Error> {
    let mut built = std::path::PathBuf::new();
    for component in path.components() {
        built.push(component);
        match std::fs::create_dir(&built) {
            Ok(()) => {
                let perm = std::fs::Permissions::from_mode(mode);
                let _ = std::fs::set_permissions(&built, perm);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                return Err(Error::from_io(
                    ErrorKind::PathCreate,
                    format!("create path {built:?}"),
                    e,
                ))
            }
        }
    }
    Ok(())
}

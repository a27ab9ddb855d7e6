//! Stanza lock manager (component I): advisory `flock`-based exclusion on
//! well-known paths under `lock_path`, plus the stop-file interlock that
//! `cmd_stop`/`cmd_start` manage. Grounded on the teacher's
//! `tools::lock_file`/`tools::open_file_locked` (`src/tools.rs`), which
//! wrap `nix::fcntl::flock` with an optional timeout around a plain
//! `OpenOptions` file handle; generalized here to the archive/backup lock
//! pair and non-blocking acquisition the spec calls for.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{flock, FlockArg};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use pgbr_types::{Error, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Archive,
    Backup,
    All,
}

impl LockType {
    fn names(self) -> &'static [&'static str] {
        match self {
            LockType::Archive => &["archive"],
            LockType::Backup => &["backup"],
            LockType::All => &["archive", "backup"],
        }
    }
}

fn lock_path_for(lock_path: &Path, stanza: &str, name: &str) -> PathBuf {
    lock_path.join(format!("{stanza}-{name}.lock"))
}

/// Holds one or both of a stanza's lock files for the guard's lifetime.
/// Dropping releases the `flock` and truncates the file but never unlinks
/// it, matching the spec's "release truncates but does not unlink" rule:
/// the file stays in place so a concurrent `cmd_stop` can still find it.
#[derive(Debug)]
pub struct LockGuard {
    files: Vec<File>,
}

/// Acquires `lock_type` for `stanza`, writing this process's PID into each
/// lock file on success. Non-blocking: any contention raises
/// `ErrorKind::LockAcquire` immediately rather than waiting.
pub fn acquire(lock_path: &Path, stanza: &str, lock_type: LockType) -> Result<LockGuard, Error> {
    let mut files = Vec::new();
    for name in lock_type.names() {
        let path = lock_path_for(lock_path, stanza, name);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::from_io(ErrorKind::LockAcquire, path.display().to_string(), e))?;

        flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock).map_err(|_| {
            Error::new(ErrorKind::LockAcquire, format!("stanza '{stanza}' is locked ({name})"))
                .with_hint("another pgbackrest-rs command is already running against this stanza")
        })?;

        file.set_len(0)
            .map_err(|e| Error::from_io(ErrorKind::LockAcquire, path.display().to_string(), e))?;
        file.write_all(format!("{}", std::process::id()).as_bytes())
            .map_err(|e| Error::from_io(ErrorKind::LockAcquire, path.display().to_string(), e))?;
        file.flush()
            .map_err(|e| Error::from_io(ErrorKind::LockAcquire, path.display().to_string(), e))?;

        files.push(file);
    }
    Ok(LockGuard { files })
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        for file in &mut self.files {
            let _ = file.set_len(0);
            let _ = flock(file.as_raw_fd(), FlockArg::UnlockNonblock);
        }
    }
}

fn stop_file_paths(lock_path: &Path, stanza: Option<&str>) -> Vec<PathBuf> {
    match stanza {
        Some(s) => vec![lock_path.join(format!("{s}.stop")), lock_path.join("all.stop")],
        None => vec![lock_path.join("all.stop")],
    }
}

/// Raises `ErrorKind::Stop` if a stop file applies to `stanza` (or to all
/// stanzas). Called at `lock_stop_test` points before/during a command.
pub fn lock_stop_test(lock_path: &Path, stanza: &str) -> Result<(), Error> {
    for path in stop_file_paths(lock_path, Some(stanza)) {
        if path.exists() {
            return Err(Error::new(ErrorKind::Stop, format!("stop file '{}' present", path.display()))
                .with_hint("run cmd_start to clear the stop file before retrying"));
        }
    }
    Ok(())
}

/// Creates the stop file for `stanza` (or, if `None`, for every stanza).
/// With `force`, also reads any live lock files and sends `SIGTERM` to the
/// PID recorded in each.
pub fn cmd_stop(lock_path: &Path, stanza: Option<&str>, force: bool) -> Result<(), Error> {
    let stop_path = match stanza {
        Some(s) => lock_path.join(format!("{s}.stop")),
        None => lock_path.join("all.stop"),
    };
    File::create(&stop_path).map_err(|e| Error::from_io(ErrorKind::Stop, stop_path.display().to_string(), e))?;

    if force {
        signal_live_locks(lock_path, stanza)?;
    }
    Ok(())
}

fn signal_live_locks(lock_path: &Path, stanza: Option<&str>) -> Result<(), Error> {
    let entries = std::fs::read_dir(lock_path)
        .map_err(|e| Error::from_io(ErrorKind::PathOpen, lock_path.display().to_string(), e))?;

    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.ends_with(".lock") {
            continue;
        }
        if let Some(s) = stanza {
            if !name.starts_with(&format!("{s}-")) {
                continue;
            }
        }
        let path = entry.path();
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(_) => continue,
        };
        let mut buf = String::new();
        if file.seek(SeekFrom::Start(0)).is_err() || file.read_to_string(&mut buf).is_err() {
            continue;
        }
        if let Ok(pid) = buf.trim().parse::<i32>() {
            if pid > 0 {
                let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
            }
        }
    }
    Ok(())
}

/// Removes the stop file `cmd_stop` created for `stanza` (or `all.stop`
/// when `stanza` is `None`), clearing the way for new commands to run.
pub fn cmd_start(lock_path: &Path, stanza: Option<&str>) -> Result<(), Error> {
    let path = match stanza {
        Some(s) => lock_path.join(format!("{s}.stop")),
        None => lock_path.join("all.stop"),
    };
    if path.exists() {
        std::fs::remove_file(&path).map_err(|e| Error::from_io(ErrorKind::Stop, path.display().to_string(), e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn tempdir() -> PathBuf {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("pgbr-lock-test-{}-{n}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn acquiring_twice_fails_with_lock_acquire() {
        let dir = tempdir();
        let _guard = acquire(&dir, "main", LockType::Backup).unwrap();
        let err = acquire(&dir, "main", LockType::Backup).unwrap_err();
        assert_eq!(err.kind, ErrorKind::LockAcquire);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn lock_releases_on_drop() {
        let dir = tempdir();
        {
            let _guard = acquire(&dir, "main", LockType::Archive).unwrap();
        }
        let _guard2 = acquire(&dir, "main", LockType::Archive).unwrap();
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn stop_file_blocks_commands_until_start() {
        let dir = tempdir();
        assert!(lock_stop_test(&dir, "main").is_ok());
        cmd_stop(&dir, Some("main"), false).unwrap();
        let err = lock_stop_test(&dir, "main").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Stop);
        cmd_start(&dir, Some("main")).unwrap();
        assert!(lock_stop_test(&dir, "main").is_ok());
        std::fs::remove_dir_all(dir).ok();
    }
}

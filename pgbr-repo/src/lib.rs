//! INI + JSON + checksum-stamped info files (components C, D). Grounded on
//! `pbs-datastore::manifest::BackupManifest`'s canonical-JSON signature
//! scheme, adapted from a single signed JSON blob into the specification's
//! multi-section INI-with-JSON-values grammar and primary/`.copy`
//! fallback.

mod archive_info;
mod backup_info;
mod ini;
mod info;

pub use archive_info::{ArchiveInfo, ARCHIVE_INFO_PATH_SUFFIX};
pub use backup_info::{check_history_agreement, BackupCurrentEntry, BackupInfo, BACKUP_INFO_PATH_SUFFIX};
pub use ini::IniDocument;
pub use info::{InfoFile, BACKREST_FORMAT, BACKREST_VERSION};

use serde::{Deserialize, Serialize};

/// Fields read from the cluster's `pg_control` binary file. PostgreSQL wire
/// access itself is out of scope (spec §1); this crate only models the
/// shape `PgClient::control_info()` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PgControl {
    pub version: u32,
    pub system_id: u64,
    pub control_version: u32,
    pub catalog_version: u32,
    pub page_size: u32,
    pub wal_segment_size: u32,
    pub page_checksum_enabled: bool,
}

/// A record of a past PostgreSQL identity the stanza has seen. Info files
/// keep a list of these, newest first, with element 0 being "current".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PgHistoryEntry {
    pub history_id: u32,
    pub system_id: u64,
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_version: Option<u32>,
}

impl PgHistoryEntry {
    /// The `{history_id, version, system_id}` tuple used for the
    /// archive.info <-> backup.info cross-file consistency check.
    pub fn identity(&self) -> (u32, u32, u64) {
        (self.history_id, self.version, self.system_id)
    }
}

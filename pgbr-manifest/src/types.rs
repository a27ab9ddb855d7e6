use pgbr_types::BackupLabel;

#[derive(Debug, Clone)]
pub struct ManifestData {
    pub label: BackupLabel,
    pub prior_label: Option<BackupLabel>,
    pub backup_type: pgbr_types::BackupType,
    pub timestamp_copy_start: i64,
    pub timestamp_start: i64,
    pub timestamp_stop: i64,
    pub pg_version: u32,
    pub pg_system_id: u64,
    pub pg_id: u32,
    pub option_compress: bool,
    pub option_hardlink: bool,
    pub option_online: bool,
    pub option_backup_standby: bool,
    pub option_checksum_page: bool,
    pub option_delta: bool,
    pub archive_start: Option<String>,
    pub archive_stop: Option<String>,
    pub lsn_start: Option<String>,
    pub lsn_stop: Option<String>,
    pub backrest_version: String,
    pub backrest_format: u32,
    pub cipher_sub_pass: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestPath {
    pub name: String,
    pub mode: u32,
    pub user: Option<String>,
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestFile {
    pub name: String,
    pub size: u64,
    pub size_repo: Option<u64>,
    pub timestamp: i64,
    pub mode: u32,
    pub user: Option<String>,
    pub group: Option<String>,
    pub checksum_sha1: Option<[u8; 20]>,
    pub checksum_page: Option<bool>,
    pub checksum_page_error: Vec<u32>,
    pub reference: Option<BackupLabel>,
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestLink {
    pub name: String,
    pub destination: String,
    pub user: Option<String>,
    pub group: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Path,
    Link,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestTarget {
    pub name: String,
    pub target_type: TargetType,
    pub path: Option<String>,
    pub file: Option<String>,
    pub tablespace_id: Option<u32>,
    pub tablespace_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManifestDb {
    pub name: String,
    pub id: u32,
    pub last_system_id: u32,
}

#[derive(Debug, Clone)]
pub struct Manifest {
    pub data: ManifestData,
    pub paths: Vec<ManifestPath>,
    pub files: Vec<ManifestFile>,
    pub links: Vec<ManifestLink>,
    pub targets: Vec<ManifestTarget>,
    pub db_list: Vec<ManifestDb>,
}

impl Manifest {
    pub fn sort_all(&mut self) {
        self.paths.sort_by(|a, b| a.name.cmp(&b.name));
        self.files.sort_by(|a, b| a.name.cmp(&b.name));
        self.links.sort_by(|a, b| a.name.cmp(&b.name));
        // targets[0] must stay pg_data per the data model invariant.
        let pg_data_idx = self.targets.iter().position(|t| t.name == "pg_data");
        self.targets.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(_idx) = pg_data_idx {
            if let Some(cur) = self.targets.iter().position(|t| t.name == "pg_data") {
                if cur != 0 {
                    let pg_data = self.targets.remove(cur);
                    self.targets.insert(0, pg_data);
                }
            }
        }
    }

    pub fn file_mut(&mut self, name: &str) -> Option<&mut ManifestFile> {
        self.files.iter_mut().find(|f| f.name == name)
    }
}

//! Remote storage backend: serializes `Storage` operations over the
//! `pgbr_protocol::Channel` message frame to a remote agent whose own
//! storage is Posix or S3 on the other side (spec §4.1).

use std::io::{BufRead, Cursor, Write};
use std::sync::{Arc, Mutex};

use pgbr_protocol::Channel;
use pgbr_types::Error;
use serde_json::json;

use crate::{BoxRead, BoxWrite, Feature, FileInfo, FileType, SortOrder, Storage, WalkEntry, WriteOptions};

pub struct RemoteStorage<R, W> {
    channel: Arc<Mutex<Channel<R, W>>>,
}

impl<R: BufRead, W: Write> RemoteStorage<R, W> {
    pub fn new(channel: Channel<R, W>) -> Self {
        Self {
            channel: Arc::new(Mutex::new(channel)),
        }
    }

    fn call(&self, command: &str, params: Vec<serde_json::Value>) -> Result<serde_json::Value, Error> {
        self.channel.lock().unwrap().call(command, params)
    }
}

fn file_type_from_str(s: &str) -> FileType {
    match s {
        "file" => FileType::File,
        "path" => FileType::Path,
        "link" => FileType::Link,
        _ => FileType::Special,
    }
}

impl<R: BufRead + Send + 'static, W: Write + Send + 'static> Storage for RemoteStorage<R, W> {
    fn info(&self, path: &str, follow_link: bool) -> Result<Option<FileInfo>, Error> {
        let out = self.call("storage_info", vec![json!(path), json!(follow_link)])?;
        if out.is_null() {
            return Ok(None);
        }
        Ok(Some(FileInfo {
            file_type: file_type_from_str(out["type"].as_str().unwrap_or("special")),
            size: out["size"].as_u64().unwrap_or(0),
            mtime: out["mtime"].as_i64().unwrap_or(0),
            mode: out["mode"].as_u64().unwrap_or(0) as u32,
            user: out["user"].as_str().map(String::from),
            group: out["group"].as_str().map(String::from),
            link_target: out["link_target"].as_str().map(String::from),
        }))
    }

    fn list(&self, path: &str, expression: Option<&str>) -> Result<Vec<String>, Error> {
        let out = self.call("storage_list", vec![json!(path), json!(expression)])?;
        Ok(out
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default())
    }

    fn list_info(
        &self,
        path: &str,
        recurse: bool,
        _sort_order: SortOrder,
        callback: &mut dyn FnMut(WalkEntry) -> Result<(), Error>,
    ) -> Result<(), Error> {
        // The remote side walks and returns a flat array; ordering across
        // entries is implementation-defined per §4.1, same as the local
        // backends unless the caller requests an explicit sort.
        let out = self.call("storage_list_info", vec![json!(path), json!(recurse)])?;
        for entry in out.as_array().cloned().unwrap_or_default() {
            let info = FileInfo {
                file_type: file_type_from_str(entry["type"].as_str().unwrap_or("special")),
                size: entry["size"].as_u64().unwrap_or(0),
                mtime: entry["mtime"].as_i64().unwrap_or(0),
                mode: entry["mode"].as_u64().unwrap_or(0) as u32,
                user: entry["user"].as_str().map(String::from),
                group: entry["group"].as_str().map(String::from),
                link_target: entry["link_target"].as_str().map(String::from),
            };
            callback(WalkEntry {
                path: entry["path"].as_str().unwrap_or_default().to_string(),
                info,
            })?;
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
        let out = self.call(
            "storage_read",
            vec![json!(path), json!(ignore_missing), json!(offset), json!(limit)],
        )?;
        if out.is_null() {
            return Ok(None);
        }
        let data = out
            .as_str()
            .map(|s| hex::decode(s).unwrap_or_default())
            .unwrap_or_default();
        Ok(Some(Box::new(Cursor::new(data))))
    }

    fn write(&self, path: &str, _opts: WriteOptions) -> Result<BoxWrite, Error> {
        Ok(Box::new(RemoteWriter {
            channel: Arc::clone(&self.channel),
            path: path.to_string(),
            buf: Vec::new(),
            committed: false,
        }))
    }

    fn remove(&self, path: &str, recurse: bool) -> Result<(), Error> {
        self.call("storage_remove", vec![json!(path), json!(recurse)])?;
        Ok(())
    }

    fn link_create(&self, path: &str, destination: &str) -> Result<(), Error> {
        self.call("storage_link_create", vec![json!(path), json!(destination)])?;
        Ok(())
    }

    fn path_create(
        &self,
        path: &str,
        mode: Option<u32>,
        no_parent_create: bool,
        error_on_exists: bool,
    ) -> Result<(), Error> {
        self.call(
            "storage_path_create",
            vec![json!(path), json!(mode), json!(no_parent_create), json!(error_on_exists)],
        )?;
        Ok(())
    }

    fn path_sync(&self, path: &str) -> Result<(), Error> {
        self.call("storage_path_sync", vec![json!(path)])?;
        Ok(())
    }

    fn feature(&self, flag: Feature) -> bool {
        let name = match flag {
            Feature::HardLink => "hard_link",
            Feature::Path => "path",
            Feature::Link => "link",
            Feature::Compress => "compress",
            Feature::Owner => "owner",
        };
        self.call("storage_feature", vec![json!(name)])
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Buffers bytes written locally and hands them to the remote agent as one
/// `storage_write` call on flush, matching the request/response shape of
/// the message channel (no streaming upload primitive in the simple
/// line-framed protocol, spec §6).
struct RemoteWriter<R, W> {
    channel: Arc<Mutex<Channel<R, W>>>,
    path: String,
    buf: Vec<u8>,
    committed: bool,
}

impl<R: BufRead, W: Write> Write for RemoteWriter<R, W> {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if self.committed {
            return Ok(());
        }
        self.channel
            .lock()
            .unwrap()
            .call("storage_write", vec![json!(self.path), json!(hex::encode(&self.buf))])
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        self.committed = true;
        Ok(())
    }
}

use std::io::{BufRead, Write};

use pgbr_types::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One request frame: `{command, params}`. Serialized as a single
/// length-prefixed-by-newline line of JSON, matching the specification's
/// "framing is length-prefixed text lines of JSON".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    pub params: Vec<Value>,
}

/// One response frame: either `{out}` or `{err: {code, message, stack?}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Out { out: Value },
    Err { err: ResponseError },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// A bidirectional ordered pair of framed streams to a remote agent
/// (ssh child, local subprocess, ...). The remote-process spawner itself is
/// out of scope (spec §1); callers construct a `Channel` over whatever
/// `Read`/`Write` pair they already have.
pub struct Channel<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> Channel<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub fn send_request(&mut self, req: &Request) -> Result<(), Error> {
        let mut line = serde_json::to_string(req)
            .map_err(|e| Error::new(ErrorKind::Protocol, "encode request failed").with_source(e))?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .map_err(|e| Error::from_io(ErrorKind::Protocol, "write request frame", e))?;
        self.writer
            .flush()
            .map_err(|e| Error::from_io(ErrorKind::Protocol, "flush request frame", e))
    }

    pub fn recv_response(&mut self) -> Result<Response, Error> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .map_err(|e| Error::from_io(ErrorKind::Protocol, "read response frame", e))?;
        if n == 0 {
            return Err(Error::new(ErrorKind::HostConnect, "remote channel closed"));
        }
        serde_json::from_str(line.trim_end())
            .map_err(|e| Error::new(ErrorKind::Protocol, "decode response failed").with_source(e))
    }

    /// Send a request and block for its response, converting a
    /// `Response::Err` into an `Error`.
    pub fn call(&mut self, command: &str, params: Vec<Value>) -> Result<Value, Error> {
        self.send_request(&Request {
            command: command.to_string(),
            params,
        })?;
        match self.recv_response()? {
            Response::Out { out } => Ok(out),
            Response::Err { err } => Err(Error::new(ErrorKind::Protocol, err.message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_call() {
        let response = Response::Out {
            out: serde_json::json!({"segment": "000000010000000000000001"}),
        };
        let mut line = serde_json::to_string(&response).unwrap();
        line.push('\n');

        let reader = Cursor::new(line.into_bytes());
        let writer = Vec::new();
        let mut channel = Channel::new(reader, writer);

        let out = channel.call("wal_switch", vec![]).unwrap();
        assert_eq!(out["segment"], "000000010000000000000001");
    }

    #[test]
    fn surfaces_remote_errors() {
        let response = Response::Err {
            err: ResponseError {
                code: 1,
                message: "boom".into(),
                stack: None,
            },
        };
        let mut line = serde_json::to_string(&response).unwrap();
        line.push('\n');

        let reader = Cursor::new(line.into_bytes());
        let mut channel = Channel::new(reader, Vec::new());
        let err = channel.call("anything", vec![]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Protocol);
    }
}

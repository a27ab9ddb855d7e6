use std::io;

use openssl::hash::{Hasher, MessageDigest};

use crate::{Filter, FilterResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Md5,
}

impl HashAlgorithm {
    fn digest(self) -> MessageDigest {
        match self {
            HashAlgorithm::Sha1 => MessageDigest::sha1(),
            HashAlgorithm::Sha256 => MessageDigest::sha256(),
            HashAlgorithm::Md5 => MessageDigest::md5(),
        }
    }
}

/// Streaming digest over bytes passing through; result is the lowercase
/// hex encoding, matching the checksum format stored in manifests and
/// info files.
pub struct Hash {
    hasher: Hasher,
    digest: Option<String>,
}

impl Hash {
    pub fn new(algorithm: HashAlgorithm) -> io::Result<Self> {
        let hasher = Hasher::new(algorithm.digest())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        Ok(Self {
            hasher,
            digest: None,
        })
    }
}

impl Filter for Hash {
    fn process_inout(&mut self, input: Option<&[u8]>, output: &mut [u8]) -> io::Result<(usize, usize)> {
        match input {
            Some(data) => {
                let n = data.len().min(output.len());
                self.hasher
                    .update(&data[..n])
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
                output[..n].copy_from_slice(&data[..n]);
                Ok((n, n))
            }
            None => {
                if self.digest.is_none() {
                    let bytes = self
                        .hasher
                        .finish()
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
                    self.digest = Some(hex::encode(bytes));
                }
                Ok((0, 0))
            }
        }
    }

    fn done(&self) -> bool {
        self.digest.is_some()
    }

    fn result(&self) -> FilterResult {
        match &self.digest {
            Some(d) => FilterResult::Hash(d.clone()),
            None => FilterResult::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_of_known_input() {
        let mut h = Hash::new(HashAlgorithm::Sha1).unwrap();
        let mut scratch = [0u8; 64];
        h.process_inout(Some(b"abc"), &mut scratch).unwrap();
        h.process_inout(None, &mut scratch).unwrap();
        match h.result() {
            FilterResult::Hash(digest) => {
                assert_eq!(digest, "a9993e364706816aba3e25717850c26c9cd0d89");
            }
            _ => panic!("expected a hash result"),
        }
    }
}

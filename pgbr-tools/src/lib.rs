//! Small ambient helpers shared across the workspace: cipher key
//! derivation, random byte generation and a handful of POSIX ownership/mode
//! helpers. Grounded on `pbs-tools::crypt_config` and the owner/mode
//! conventions of `proxmox_sys::fs::CreateOptions`, generalized away from
//! the teacher's AES-256-GCM chunk cipher towards the specification's
//! OpenSSL-compatible salted AES-256-CBC header format.

pub mod crypt;
pub mod fs;

pub use crypt::{derive_key_iv, random_bytes, CIPHER_HEADER_LEN, CIPHER_MAGIC};

//! OpenSSL-compatible salted AES-256-CBC key derivation.
//!
//! The wire format is `"Salted__" || salt(8) || ciphertext`, and the key
//! material is derived from `pass || salt` with one iteration of
//! EVP_BytesToKey over the configured digest, exactly as `openssl enc`
//! does. This lives next to the teacher's `CryptConfig` (which derives an
//! AES-256-GCM key via `pbkdf2_hmac`) but implements the single-iteration
//! BytesToKey scheme the specification's salted header format requires.

use openssl::hash::{Hasher, MessageDigest};
use pgbr_types::{Error, ErrorKind};

pub const CIPHER_MAGIC: &[u8; 8] = b"Salted__";
pub const CIPHER_HEADER_LEN: usize = 16; // 8 magic + 8 salt
const KEY_LEN: usize = 32; // AES-256
const IV_LEN: usize = 16;

/// Fill `buf` with cryptographically secure random bytes.
pub fn random_bytes(buf: &mut [u8]) -> Result<(), Error> {
    openssl::rand::rand_bytes(buf)
        .map_err(|e| Error::new(ErrorKind::Crypto, "failed to generate random bytes").with_source(e))
}

/// Derive a 32-byte key and 16-byte IV from `pass` and `salt` using one
/// round of EVP_BytesToKey with the given digest (SHA-1 by default per the
/// specification).
pub fn derive_key_iv(
    pass: &[u8],
    salt: &[u8; 8],
    digest: MessageDigest,
) -> Result<([u8; KEY_LEN], [u8; IV_LEN]), Error> {
    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];

    let mut out = Vec::with_capacity(KEY_LEN + IV_LEN);
    let mut prev: Vec<u8> = Vec::new();

    while out.len() < KEY_LEN + IV_LEN {
        let mut hasher = Hasher::new(digest)
            .map_err(|e| Error::new(ErrorKind::Crypto, "hasher init failed").with_source(e))?;
        hasher
            .update(&prev)
            .and_then(|_| hasher.update(pass))
            .and_then(|_| hasher.update(salt))
            .map_err(|e| Error::new(ErrorKind::Crypto, "hasher update failed").with_source(e))?;
        let digest_out = hasher
            .finish()
            .map_err(|e| Error::new(ErrorKind::Crypto, "hasher finish failed").with_source(e))?;
        prev = digest_out.to_vec();
        out.extend_from_slice(&prev);
    }

    key.copy_from_slice(&out[0..KEY_LEN]);
    iv.copy_from_slice(&out[KEY_LEN..KEY_LEN + IV_LEN]);
    Ok((key, iv))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let salt = [1u8; 8];
        let (k1, iv1) = derive_key_iv(b"hunter2", &salt, MessageDigest::sha1()).unwrap();
        let (k2, iv2) = derive_key_iv(b"hunter2", &salt, MessageDigest::sha1()).unwrap();
        assert_eq!(k1, k2);
        assert_eq!(iv1, iv2);
    }

    #[test]
    fn different_salts_differ() {
        let (k1, _) = derive_key_iv(b"hunter2", &[1u8; 8], MessageDigest::sha1()).unwrap();
        let (k2, _) = derive_key_iv(b"hunter2", &[2u8; 8], MessageDigest::sha1()).unwrap();
        assert_ne!(k1, k2);
    }
}

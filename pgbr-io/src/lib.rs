//! IO filter chain (component B): the pipeline every backup/restore file
//! passes through (hash, size, compress, encrypt, page-checksum). Grounded
//! on `pbs-datastore`'s `CryptWriter`/`CryptReader`/`ChecksumWriter` pair,
//! which each wrap a single `Read`/`Write`; here they're generalized into
//! stages of one composable `FilterGroup`, the shape the original design
//! calls for when several filters chain in one pass.

mod buffer;
mod cipher;
mod gzip;
mod group;
mod hash;
mod page_checksum;
mod size;

pub use buffer::Buffer;
pub use cipher::{CipherBlock, CipherMode};
pub use gzip::Gzip;
pub use group::{Filter, FilterGroup, FilterResult};
pub use hash::{Hash, HashAlgorithm};
pub use page_checksum::{PageChecksumFilter, PageChecksumResult};
pub use size::Size;

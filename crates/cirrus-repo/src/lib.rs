//! AT Protocol repository decoding
//!
//! This crate turns repository exports into flat lists of records:
//!
//! - **CAR reading**: header and block iteration over CAR v1 and v2 buffers
//! - **MST keys**: rebuilding record paths from prefix-compressed node entries
//! - **Bulk decoding**: records joined with their paths, produced in bounded chunks
//! - **Records**: the output sum type shared with the firehose decoder
//!
//! # Example
//!
//! ```rust,ignore
//! use cirrus_repo::{RepoDecoder, FirehoseRecord};
//!
//! let data = tokio::fs::read("repo.car").await?;
//! for batch in RepoDecoder::new(data.into(), "did:plc:example")? {
//!     for record in batch? {
//!         if let FirehoseRecord::Stored(record) = record {
//!             println!("{} {}", record.record_type, record.path.as_deref().unwrap_or("-"));
//!         }
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

/// CAR (Content Addressable aRchive) reading
pub mod car;
/// Bulk repository decoding
pub mod decode;
pub mod error;
pub mod mst;
pub mod record;

pub use car::{Block, CarReader, read_car, read_car_file};
pub use decode::{
    CommitInfo, DEFAULT_CHUNK_SIZE, RepoDecoder, decode_repository, decode_repository_async,
};
pub use error::{MstError, RepoError, RepoErrorKind, Result};
pub use record::{
    AccountRecord, DeleteRecord, ErrorRecord, FirehoseRecord, FrameRecord, IdentityRecord,
    ParseBatch, RepoRecord,
};

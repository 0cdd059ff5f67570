//! CAR (Content Addressable aRchive) reading
//!
//! A CAR is a varint-prefixed DAG-CBOR header `{version, roots}` followed by
//! varint-prefixed sections, each a binary CID and the block it names.
//! Version 2 files wrap a version 1 payload behind a fixed-size header; the
//! reader locates that payload and iterates only its blocks.
//!
//! # Examples
//!
//! ```ignore
//! use cirrus_repo::car::read_car_file;
//!
//! let reader = read_car_file("repo.car").await?;
//! for block in reader {
//!     let block = block?;
//!     println!("{} ({} bytes)", block.cid, block.bytes.len());
//! }
//! ```

pub mod reader;

pub use reader::{Block, CarHeader, CarReader, CarV2Header, read_car, read_car_file};

//! Bulk decoding of repository exports
//!
//! A repository CAR holds record blocks and MST node blocks in no particular
//! order, so decoding runs in two phases: every block is decoded once and
//! sorted into records and node entries, then each record is joined with the
//! path its MST entry gives it.
//!
//! [`RepoDecoder`] does this in bounded chunks. Each call to `next` performs
//! at most `chunk_size` units of work (a block, an MST entry or an emitted
//! record) and returns what it produced, so a caller can interleave other
//! work between chunks. Chunking never changes the decoded output.

use std::collections::HashMap;

use bytes::Bytes;
use cirrus_codec::cbor::{DecodeOptions, Decoder, Map, TagRegistry, Value};
use cirrus_codec::cid::DAG_CBOR;
use cirrus_codec::Cid;
use n0_future::time::{Duration, Instant};
use smol_str::SmolStr;

use crate::car::{Block, CarReader};
use crate::error::{RepoError, Result};
use crate::mst::{KeyReconstructor, NodeData};
use crate::record::{FirehoseRecord, ParseBatch, RepoRecord, at_uri};

/// Units of work per chunk unless configured otherwise
pub const DEFAULT_CHUNK_SIZE: usize = 300;

/// The signed commit named by the first CAR root
#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    /// Repository DID
    pub did: SmolStr,
    /// Revision TID
    pub rev: Option<SmolStr>,
    /// Repository format version
    pub version: i64,
    /// MST root
    pub data: Option<Cid>,
    /// Previous commit, if linked
    pub prev: Option<Cid>,
}

impl CommitInfo {
    fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_map()?;
        Some(Self {
            did: SmolStr::new(map.get("did")?.as_str()?),
            rev: map.get("rev").and_then(Value::as_str).map(SmolStr::new),
            version: map.get("version")?.as_integer()?,
            data: map.get("data").and_then(Value::as_link).cloned(),
            prev: map.get("prev").and_then(Value::as_link).cloned(),
        })
    }
}

/// A record block waiting for its path
#[derive(Debug)]
struct Collected {
    cid: Cid,
    record_type: SmolStr,
    payload: Map,
    parse_time: Duration,
}

/// A node whose entries are not all processed yet
#[derive(Debug)]
struct PendingNode {
    value: Value,
    keys: KeyReconstructor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Collect,
    Join,
    Done,
}

/// Chunked repository decoder
///
/// Iterates [`ParseBatch`]es. Batches produced while blocks are still being
/// collected are empty; records are emitted once every block has been seen.
/// A CAR framing error is yielded once and ends the iteration. Blocks that
/// fail to decode and malformed MST entries are skipped and kept in
/// [`RepoDecoder::errors`].
#[derive(Debug)]
pub struct RepoDecoder {
    reader: CarReader,
    repo: SmolStr,
    decoder: Decoder,
    chunk_size: usize,
    phase: Phase,
    commit_cid: Option<Cid>,
    commit: Option<CommitInfo>,
    pending: Option<PendingNode>,
    records: Vec<Collected>,
    paths: HashMap<SmolStr, SmolStr>,
    joined: usize,
    errors: Vec<RepoError>,
    total_parse_time: Duration,
}

impl RepoDecoder {
    /// Read the CAR header of `data`; blocks are decoded lazily.
    pub fn new(data: Bytes, repo: impl Into<SmolStr>) -> Result<Self> {
        let reader = CarReader::new(data)?;
        let commit_cid = reader.roots().first().cloned();
        Ok(Self {
            reader,
            repo: repo.into(),
            decoder: Decoder::dag_cbor(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            phase: Phase::Collect,
            commit_cid,
            commit: None,
            pending: None,
            records: Vec::new(),
            paths: HashMap::new(),
            joined: 0,
            errors: Vec::new(),
            total_parse_time: Duration::ZERO,
        })
    }

    /// Set the units of work per chunk. Zero is treated as one.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Decode blocks with `options` instead of strict DAG-CBOR.
    pub fn with_options(mut self, options: DecodeOptions) -> Self {
        self.decoder = Decoder::new(options, TagRegistry::dag_cbor());
        self
    }

    /// Repository DID attached to every record
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// The commit block, once it has been read
    pub fn commit(&self) -> Option<&CommitInfo> {
        self.commit.as_ref()
    }

    /// Blocks and MST entries skipped so far
    pub fn errors(&self) -> &[RepoError] {
        &self.errors
    }

    /// Active decode time so far
    pub fn total_parse_time(&self) -> Duration {
        self.total_parse_time
    }

    /// Whether every batch has been produced
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// One unit of collect work. Returns `false` once the CAR is exhausted.
    fn collect_step(&mut self) -> Result<bool> {
        if let Some(mut pending) = self.pending.take() {
            self.apply_entry(&mut pending);
            let more = NodeData::from_value(&pending.value)
                .is_some_and(|node| pending.keys.index() < node.entries().len());
            if more {
                self.pending = Some(pending);
            }
            return Ok(true);
        }

        match self.reader.next() {
            Some(block) => {
                self.collect_block(block?);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn apply_entry(&mut self, pending: &mut PendingNode) {
        let Some(node) = NodeData::from_value(&pending.value) else {
            return;
        };
        let Some(entry) = node.entries().get(pending.keys.index()) else {
            return;
        };
        match pending.keys.apply(entry) {
            Ok(leaf) => {
                self.paths.insert(leaf.value, leaf.key);
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "skipping MST entry");
                self.errors.push(e.into());
            }
        }
    }

    fn collect_block(&mut self, block: Block) {
        if block.cid.codec() != DAG_CBOR {
            #[cfg(feature = "tracing")]
            tracing::trace!(cid = %block.cid, codec = block.cid.codec(), "skipping non-DAG-CBOR block");
            return;
        }

        let started = Instant::now();
        let value = match self.decoder.decode(&block.bytes) {
            Ok(value) => value,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(cid = %block.cid, error = %e, "skipping undecodable block");
                self.errors
                    .push(RepoError::decode(e).with_context(format!("block {}", block.cid)));
                return;
            }
        };

        if self.commit_cid.as_ref() == Some(&block.cid) {
            self.commit = CommitInfo::from_value(&value);
        }

        let record_type = value
            .get("$type")
            .and_then(Value::as_str)
            .map(SmolStr::new);
        if let Some(record_type) = record_type {
            if let Some(payload) = value.into_map() {
                self.records.push(Collected {
                    cid: block.cid,
                    record_type,
                    payload,
                    parse_time: started.elapsed(),
                });
            }
        } else if NodeData::from_value(&value).is_some_and(|node| !node.entries().is_empty()) {
            self.pending = Some(PendingNode {
                value,
                keys: KeyReconstructor::new(),
            });
        }
    }

    /// One unit of join work. Returns `None` once every record is emitted.
    fn join_step(&mut self) -> Option<FirehoseRecord> {
        let collected = self.records.get_mut(self.joined)?;
        self.joined += 1;

        let cid = SmolStr::new(collected.cid.to_string());
        let path = self.paths.get(&cid).cloned();
        let record = RepoRecord {
            repo: self.repo.clone(),
            uri: path.as_deref().map(|path| at_uri(&self.repo, path)),
            path,
            cid,
            record_type: collected.record_type.clone(),
            since: None,
            time: None,
            receive_timestamp: None,
            parse_time: collected.parse_time,
            payload: std::mem::take(&mut collected.payload),
        };
        Some(FirehoseRecord::Stored(record))
    }

    fn run_chunk(&mut self, records: &mut Vec<FirehoseRecord>) -> Result<()> {
        let mut units = 0;
        while units < self.chunk_size {
            match self.phase {
                Phase::Collect => {
                    if !self.collect_step()? {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(
                            records = self.records.len(),
                            paths = self.paths.len(),
                            skipped = self.errors.len(),
                            "all blocks collected"
                        );
                        self.phase = Phase::Join;
                        continue;
                    }
                }
                Phase::Join => match self.join_step() {
                    Some(record) => records.push(record),
                    None => {
                        self.records.clear();
                        self.phase = Phase::Done;
                        break;
                    }
                },
                Phase::Done => break,
            }
            units += 1;
        }
        Ok(())
    }
}

impl Iterator for RepoDecoder {
    type Item = Result<ParseBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.phase == Phase::Done {
            return None;
        }

        #[cfg(feature = "tracing")]
        let _span = tracing::trace_span!("repo_chunk", repo = %self.repo).entered();

        let started = Instant::now();
        let mut records = Vec::new();
        let outcome = self.run_chunk(&mut records);
        let parse_time = started.elapsed();
        self.total_parse_time += parse_time;

        if let Err(e) = outcome {
            self.phase = Phase::Done;
            return Some(Err(e));
        }
        Some(Ok(ParseBatch {
            records,
            parse_time,
            total_parse_time: self.total_parse_time,
        }))
    }
}

/// Decode every record of a repository export.
///
/// Records come back in block order, with `path` and `uri` when an MST entry
/// names their CID.
pub fn decode_repository(data: Bytes, repo: &str) -> Result<Vec<FirehoseRecord>> {
    #[cfg(feature = "tracing")]
    let _span = tracing::debug_span!("decode_repository", repo, bytes = data.len()).entered();

    let mut records = Vec::new();
    for batch in RepoDecoder::new(data, repo)? {
        records.extend(batch?);
    }
    Ok(records)
}

/// Decode a repository export, yielding to the tokio scheduler between chunks.
#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(repo = %repo, bytes = data.len())))]
pub async fn decode_repository_async(
    data: Bytes,
    repo: &str,
    chunk_size: usize,
) -> Result<Vec<FirehoseRecord>> {
    let decoder = RepoDecoder::new(data, repo)?.with_chunk_size(chunk_size);
    let mut records = Vec::new();
    for batch in decoder {
        records.extend(batch?);
        tokio::task::yield_now().await;
    }
    Ok(records)
}

//! Single-frame decoding
//!
//! A frame is two concatenated DAG-CBOR values: a header `{t, op}` and a body
//! whose shape depends on `t`. Decoding a frame never fails. Anything wrong
//! with the frame as a whole becomes one error record, and problems with a
//! single op of a commit become an error record next to the records of the
//! other ops.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use cirrus_codec::cbor::{TagRegistry, Value};
use cirrus_codec::{Cid, DecodeOptions, Decoder};
use cirrus_repo::record::at_uri;
use cirrus_repo::{
    AccountRecord, CarReader, DeleteRecord, ErrorRecord, FirehoseRecord, FrameRecord,
    IdentityRecord, RepoRecord,
};
use n0_future::time::{Duration, Instant};
use smol_str::SmolStr;

use crate::error::FrameError;

/// Header `op` of an error frame
pub const ERROR_OP: i64 = -1;

/// Frame type of repository commits
pub const COMMIT: &str = "#commit";
/// Frame type of identity notices
pub const IDENTITY: &str = "#identity";
/// Frame type of account status notices
pub const ACCOUNT: &str = "#account";

/// Decoded frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame type, absent on error frames
    pub frame_type: Option<SmolStr>,
    /// 1 for messages, -1 for errors
    pub op: i64,
}

impl FrameHeader {
    fn from_value(value: &Value) -> Result<Self, FrameError> {
        let op = value
            .get("op")
            .and_then(Value::as_integer)
            .ok_or(FrameError::Malformed {
                frame: "header",
                reason: "missing integer `op`",
            })?;
        Ok(Self {
            frame_type: value.get("t").and_then(Value::as_str).map(SmolStr::new),
            op,
        })
    }
}

/// Decode-time bookkeeping for one frame
struct Clock {
    received: DateTime<Utc>,
    mark: Instant,
}

impl Clock {
    fn new(received: DateTime<Utc>) -> Self {
        Self {
            received,
            mark: Instant::now(),
        }
    }

    /// Time since the previous record of this frame
    fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.mark);
        self.mark = now;
        elapsed
    }

    fn error(&mut self, error: ErrorRecord) -> FirehoseRecord {
        FirehoseRecord::Error(ErrorRecord {
            receive_timestamp: Some(self.received),
            parse_time: self.lap(),
            ..error
        })
    }
}

/// Fields shared by every op of a commit
struct CommitContext<'a> {
    repo: SmolStr,
    since: Option<SmolStr>,
    time: Option<SmolStr>,
    blocks: HashMap<Cid, Bytes>,
    ops: &'a [Value],
}

/// Frame decoder
///
/// Owns the CBOR decoder used for headers, bodies and commit blocks. Frames
/// are independent; one decoder can be shared by any number of them.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    decoder: Decoder,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DecodeOptions::dag_cbor())
    }
}

impl FrameDecoder {
    /// Decoder using `options` for every CBOR value it reads
    pub fn new(options: DecodeOptions) -> Self {
        Self {
            decoder: Decoder::new(options, TagRegistry::dag_cbor()),
        }
    }

    /// Decode one binary frame into records, in op order.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(bytes = frame.len())))]
    pub fn decode_frame(&self, frame: &Bytes, received: DateTime<Utc>) -> Vec<FirehoseRecord> {
        let mut clock = Clock::new(received);
        let mut records = Vec::new();
        if let Err(e) = self.decode_into(frame, &mut clock, &mut records) {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, "frame decoded as error record");
            records.push(clock.error(ErrorRecord::new(e.to_string())));
        }
        records
    }

    /// Error record for a text message, which the protocol never sends.
    pub fn text_message(&self, text: &str, received: DateTime<Utc>) -> FirehoseRecord {
        #[cfg(feature = "tracing")]
        tracing::warn!(len = text.len(), "text message on a binary stream");
        FirehoseRecord::Error(ErrorRecord {
            receive_timestamp: Some(received),
            ..ErrorRecord::new("WebSocket message type not supported.").with("data", text)
        })
    }

    fn decode_into(
        &self,
        frame: &Bytes,
        clock: &mut Clock,
        records: &mut Vec<FirehoseRecord>,
    ) -> Result<(), FrameError> {
        let (header, header_len) = self.decoder.decode_first(frame)?;
        let rest = frame.slice(header_len..);
        let (body, body_len) = self.decoder.decode_first(&rest)?;
        if body_len < rest.len() {
            return Err(FrameError::ExcessBytes {
                remaining: rest.len() - body_len,
            });
        }

        let header = FrameHeader::from_value(&header)?;
        if header.op == ERROR_OP {
            let name = body.get("error").and_then(Value::as_str).unwrap_or_default();
            let message = body.get("message").and_then(Value::as_str).unwrap_or_default();
            records.push(
                clock.error(ErrorRecord::new(format!("Error header#{name}: {message}")).with("error", name)),
            );
            return Ok(());
        }

        let Some(frame_type) = header.frame_type else {
            return Err(FrameError::Malformed {
                frame: "header",
                reason: "missing frame type `t`",
            });
        };
        match frame_type.as_str() {
            COMMIT => self.decode_commit(&body, clock, records),
            IDENTITY => {
                let record = identity(&body, clock)?;
                records.push(record);
                Ok(())
            }
            ACCOUNT => {
                let record = account(&body, clock)?;
                records.push(record);
                Ok(())
            }
            _ => {
                records.push(FirehoseRecord::Frame(FrameRecord {
                    frame_type,
                    body,
                    receive_timestamp: Some(clock.received),
                    parse_time: clock.lap(),
                }));
                Ok(())
            }
        }
    }

    fn decode_commit(
        &self,
        body: &Value,
        clock: &mut Clock,
        records: &mut Vec<FirehoseRecord>,
    ) -> Result<(), FrameError> {
        let ops = body
            .get("ops")
            .and_then(Value::as_array)
            .ok_or(FrameError::Malformed {
                frame: COMMIT,
                reason: "missing `ops` array",
            })?;
        let blocks = match body.get("blocks").and_then(Value::as_bytes) {
            Some(car) if !car.is_empty() => read_blocks(car.clone())?,
            _ => HashMap::new(),
        };
        let text = |key: &str| body.get(key).and_then(Value::as_str).map(SmolStr::new);
        let commit = CommitContext {
            repo: text("repo").unwrap_or_default(),
            since: text("since"),
            time: text("time"),
            blocks,
            ops,
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(repo = %commit.repo, ops = ops.len(), blocks = commit.blocks.len(), "commit");

        for (index, op) in commit.ops.iter().enumerate() {
            records.push(self.decode_op(&commit, index, op, clock));
        }
        Ok(())
    }

    fn decode_op(
        &self,
        commit: &CommitContext<'_>,
        index: usize,
        op: &Value,
        clock: &mut Clock,
    ) -> FirehoseRecord {
        let path = op.get("path").and_then(Value::as_str).map(SmolStr::new);
        let cid = op.get("cid").and_then(Value::as_link);
        let action = op.get("action").and_then(Value::as_str).unwrap_or_default();

        let fail = |clock: &mut Clock, message: String| {
            let mut error = ErrorRecord::new(message)
                .with("index", index as i64)
                .with("repo", commit.repo.clone());
            if let Some(path) = &path {
                error = error.with("path", path.clone());
            }
            if let Some(cid) = cid {
                error = error.with("cid", cid.clone());
            }
            #[cfg(feature = "tracing")]
            tracing::warn!(index, action, message = %error.message, "commit op decoded as error record");
            clock.error(error)
        };

        let Some(path) = path.clone() else {
            return fail(clock, format!("Missing commit.ops[{index}].path"));
        };

        match action {
            "create" | "update" => {
                let Some(cid) = cid else {
                    return fail(clock, format!("Missing commit.ops[{index}].cid"));
                };
                let Some(block) = commit.blocks.get(cid) else {
                    return fail(clock, format!("Unresolved commit.ops[{index}].cid {cid}"));
                };
                let payload = match self.decoder.decode(block) {
                    Ok(Value::Map(payload)) => payload,
                    Ok(other) => {
                        return fail(
                            clock,
                            format!(
                                "Record at commit.ops[{index}] is {}, not a map",
                                other.type_name()
                            ),
                        );
                    }
                    Err(e) => {
                        return fail(clock, format!("Undecodable record at commit.ops[{index}]: {e}"));
                    }
                };
                let Some(record_type) = payload.get("$type").and_then(Value::as_str) else {
                    return fail(clock, format!("Record at commit.ops[{index}] has no $type"));
                };
                let record = RepoRecord {
                    repo: commit.repo.clone(),
                    uri: Some(at_uri(&commit.repo, &path)),
                    path: Some(path),
                    cid: SmolStr::new(cid.to_string()),
                    record_type: SmolStr::new(record_type),
                    since: commit.since.clone(),
                    time: commit.time.clone(),
                    receive_timestamp: Some(clock.received),
                    parse_time: clock.lap(),
                    payload,
                };
                if action == "create" {
                    FirehoseRecord::Create(record)
                } else {
                    FirehoseRecord::Update(record)
                }
            }
            "delete" => FirehoseRecord::Delete(DeleteRecord {
                repo: commit.repo.clone(),
                uri: at_uri(&commit.repo, &path),
                path,
                since: commit.since.clone(),
                time: commit.time.clone(),
                receive_timestamp: Some(clock.received),
                parse_time: clock.lap(),
            }),
            other => fail(clock, format!("Unknown action {other:?} at commit.ops[{index}]")),
        }
    }
}

/// Index the blocks of a commit's embedded CAR by CID.
///
/// Blocks are decoded only when an op asks for them.
fn read_blocks(car: Bytes) -> Result<HashMap<Cid, Bytes>, FrameError> {
    let reader = CarReader::new(car)?;
    let mut blocks = HashMap::new();
    for block in reader {
        let block = block?;
        blocks.insert(block.cid, block.bytes);
    }
    Ok(blocks)
}

fn identity(body: &Value, clock: &mut Clock) -> Result<FirehoseRecord, FrameError> {
    let did = body.get("did").and_then(Value::as_str).ok_or(FrameError::Malformed {
        frame: IDENTITY,
        reason: "missing `did`",
    })?;
    Ok(FirehoseRecord::Identity(IdentityRecord {
        did: SmolStr::new(did),
        handle: body.get("handle").and_then(Value::as_str).map(SmolStr::new),
        seq: body.get("seq").and_then(Value::as_integer),
        time: body.get("time").and_then(Value::as_str).map(SmolStr::new),
        receive_timestamp: Some(clock.received),
        parse_time: clock.lap(),
    }))
}

fn account(body: &Value, clock: &mut Clock) -> Result<FirehoseRecord, FrameError> {
    let malformed = |reason| FrameError::Malformed {
        frame: ACCOUNT,
        reason,
    };
    let did = body
        .get("did")
        .and_then(Value::as_str)
        .ok_or(malformed("missing `did`"))?;
    let active = body
        .get("active")
        .and_then(Value::as_bool)
        .ok_or(malformed("missing boolean `active`"))?;
    Ok(FirehoseRecord::Account(AccountRecord {
        did: SmolStr::new(did),
        active,
        status: body.get("status").and_then(Value::as_str).map(SmolStr::new),
        seq: body.get("seq").and_then(Value::as_integer),
        time: body.get("time").and_then(Value::as_str).map(SmolStr::new),
        receive_timestamp: Some(clock.received),
        parse_time: clock.lap(),
    }))
}

//! Decoded output records
//!
//! Both the bulk repository decoder and the firehose decoder produce
//! [`FirehoseRecord`] values. Application payloads are carried verbatim as a
//! decoded [`Map`]; no schema is applied to them.

use chrono::{DateTime, Utc};
use cirrus_codec::cbor::{Map, Value};
use n0_future::time::Duration;
use smol_str::{SmolStr, format_smolstr};

/// Build an `at://` URI from a repo DID and a record path.
pub fn at_uri(repo: &str, path: &str) -> SmolStr {
    format_smolstr!("at://{repo}/{path}")
}

/// A record in a repository, with its location when known
#[derive(Debug, Clone, PartialEq)]
pub struct RepoRecord {
    /// Repository DID
    pub repo: SmolStr,
    /// `at://{repo}/{path}`, when the path is known
    pub uri: Option<SmolStr>,
    /// `collection/rkey`, when the path is known
    pub path: Option<SmolStr>,
    /// Canonical string of the record CID
    pub cid: SmolStr,
    /// The record's `$type`
    pub record_type: SmolStr,
    /// Previous revision of the repository (firehose only)
    pub since: Option<SmolStr>,
    /// Time the commit was broadcast (firehose only)
    pub time: Option<SmolStr>,
    /// Time the frame carrying this record was received
    pub receive_timestamp: Option<DateTime<Utc>>,
    /// Decode time attributed to this record
    pub parse_time: Duration,
    /// Decoded record body, `$type` included
    pub payload: Map,
}

impl RepoRecord {
    /// A payload field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Collection NSID, taken from the path
    pub fn collection(&self) -> Option<&str> {
        Some(self.path.as_deref()?.split_once('/')?.0)
    }
}

/// A record removed by a commit
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRecord {
    /// Repository DID
    pub repo: SmolStr,
    /// `at://{repo}/{path}`
    pub uri: SmolStr,
    /// `collection/rkey`
    pub path: SmolStr,
    /// Previous revision of the repository
    pub since: Option<SmolStr>,
    /// Time the commit was broadcast
    pub time: Option<SmolStr>,
    /// Time the frame was received
    pub receive_timestamp: Option<DateTime<Utc>>,
    /// Decode time attributed to this record
    pub parse_time: Duration,
}

/// An `#identity` notice
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    /// Account DID
    pub did: SmolStr,
    /// New handle, if the notice carries one
    pub handle: Option<SmolStr>,
    /// Stream sequence number
    pub seq: Option<i64>,
    /// Time the notice was broadcast
    pub time: Option<SmolStr>,
    /// Time the frame was received
    pub receive_timestamp: Option<DateTime<Utc>>,
    /// Decode time of the frame
    pub parse_time: Duration,
}

/// An `#account` status notice
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRecord {
    /// Account DID
    pub did: SmolStr,
    /// Whether the account is active
    pub active: bool,
    /// Reason the account is inactive, if any
    pub status: Option<SmolStr>,
    /// Stream sequence number
    pub seq: Option<i64>,
    /// Time the notice was broadcast
    pub time: Option<SmolStr>,
    /// Time the frame was received
    pub receive_timestamp: Option<DateTime<Utc>>,
    /// Decode time of the frame
    pub parse_time: Duration,
}

/// A recovered decode failure
///
/// Produced in place of the record or frame that could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    /// Human-readable description
    pub message: String,
    /// Time the frame was received
    pub receive_timestamp: Option<DateTime<Utc>>,
    /// Decode time spent before the failure
    pub parse_time: Duration,
    /// Where the failure happened: op index, path, cid, repo, remote error name
    pub context: Map,
}

impl ErrorRecord {
    /// An error with an empty context
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            receive_timestamp: None,
            parse_time: Duration::ZERO,
            context: Map::new(),
        }
    }

    /// Add a context entry
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key, value.into());
        self
    }
}

/// A frame of a kind without a dedicated record, passed through as decoded
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    /// Frame type from the header, e.g. `#info`
    pub frame_type: SmolStr,
    /// Decoded frame body
    pub body: Value,
    /// Time the frame was received
    pub receive_timestamp: Option<DateTime<Utc>>,
    /// Decode time of the frame
    pub parse_time: Duration,
}

/// Every kind of decoded output
#[derive(Debug, Clone, PartialEq)]
pub enum FirehoseRecord {
    /// Record created by a commit
    Create(RepoRecord),
    /// Record updated by a commit
    Update(RepoRecord),
    /// Record read from a repository export
    Stored(RepoRecord),
    /// Record deleted by a commit
    Delete(DeleteRecord),
    /// Identity change notice
    Identity(IdentityRecord),
    /// Account status notice
    Account(AccountRecord),
    /// Recovered decode failure
    Error(ErrorRecord),
    /// Any other frame
    Frame(FrameRecord),
}

impl FirehoseRecord {
    /// The `$type` of the output record
    ///
    /// Repository records report their payload type; other kinds report a
    /// fixed name.
    pub fn record_type(&self) -> &str {
        match self {
            Self::Create(r) | Self::Update(r) | Self::Stored(r) => r.record_type.as_str(),
            Self::Delete(_) => "delete",
            Self::Identity(_) => "identity",
            Self::Account(_) => "account",
            Self::Error(_) => "error",
            Self::Frame(f) => f.frame_type.as_str(),
        }
    }

    /// `create`, `update` or `delete` for commit ops
    pub fn action(&self) -> Option<&'static str> {
        match self {
            Self::Create(_) => Some("create"),
            Self::Update(_) => Some("update"),
            Self::Delete(_) => Some("delete"),
            _ => None,
        }
    }

    /// The repository record, for create, update and stored records
    pub fn as_repo_record(&self) -> Option<&RepoRecord> {
        match self {
            Self::Create(r) | Self::Update(r) | Self::Stored(r) => Some(r),
            _ => None,
        }
    }

    /// Whether this is an error record
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Decode time attributed to this record
    pub fn parse_time(&self) -> Duration {
        match self {
            Self::Create(r) | Self::Update(r) | Self::Stored(r) => r.parse_time,
            Self::Delete(r) => r.parse_time,
            Self::Identity(r) => r.parse_time,
            Self::Account(r) => r.parse_time,
            Self::Error(r) => r.parse_time,
            Self::Frame(r) => r.parse_time,
        }
    }
}

/// Records produced by one unit of decode work
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseBatch {
    /// Records in emission order, possibly empty
    pub records: Vec<FirehoseRecord>,
    /// Active decode time of this unit
    pub parse_time: Duration,
    /// Active decode time since the session started, suspensions excluded
    pub total_parse_time: Duration,
}

impl ParseBatch {
    /// Number of records in the batch
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch carries no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl IntoIterator for ParseBatch {
    type Item = FirehoseRecord;
    type IntoIter = std::vec::IntoIter<FirehoseRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

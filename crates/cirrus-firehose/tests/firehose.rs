//! Frame and stream decoding over frames built with the reference encoder

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use chrono::Utc;
use cirrus_codec::Value;
use cirrus_firehose::{
    FirehoseConfig, FirehoseRecord, FirehoseStream, FrameDecoder, MessageStream, StreamError,
    StreamErrorKind, WebSocketClient, WsMessage, subscribe_repos,
};
use ipld_core::ipld::Ipld;
use iroh_car::{CarHeader, CarWriter};
use n0_future::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use url::Url;

const REPO: &str = "did:plc:ewvi7nxzyoun6zhxrhs64oiz";

fn map<const N: usize>(entries: [(&str, Ipld); N]) -> Ipld {
    Ipld::Map(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<BTreeMap<_, _>>(),
    )
}

fn text(s: &str) -> Ipld {
    Ipld::String(s.to_string())
}

fn frame(frame_type: &str, body: &Ipld) -> Bytes {
    let header = map([("op", Ipld::Integer(1)), ("t", text(frame_type))]);
    let mut out = serde_ipld_dagcbor::to_vec(&header).unwrap();
    out.extend(serde_ipld_dagcbor::to_vec(body).unwrap());
    Bytes::from(out)
}

fn block(value: &Ipld) -> (cid::Cid, Vec<u8>) {
    let data = serde_ipld_dagcbor::to_vec(value).unwrap();
    let mh = cid::multihash::Multihash::<64>::wrap(0x12, &Sha256::digest(&data)).unwrap();
    (cid::Cid::new_v1(0x71, mh), data)
}

fn like(subject: &str) -> Ipld {
    map([
        ("$type", text("app.bsky.feed.like")),
        ("createdAt", text("2024-01-01T00:00:00Z")),
        ("subject", map([("uri", text(subject))])),
    ])
}

async fn car(blocks: Vec<(cid::Cid, Vec<u8>)>) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut writer = CarWriter::new(CarHeader::new_v1(vec![blocks[0].0]), &mut buf);
    for (cid, data) in blocks {
        writer.write(cid, data).await.unwrap();
    }
    writer.finish().await.unwrap();
    buf.flush().await.unwrap();
    buf
}

fn op(action: &str, path: &str, cid: Option<cid::Cid>) -> Ipld {
    let mut op = BTreeMap::new();
    op.insert("action".to_string(), text(action));
    op.insert("path".to_string(), text(path));
    op.insert("cid".to_string(), cid.map(Ipld::Link).unwrap_or(Ipld::Null));
    Ipld::Map(op)
}

fn commit(ops: Vec<Ipld>, blocks: Vec<u8>) -> Ipld {
    map([
        ("repo", text(REPO)),
        ("rev", text("3l3qo2vuowo2b")),
        ("seq", Ipld::Integer(42)),
        ("since", text("3l3qo2vutsw2b")),
        ("time", text("2024-01-01T00:00:01Z")),
        ("ops", Ipld::List(ops)),
        ("blocks", Ipld::Bytes(blocks)),
    ])
}

#[test]
fn test_delete_frame() {
    let body = map([(
        "ops",
        Ipld::List(vec![map([
            ("action", text("delete")),
            ("path", text("app.bsky.feed.post/abc")),
        ])]),
    )]);
    let records = FrameDecoder::default().decode_frame(&frame("#commit", &body), Utc::now());

    assert_eq!(records.len(), 1);
    let FirehoseRecord::Delete(delete) = &records[0] else {
        panic!("expected a delete record, got {:?}", records[0]);
    };
    assert_eq!(delete.path, "app.bsky.feed.post/abc");
    assert_eq!(records[0].action(), Some("delete"));
    assert!(records[0].as_repo_record().is_none());
}

#[tokio::test]
async fn test_unresolved_op_does_not_sink_the_commit() {
    let (first, first_data) = block(&like("at://did:plc:a/app.bsky.feed.post/1"));
    let (second, second_data) = block(&like("at://did:plc:a/app.bsky.feed.post/2"));
    let (missing, _) = block(&like("at://did:plc:a/app.bsky.feed.post/3"));
    let blocks = car(vec![(first, first_data), (second, second_data)]).await;

    let body = commit(
        vec![
            op("create", "app.bsky.feed.like/1", Some(first)),
            op("create", "app.bsky.feed.like/3", Some(missing)),
            op("update", "app.bsky.feed.like/2", Some(second)),
            op("delete", "app.bsky.feed.like/0", None),
        ],
        blocks,
    );
    let received = Utc::now();
    let records = FrameDecoder::default().decode_frame(&frame("#commit", &body), received);
    assert_eq!(records.len(), 4);
    assert_eq!(records.iter().filter(|r| r.is_error()).count(), 1);

    let FirehoseRecord::Create(created) = &records[0] else {
        panic!("expected a create record, got {:?}", records[0]);
    };
    assert_eq!(created.repo, REPO);
    assert_eq!(created.path.as_deref(), Some("app.bsky.feed.like/1"));
    assert_eq!(
        created.uri.as_deref(),
        Some(format!("at://{REPO}/app.bsky.feed.like/1").as_str())
    );
    assert_eq!(created.cid, first.to_string());
    assert_eq!(created.record_type, "app.bsky.feed.like");
    assert_eq!(created.since.as_deref(), Some("3l3qo2vutsw2b"));
    assert_eq!(created.time.as_deref(), Some("2024-01-01T00:00:01Z"));
    assert_eq!(created.receive_timestamp, Some(received));
    assert_eq!(
        created
            .get("subject")
            .and_then(|s| s.get("uri"))
            .and_then(Value::as_str),
        Some("at://did:plc:a/app.bsky.feed.post/1")
    );

    let FirehoseRecord::Error(error) = &records[1] else {
        panic!("expected an error record, got {:?}", records[1]);
    };
    assert_eq!(
        error.message,
        format!("Unresolved commit.ops[1].cid {missing}")
    );
    assert_eq!(error.context.get("index"), Some(&Value::Integer(1)));
    assert_eq!(
        error.context.get("path").and_then(Value::as_str),
        Some("app.bsky.feed.like/3")
    );

    let FirehoseRecord::Update(updated) = &records[2] else {
        panic!("expected an update record, got {:?}", records[2]);
    };
    assert_eq!(updated.cid, second.to_string());
    assert!(matches!(records[3], FirehoseRecord::Delete(_)));
}

#[test]
fn test_missing_cid_and_unknown_action() {
    let body = commit(
        vec![
            op("create", "app.bsky.feed.like/1", None),
            op("archive", "app.bsky.feed.like/2", None),
        ],
        Vec::new(),
    );
    let records = FrameDecoder::default().decode_frame(&frame("#commit", &body), Utc::now());
    let messages: Vec<&str> = records
        .iter()
        .map(|r| match r {
            FirehoseRecord::Error(e) => e.message.as_str(),
            other => panic!("expected an error record, got {other:?}"),
        })
        .collect();
    assert_eq!(
        messages,
        [
            "Missing commit.ops[0].cid",
            "Unknown action \"archive\" at commit.ops[1]"
        ]
    );
}

#[test]
fn test_identity_and_account_frames() {
    let decoder = FrameDecoder::default();

    let identity = map([
        ("did", text(REPO)),
        ("handle", text("alice.test")),
        ("seq", Ipld::Integer(7)),
        ("time", text("2024-01-01T00:00:00Z")),
    ]);
    let records = decoder.decode_frame(&frame("#identity", &identity), Utc::now());
    let FirehoseRecord::Identity(identity) = &records[0] else {
        panic!("expected an identity record, got {:?}", records[0]);
    };
    assert_eq!(identity.did, REPO);
    assert_eq!(identity.handle.as_deref(), Some("alice.test"));
    assert_eq!(identity.seq, Some(7));

    let account = map([
        ("did", text(REPO)),
        ("active", Ipld::Bool(false)),
        ("status", text("takendown")),
        ("seq", Ipld::Integer(8)),
    ]);
    let records = decoder.decode_frame(&frame("#account", &account), Utc::now());
    let FirehoseRecord::Account(account) = &records[0] else {
        panic!("expected an account record, got {:?}", records[0]);
    };
    assert!(!account.active);
    assert_eq!(account.status.as_deref(), Some("takendown"));

    // an account frame without `active` is malformed
    let broken = map([("did", text(REPO))]);
    let records = decoder.decode_frame(&frame("#account", &broken), Utc::now());
    assert_eq!(records.len(), 1);
    assert!(records[0].is_error());
}

fn delete_frame(rkey: &str) -> WsMessage {
    let body = commit(vec![op("delete", &format!("app.bsky.feed.post/{rkey}"), None)], Vec::new());
    WsMessage::Binary(frame("#commit", &body))
}

#[tokio::test]
async fn test_stream_ends_on_close() {
    let messages = MessageStream::new(futures::stream::iter(vec![
        Ok(delete_frame("a")),
        Ok(WsMessage::from("hello")),
        Ok(WsMessage::Binary(Bytes::from_static(&[0xff]))),
        Ok(delete_frame("b")),
        Ok(WsMessage::Close(Some(1000))),
        Ok(delete_frame("never")),
    ]));
    let mut stream = FirehoseStream::new(messages, FrameDecoder::default());

    let mut batches = Vec::new();
    while let Some(batch) = stream.next().await {
        batches.push(batch.unwrap());
    }
    assert_eq!(batches.len(), 4);
    assert!(batches.iter().all(|b| b.len() == 1));
    assert!(batches[1].records[0].is_error());
    assert!(batches[2].records[0].is_error());
    assert_eq!(batches[3].records[0].action(), Some("delete"));
    assert!(batches[3].total_parse_time >= batches[0].parse_time);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_transport_error_is_terminal() {
    let failure = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
    let messages = MessageStream::new(futures::stream::iter(vec![
        Ok(delete_frame("a")),
        Err(StreamError::transport(failure)),
        Ok(delete_frame("b")),
    ]));
    let mut stream = FirehoseStream::new(messages, FrameDecoder::default());

    assert!(stream.next().await.unwrap().is_ok());
    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.kind(), &StreamErrorKind::Transport);
    assert!(stream.next().await.is_none());
}

#[derive(Clone, Default)]
struct CannedClient {
    connected: Arc<Mutex<Option<Url>>>,
}

impl WebSocketClient for CannedClient {
    type Error = std::io::Error;

    async fn connect(&self, url: Url) -> Result<MessageStream, Self::Error> {
        *self.connected.lock().unwrap() = Some(url);
        Ok(MessageStream::new(futures::stream::iter(vec![Ok(
            delete_frame("c"),
        )])))
    }
}

#[tokio::test]
async fn test_subscribe_repos_uses_the_configured_relay() {
    let client = CannedClient::default();
    let config = FirehoseConfig::new()
        .relay("wss://relay.example.com")
        .cursor(99)
        .build();
    let mut stream = subscribe_repos(&client, &config).await.unwrap();

    let batch = stream.next().await.unwrap().unwrap();
    assert_eq!(batch.len(), 1);
    assert!(stream.next().await.is_none());
    assert_eq!(
        client.connected.lock().unwrap().as_ref().map(Url::as_str),
        Some("wss://relay.example.com/xrpc/com.atproto.sync.subscribeRepos?cursor=99")
    );
}

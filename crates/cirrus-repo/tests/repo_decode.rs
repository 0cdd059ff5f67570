//! End-to-end repository decoding over CARs built with the reference writer

use std::collections::BTreeMap;

use bytes::Bytes;
use cirrus_codec::Value;
use cirrus_codec::varint;
use cirrus_repo::{FirehoseRecord, RepoDecoder, RepoRecord, decode_repository, decode_repository_async};
use ipld_core::ipld::Ipld;
use iroh_car::{CarHeader, CarWriter};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

const DID: &str = "did:plc:ewvi7nxzyoun6zhxrhs64oiz";

fn cid_for(codec: u64, data: &[u8]) -> cid::Cid {
    let mh = cid::multihash::Multihash::<64>::wrap(0x12, &Sha256::digest(data)).unwrap();
    cid::Cid::new_v1(codec, mh)
}

fn block(value: &Ipld) -> (cid::Cid, Vec<u8>) {
    let data = serde_ipld_dagcbor::to_vec(value).unwrap();
    (cid_for(0x71, &data), data)
}

fn post(text: &str) -> Ipld {
    let mut map = BTreeMap::new();
    map.insert("$type".to_string(), Ipld::String("app.bsky.feed.post".into()));
    map.insert("text".to_string(), Ipld::String(text.into()));
    map.insert(
        "createdAt".to_string(),
        Ipld::String("2024-01-01T00:00:00Z".into()),
    );
    Ipld::Map(map)
}

/// A single leaf node over sorted `(key, cid)` pairs, prefix-compressed
fn mst_node(leaves: &[(&str, cid::Cid)]) -> Ipld {
    let mut entries = Vec::new();
    let mut last: &[u8] = b"";
    for (key, cid) in leaves {
        let key = key.as_bytes();
        let prefix = last.iter().zip(key).take_while(|(a, b)| a == b).count();
        let mut entry = BTreeMap::new();
        entry.insert("k".to_string(), Ipld::Bytes(key[prefix..].to_vec()));
        entry.insert("p".to_string(), Ipld::Integer(prefix as i128));
        entry.insert("t".to_string(), Ipld::Null);
        entry.insert("v".to_string(), Ipld::Link(*cid));
        entries.push(Ipld::Map(entry));
        last = key;
    }
    let mut node = BTreeMap::new();
    node.insert("e".to_string(), Ipld::List(entries));
    node.insert("l".to_string(), Ipld::Null);
    Ipld::Map(node)
}

fn commit(data: cid::Cid) -> Ipld {
    let mut map = BTreeMap::new();
    map.insert("did".to_string(), Ipld::String(DID.into()));
    map.insert("version".to_string(), Ipld::Integer(3));
    map.insert("data".to_string(), Ipld::Link(data));
    map.insert("rev".to_string(), Ipld::String("3l3qo2vuowo2b".into()));
    map.insert("prev".to_string(), Ipld::Null);
    map.insert("sig".to_string(), Ipld::Bytes(vec![0; 64]));
    Ipld::Map(map)
}

async fn make_car(roots: Vec<cid::Cid>, blocks: Vec<(cid::Cid, Vec<u8>)>) -> Bytes {
    let mut buf = Vec::new();
    let mut writer = CarWriter::new(CarHeader::new_v1(roots), &mut buf);
    for (cid, data) in blocks {
        writer.write(cid, data).await.unwrap();
    }
    writer.finish().await.unwrap();
    buf.flush().await.unwrap();
    Bytes::from(buf)
}

struct Fixture {
    car: Bytes,
    commit: cid::Cid,
    mst: cid::Cid,
    posts: Vec<(&'static str, cid::Cid)>,
    orphan: cid::Cid,
}

/// Commit, one MST node, three posts (one unreferenced) and a raw blob.
/// The node comes after the records it names.
async fn fixture() -> Fixture {
    let (first, first_data) = block(&post("first"));
    let (second, second_data) = block(&post("second"));
    let (orphan, orphan_data) = block(&post("not in the tree"));
    let posts = vec![
        ("app.bsky.feed.post/3jzfcijpj2z2a", first),
        ("app.bsky.feed.post/3jzfcijpj2z2b", second),
    ];
    let (mst, mst_data) = block(&mst_node(&posts));
    let (commit_cid, commit_data) = block(&commit(mst));
    let blob = b"\x89PNG not really".to_vec();

    let car = make_car(
        vec![commit_cid],
        vec![
            (commit_cid, commit_data),
            (first, first_data),
            (cid_for(0x55, &blob), blob),
            (orphan, orphan_data),
            (second, second_data),
            (mst, mst_data),
        ],
    )
    .await;

    Fixture {
        car,
        commit: commit_cid,
        mst,
        posts,
        orphan,
    }
}

fn stored(records: &[FirehoseRecord]) -> Vec<&RepoRecord> {
    records
        .iter()
        .map(|record| match record {
            FirehoseRecord::Stored(record) => record,
            other => panic!("unexpected record {other:?}"),
        })
        .collect()
}

#[test]
fn test_single_block_without_mst() {
    // {"roots": [], "version": 1}, hand-framed: the reference writer wants a root
    let header = [
        0xa2, 0x65, b'r', b'o', b'o', b't', b's', 0x80, 0x67, b'v', b'e', b'r', b's', b'i', b'o',
        b'n', 0x01,
    ];
    let (cid, data) = block(&post("hi"));
    let mut car = Vec::new();
    varint::encode_into(header.len() as u64, &mut car);
    car.extend_from_slice(&header);
    varint::encode_into((cid.to_bytes().len() + data.len()) as u64, &mut car);
    car.extend_from_slice(&cid.to_bytes());
    car.extend_from_slice(&data);

    let records = decode_repository(Bytes::from(car), "did:plc:test").unwrap();
    let records = stored(&records);
    assert_eq!(records.len(), 1);

    let record = records[0];
    assert_eq!(record.repo, "did:plc:test");
    assert_eq!(record.cid, cid.to_string());
    assert_eq!(record.record_type, "app.bsky.feed.post");
    assert_eq!(record.get("text").and_then(Value::as_str), Some("hi"));
    assert_eq!(
        record.get("createdAt").and_then(Value::as_str),
        Some("2024-01-01T00:00:00Z")
    );
    assert_eq!(record.payload.len(), 3);
    assert!(record.path.is_none());
    assert!(record.uri.is_none());
}

#[tokio::test]
async fn test_paths_come_from_the_mst() {
    let fixture = fixture().await;
    let records = decode_repository(fixture.car, DID).unwrap();
    let records = stored(&records);

    // every block with a $type, in block order
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].cid, fixture.posts[0].1.to_string());
    assert_eq!(records[1].cid, fixture.orphan.to_string());
    assert_eq!(records[2].cid, fixture.posts[1].1.to_string());

    for (path, cid) in &fixture.posts {
        let record = records
            .iter()
            .find(|r| r.cid == cid.to_string())
            .unwrap();
        assert_eq!(record.path.as_deref(), Some(*path));
        assert_eq!(
            record.uri.as_deref(),
            Some(format!("at://{DID}/{path}").as_str())
        );
        assert_eq!(record.collection(), Some("app.bsky.feed.post"));
    }
    assert!(records[1].path.is_none());
    assert!(records[1].uri.is_none());
}

#[tokio::test]
async fn test_commit_is_captured() {
    let fixture = fixture().await;
    let mut decoder = RepoDecoder::new(fixture.car, DID).unwrap();
    assert_eq!(decoder.commit(), None);
    for batch in decoder.by_ref() {
        batch.unwrap();
    }

    let commit = decoder.commit().unwrap();
    assert_eq!(commit.did, DID);
    assert_eq!(commit.version, 3);
    assert_eq!(commit.rev.as_deref(), Some("3l3qo2vuowo2b"));
    assert_eq!(
        commit.data.as_ref().map(ToString::to_string),
        Some(fixture.mst.to_string())
    );
    assert_eq!(commit.prev, None);
    assert!(decoder.errors().is_empty());
    assert_ne!(fixture.commit.to_string(), fixture.mst.to_string());
}

#[tokio::test]
async fn test_chunk_size_does_not_change_output() {
    let fixture = fixture().await;
    let expected = decode_repository(fixture.car.clone(), DID).unwrap();

    for chunk_size in [1, 2, 3, 7] {
        let decoder = RepoDecoder::new(fixture.car.clone(), DID)
            .unwrap()
            .with_chunk_size(chunk_size);
        let mut records = Vec::new();
        let mut batches = 0;
        for batch in decoder {
            let batch = batch.unwrap();
            assert!(batch.len() <= chunk_size);
            records.extend(batch);
            batches += 1;
        }
        assert!(batches > 1);
        assert_eq!(strip_timing(records), strip_timing(expected.clone()));
    }
}

#[tokio::test]
async fn test_async_decode_matches_sync() {
    let fixture = fixture().await;
    let sync = decode_repository(fixture.car.clone(), DID).unwrap();
    let async_records = decode_repository_async(fixture.car, DID, 2).await.unwrap();
    assert_eq!(strip_timing(sync), strip_timing(async_records));
}

#[tokio::test]
async fn test_mst_before_records() {
    let (record_cid, record_data) = block(&post("early node"));
    let path = "app.bsky.feed.like/3k";
    let (mst, mst_data) = block(&mst_node(&[(path, record_cid)]));
    let car = make_car(
        vec![mst],
        vec![(mst, mst_data), (record_cid, record_data)],
    )
    .await;

    let records = decode_repository(car, DID).unwrap();
    let records = stored(&records);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path.as_deref(), Some(path));
}

fn strip_timing(records: Vec<FirehoseRecord>) -> Vec<FirehoseRecord> {
    records
        .into_iter()
        .map(|record| match record {
            FirehoseRecord::Stored(mut r) => {
                r.parse_time = Default::default();
                FirehoseRecord::Stored(r)
            }
            other => other,
        })
        .collect()
}

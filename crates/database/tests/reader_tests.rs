//! Streaming reader behavior and resource release.

mod common;

use binstore_core::ContentKey;
use binstore_database::ContentStore;
use common::{ReleaseTracker, TestDatabase};
use std::io::{BufRead, Read, Seek, SeekFrom};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt};

const PAYLOAD: &[u8] = b"0123456789abcdef";

async fn store_with_payload(db: &TestDatabase) -> (ContentStore, ContentKey) {
    let store = db.open_store().await;
    let mut conn = db.acquire().await;
    let key = store.put(&mut conn, PAYLOAD).await.unwrap();
    (store, key)
}

#[tokio::test]
async fn test_skip_mark_reset() {
    let db = TestDatabase::new().await;
    let (store, key) = store_with_payload(&db).await;
    let tracker = ReleaseTracker::new();

    let mut reader = store
        .read(tracker.track(db.connect().await), &key)
        .await
        .unwrap()
        .expect("payload should exist");
    assert_eq!(reader.key(), &key);
    assert_eq!(reader.len(), PAYLOAD.len() as u64);

    assert_eq!(reader.skip(4), 4);
    reader.mark();
    let mut buf = [0u8; 3];
    Read::read_exact(&mut reader, &mut buf).unwrap();
    assert_eq!(&buf, b"456");

    reader.reset();
    assert_eq!(reader.position(), 4);
    Read::read_exact(&mut reader, &mut buf).unwrap();
    assert_eq!(&buf, b"456");

    assert_eq!(reader.skip(100), 9);
    assert_eq!(reader.remaining(), 0);
    assert_eq!(Read::read(&mut reader, &mut buf).unwrap(), 0);

    Seek::seek(&mut reader, SeekFrom::Start(10)).unwrap();
    assert_eq!(BufRead::fill_buf(&mut reader).unwrap(), b"abcdef");

    assert_eq!(tracker.released(), 0);
    reader.close().await;
    assert_eq!(tracker.released(), 1);
}

#[tokio::test]
async fn test_async_read_and_seek() {
    let db = TestDatabase::new().await;
    let (store, key) = store_with_payload(&db).await;

    let mut reader = store
        .read(db.acquire().await, &key)
        .await
        .unwrap()
        .expect("payload should exist");

    let mut line = String::new();
    AsyncBufReadExt::read_line(&mut reader, &mut line)
        .await
        .unwrap();
    assert_eq!(line.as_bytes(), PAYLOAD);

    AsyncSeekExt::seek(&mut reader, SeekFrom::Start(0))
        .await
        .unwrap();
    let mut head = [0u8; 2];
    AsyncReadExt::read_exact(&mut reader, &mut head).await.unwrap();
    assert_eq!(&head, b"01");

    let rest = reader.into_bytes().await;
    assert_eq!(&rest[..], &PAYLOAD[2..]);
}

#[tokio::test]
async fn test_close_swallows_release_failure() {
    let db = TestDatabase::new().await;
    let (store, key) = store_with_payload(&db).await;
    let tracker = ReleaseTracker::new();

    let mut reader = store
        .read(tracker.track_failing(db.connect().await), &key)
        .await
        .unwrap()
        .expect("payload should exist");
    let mut data = Vec::new();
    Read::read_to_end(&mut reader, &mut data).unwrap();
    assert_eq!(data, PAYLOAD);

    reader.close().await;
    assert_eq!(tracker.released(), 1);
}

#[tokio::test]
async fn test_drop_returns_pooled_connection() {
    let db = TestDatabase::with_max_connections(1).await;
    let (store, key) = store_with_payload(&db).await;

    let reader = store
        .read(db.acquire().await, &key)
        .await
        .unwrap()
        .expect("payload should exist");
    assert!(reader.is_open());
    drop(reader);

    // The only pooled connection must be available again.
    let mut conn = db.acquire().await;
    assert!(store.exists(&mut conn, &key, true).await);
}

#[tokio::test]
async fn test_reader_survives_concurrent_collection() {
    let db = TestDatabase::new().await;
    let (store, key) = store_with_payload(&db).await;

    let mut reader = store
        .read(db.acquire().await, &key)
        .await
        .unwrap()
        .expect("payload should exist");

    let mut conn = db.acquire().await;
    let now = time::OffsetDateTime::now_utc();
    store
        .mark_unused(&mut conn, std::slice::from_ref(&key), now)
        .await
        .unwrap();
    store
        .remove_expired(&mut conn, now + time::Duration::seconds(1))
        .await
        .unwrap();

    let mut data = Vec::new();
    AsyncReadExt::read_to_end(&mut reader, &mut data)
        .await
        .unwrap();
    assert_eq!(data, PAYLOAD);
    reader.close().await;
}

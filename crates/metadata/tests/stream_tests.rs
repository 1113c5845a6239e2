// Record stream tests: ordering, per-row errors, the futures::Stream surface,
// and release of the underlying cursor when a consumer stops early.

mod common;

use common::TestMetadata;
use folio_metadata::{FileRepo, MetadataError, TagRepo};
use futures::StreamExt;
use std::time::Duration;
use time::Date;
use time::macros::date;

async fn seed_files(meta: &TestMetadata, count: usize) {
    let base = date!(2020 - 01 - 01);
    for i in 0..count {
        meta.file(&format!("file-{i:03}"), base).await;
    }
}

#[tokio::test]
async fn test_all_files_streams_in_filename_order() {
    let meta = TestMetadata::new().await.unwrap();
    meta.file("b", date!(2020 - 01 - 01)).await;
    meta.file("a", date!(2020 - 01 - 02)).await;
    meta.file("c", date!(2019 - 01 - 01)).await;

    let mut stream = meta.store.all_files().await.unwrap();
    let mut names = Vec::new();
    while let Some(file) = stream.next().await {
        names.push(file.unwrap().filename);
    }
    assert_eq!(names, vec!["a", "b", "c"]);

    // Exhausted streams keep returning None.
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_row_decode_error_does_not_end_stream() {
    let meta = TestMetadata::new().await.unwrap();
    meta.file("a", date!(2020 - 01 - 01)).await;
    meta.file("c", date!(2020 - 01 - 01)).await;

    sqlx::query("INSERT INTO files (id, filename, document_date) VALUES (?, ?, ?)")
        .bind("not-a-uuid")
        .bind("b")
        .bind(date!(2020 - 01 - 01))
        .execute(meta.store.pool())
        .await
        .unwrap();

    let items: Vec<_> = meta.store.all_files().await.unwrap().collect().await;
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].as_ref().unwrap().filename, "a");
    assert!(matches!(items[1], Err(MetadataError::Database(_))));
    assert_eq!(items[2].as_ref().unwrap().filename, "c");
}

#[tokio::test]
async fn test_record_stream_implements_stream() {
    let meta = TestMetadata::new().await.unwrap();
    seed_files(&meta, 5).await;

    let stream = meta.store.all_files().await.unwrap();
    let first_two: Vec<_> = StreamExt::take(stream, 2)
        .map(|item| item.unwrap().filename)
        .collect()
        .await;
    assert_eq!(first_two, vec!["file-000", "file-001"]);
}

#[tokio::test]
async fn test_close_releases_connection_without_draining() {
    // A single pooled connection: a leaked cursor would starve the lookup below.
    let meta = TestMetadata::with_max_connections(1).await.unwrap();
    seed_files(&meta, 200).await;

    let mut stream = meta.store.all_files().await.unwrap();
    for _ in 0..3 {
        stream.next().await.unwrap().unwrap();
    }
    stream.close().await;

    let lookup = tokio::time::timeout(
        Duration::from_secs(5),
        meta.store.get_file_with_date("file-150", date!(2020 - 01 - 01)),
    )
    .await
    .expect("connection was not released by close()");
    assert!(lookup.unwrap().is_some());
}

#[tokio::test]
async fn test_drop_releases_connection_without_draining() {
    let meta = TestMetadata::with_max_connections(1).await.unwrap();
    seed_files(&meta, 200).await;

    let mut stream = meta.store.all_files().await.unwrap();
    stream.next().await.unwrap().unwrap();
    drop(stream);

    let years = tokio::time::timeout(Duration::from_secs(5), meta.store.get_file_years())
        .await
        .expect("connection was not released after drop");
    assert_eq!(years.unwrap(), vec![2020]);
}

#[tokio::test]
async fn test_unconsumed_stream_does_not_block_after_close() {
    let meta = TestMetadata::with_max_connections(1).await.unwrap();
    seed_files(&meta, 10).await;

    let stream = meta.store.all_tags().await.unwrap();
    stream.close().await;

    let date = Date::from_calendar_date(2020, time::Month::January, 1).unwrap();
    let files = tokio::time::timeout(
        Duration::from_secs(5),
        meta.store.find_files_with_date(date),
    )
    .await
    .expect("connection was not released");
    assert_eq!(files.unwrap().len(), 10);
}

//! Persist-once guarantees of the idempotent pipeline

mod common;

use bytes::Bytes;
use chrono::{TimeZone, Utc};
use newsdesk::crawler::pipeline::{IdempotentPipeline, ProcessOutcome, SkipReason};
use newsdesk::models::NewsRecord;
use newsdesk::storage::{
    media_key, FsObjectStore, ImageType, MemoryRecordStore, ObjectStore, RecordStore,
    SqliteRecordStore,
};
use newsdesk::utils::error::PipelineError;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const JPEG: &[u8] = b"\xff\xd8\xff\xe0\0\x10JFIF\0";

/// Concurrent attempts to persist the same item store exactly one record
#[tokio::test]
async fn test_concurrent_duplicates_persist_once() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteRecordStore::new(dir.path().join("news.db")).unwrap());
    let pipeline = Arc::new(IdempotentPipeline::new(store.clone()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline
                    .process(common::create_candidate("tasnim", "12345"))
                    .await
            })
        })
        .collect();

    let mut saved = 0;
    let mut skipped = 0;
    for handle in handles {
        match handle.await.unwrap() {
            ProcessOutcome::Saved => saved += 1,
            ProcessOutcome::Skipped(SkipReason::AlreadyExists) => skipped += 1,
            ProcessOutcome::Failed(e) => panic!("unexpected failure: {e}"),
        }
    }

    assert_eq!(saved, 1);
    assert_eq!(skipped, 7);
    assert_eq!(store.count().await.unwrap(), 1);
}

/// A failed preparation leaves nothing behind, so the next cycle retries
#[tokio::test]
async fn test_failed_prepare_is_retried_next_cycle() {
    let store = Arc::new(MemoryRecordStore::new());
    let pipeline = IdempotentPipeline::new(store.clone());
    let item = common::create_candidate("irna", "77");

    let first = pipeline
        .process_with(item.clone(), |_item| async {
            Err::<NewsRecord, _>(PipelineError::extraction("body selector missing"))
        })
        .await;
    assert!(matches!(first, ProcessOutcome::Failed(_)));
    assert_eq!(store.count().await.unwrap(), 0);

    let second = pipeline.process(item).await;
    assert!(second.is_saved());

    let stats = pipeline.stats();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.saved, 1);
    assert_eq!(stats.failed, 1);
}

/// Preparation is skipped entirely for items already stored
#[tokio::test]
async fn test_known_items_skip_preparation() {
    let store = Arc::new(MemoryRecordStore::new());
    let pipeline = IdempotentPipeline::new(store);
    pipeline.process(common::create_candidate("tasnim", "1")).await;

    let prepared = AtomicBool::new(false);
    let flag = &prepared;
    let outcome = pipeline
        .process_with(common::create_candidate("tasnim", "1"), move |item| async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<_, PipelineError>(NewsRecord::from_candidate(&item))
        })
        .await;
    assert!(matches!(
        outcome,
        ProcessOutcome::Skipped(SkipReason::AlreadyExists)
    ));
    assert!(!prepared.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_media_upload_is_content_addressed() {
    let dir = TempDir::new().unwrap();
    let media = Arc::new(FsObjectStore::open(dir.path().join("media")).await.unwrap());
    let pipeline = IdempotentPipeline::new(Arc::new(MemoryRecordStore::new()))
        .with_media(media.clone(), "news-images");
    let date = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();

    let first = pipeline
        .upload_media("tasnim", date, Bytes::from_static(JPEG))
        .await
        .unwrap();
    let second = pipeline
        .upload_media("tasnim", date, Bytes::from_static(JPEG))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert!(first.key.starts_with("news-images/tasnim/2024/03/09/"));
    assert!(first.key.ends_with(".jpg"));
    assert_eq!(first.content_type, "image/jpeg");
    assert!(media.exists(&first.key).await.unwrap());
    assert_eq!(pipeline.stats().media_bytes, 2 * JPEG.len() as u64);
}

#[tokio::test]
async fn test_media_rejects_non_images() {
    let pipeline = IdempotentPipeline::new(Arc::new(MemoryRecordStore::new()))
        .with_media(Arc::new(newsdesk::storage::MemoryObjectStore::new()), "x");

    let result = pipeline
        .upload_media("tasnim", Utc::now(), Bytes::from_static(b"<html>"))
        .await;
    assert!(matches!(result, Err(PipelineError::Media(_))));
}

proptest! {
    /// However often items repeat, each key is stored once
    #[test]
    fn prop_duplicates_never_stored_twice(ids in prop::collection::vec(0u8..6, 1..40)) {
        let store = Arc::new(MemoryRecordStore::new());
        let pipeline = IdempotentPipeline::new(store.clone());

        let saved = tokio_test::block_on(async {
            let mut saved = 0usize;
            for id in &ids {
                let outcome = pipeline
                    .process(common::create_candidate("tasnim", &id.to_string()))
                    .await;
                if outcome.is_saved() {
                    saved += 1;
                }
            }
            saved
        });

        let distinct: HashSet<_> = ids.iter().collect();
        prop_assert_eq!(saved, distinct.len());
        prop_assert_eq!(store.records().len(), distinct.len());
    }
}

proptest! {
    /// Media keys depend only on their inputs and always keep the layout
    #[test]
    fn prop_media_key_is_deterministic(
        payload in prop::collection::vec(any::<u8>(), 0..256),
        day in 1u32..=28,
    ) {
        let date = Utc.with_ymd_and_hms(2024, 11, day, 8, 30, 0).unwrap();
        let first = media_key("news-images/", "tasnim", date, &payload, ImageType::Png);
        let second = media_key("news-images", "tasnim", date, &payload, ImageType::Png);

        prop_assert_eq!(&first, &second);
        let expected_prefix = format!("news-images/tasnim/2024/11/{day:02}/");
        prop_assert!(first.starts_with(&expected_prefix));
        prop_assert!(first.ends_with(".png"));
    }
}

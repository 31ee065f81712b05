//! Retention tests: count, size and age limits on the whole log.

use std::time::Duration;

use styx_log::{Clock, Error, IoMode, Log, LogConfig, LogWriter, ManualClock, Options, Record};
use tempfile::TempDir;

/// Helper to write `count` records of `size` bytes through an open writer
async fn append(writer: &mut LogWriter, count: usize, size: usize) {
    for _ in 0..count {
        writer.write(&Record::new(vec![7u8; size])).await.unwrap();
    }
}

#[tokio::test]
async fn test_size_retention_keeps_recent_bytes() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig {
        segment_max_size: 100,
        log_max_size: 200,
        ..Default::default()
    };
    let log = Log::create(dir.path().join("log"), config, Options::default())
        .await
        .unwrap();
    let mut writer = log.new_writer(4096, IoMode::Auto).await.unwrap();

    // 25 bytes on disk each, four per segment
    append(&mut writer, 20, 17).await;
    writer.sync().await.unwrap();

    let stat = log.stat();
    assert_eq!(stat.start_offset, 300);
    assert_eq!(stat.start_position, 12);
    assert_eq!(stat.end_offset, 500);
    assert_eq!(log.segments().len(), 2);

    writer.close().await.unwrap();
    log.close().await.unwrap();
}

#[tokio::test]
async fn test_count_retention_never_drops_last_segment() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig {
        log_max_count: 1,
        ..Default::default()
    };
    let log = Log::create(dir.path().join("log"), config, Options::default())
        .await
        .unwrap();
    let mut writer = log.new_writer(4096, IoMode::Auto).await.unwrap();

    append(&mut writer, 50, 10).await;
    writer.sync().await.unwrap();

    assert_eq!(log.segments().len(), 1);
    assert_eq!(log.stat().start_position, 0);
    assert_eq!(log.stat().end_position, 50);

    writer.close().await.unwrap();
    log.close().await.unwrap();
}

#[tokio::test]
async fn test_age_retention_by_expirer() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(1_000);
    let options = Options {
        clock: clock.clone(),
        expire_interval: Duration::from_millis(10),
        ..Default::default()
    };
    let config = LogConfig {
        segment_max_count: 2,
        log_max_age: 60,
        ..Default::default()
    };
    let log = Log::create(dir.path().join("log"), config, options)
        .await
        .unwrap();
    let mut writer = log.new_writer(4096, IoMode::Auto).await.unwrap();

    append(&mut writer, 2, 10).await;
    clock.set(1_100);
    append(&mut writer, 2, 10).await;
    clock.set(1_200);
    append(&mut writer, 2, 10).await;
    writer.sync().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while log.segments().len() > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("expirer removes old segments");

    let stat = log.stat();
    assert_eq!(stat.start_position, 4);
    assert_eq!(stat.start_timestamp, 1_200);
    assert_eq!(stat.end_position, 6);
    assert_eq!(clock.now_unix(), 1_200);

    writer.close().await.unwrap();
    log.close().await.unwrap();
}

#[tokio::test]
async fn test_segment_max_age_rolls_writer() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(1_000);
    let options = Options {
        clock: clock.clone(),
        ..Default::default()
    };
    let config = LogConfig {
        segment_max_age: 60,
        ..Default::default()
    };
    let log = Log::create(dir.path().join("log"), config, options)
        .await
        .unwrap();
    let mut writer = log.new_writer(4096, IoMode::Auto).await.unwrap();

    append(&mut writer, 2, 10).await;
    clock.set(1_059);
    append(&mut writer, 1, 10).await;
    assert_eq!(log.segments().len(), 1);

    clock.set(1_060);
    append(&mut writer, 2, 10).await;
    writer.sync().await.unwrap();

    let segments = log.segments();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[1].base_position, 3);
    assert_eq!(segments[1].base_timestamp, 1_060);
    assert_eq!(log.stat().end_position, 5);

    writer.close().await.unwrap();
    log.close().await.unwrap();
}

#[tokio::test]
async fn test_reader_lags_behind_retention() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig {
        segment_max_count: 4,
        log_max_count: 4,
        ..Default::default()
    };
    let log = Log::create(dir.path().join("log"), config, Options::default())
        .await
        .unwrap();
    let mut writer = log.new_writer(4096, IoMode::Auto).await.unwrap();
    append(&mut writer, 4, 10).await;
    writer.sync().await.unwrap();

    let mut reader = log.new_reader(4096, false, IoMode::Auto).await.unwrap();

    append(&mut writer, 8, 10).await;
    writer.sync().await.unwrap();
    assert_eq!(log.stat().start_position, 8);

    // The first segment is still open in the reader
    let mut record = Record::default();
    for _ in 0..4 {
        reader.read(&mut record).await.unwrap();
    }
    assert!(matches!(reader.read(&mut record).await, Err(Error::Lagging)));

    writer.close().await.unwrap();
    log.close().await.unwrap();
}

#[tokio::test]
async fn test_retention_publishes_stat() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig {
        segment_max_count: 2,
        log_max_count: 2,
        ..Default::default()
    };
    let log = Log::create(dir.path().join("log"), config, Options::default())
        .await
        .unwrap();
    let mut stats = log.subscribe().unwrap();
    let mut writer = log.new_writer(4096, IoMode::Auto).await.unwrap();

    append(&mut writer, 6, 10).await;
    writer.sync().await.unwrap();

    stats.changed().await.unwrap();
    let stat = *stats.borrow_and_update();
    assert_eq!(stat.start_position, 4);
    assert_eq!(stat.end_position, 6);

    writer.close().await.unwrap();
    log.close().await.unwrap();
}

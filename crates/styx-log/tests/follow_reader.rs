//! Follow-mode reader tests: tailing a live log.

use std::time::Duration;

use styx_log::{Error, IoMode, Log, LogConfig, Options, Record, Whence};
use tempfile::TempDir;
use tokio::time::{timeout, Instant};

async fn create_log(dir: &TempDir, config: LogConfig) -> Log {
    Log::create(dir.path().join("log"), config, Options::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_follower_sees_records_after_sync() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig {
        segment_max_count: 3,
        ..Default::default()
    };
    let log = create_log(&dir, config).await;
    let mut reader = log.new_reader(4096, true, IoMode::Auto).await.unwrap();

    let follower = tokio::spawn(async move {
        let mut record = Record::default();
        let mut seen = Vec::new();
        for _ in 0..10 {
            reader.read(&mut record).await.unwrap();
            seen.push(String::from_utf8(record.payload().to_vec()).unwrap());
        }
        seen
    });

    let mut writer = log.new_writer(4096, IoMode::Auto).await.unwrap();
    for i in 0..10 {
        writer.write(&Record::new(format!("r{i}"))).await.unwrap();
        if i % 4 == 3 {
            writer.sync().await.unwrap();
        }
    }
    writer.sync().await.unwrap();

    let seen = timeout(Duration::from_secs(5), follower)
        .await
        .expect("follower finished")
        .unwrap();
    let expected: Vec<String> = (0..10).map(|i| format!("r{i}")).collect();
    assert_eq!(seen, expected);

    writer.close().await.unwrap();
    log.close().await.unwrap();
}

#[tokio::test]
async fn test_follower_unblocked_by_log_close() {
    let dir = TempDir::new().unwrap();
    let log = create_log(&dir, LogConfig::default()).await;
    let mut reader = log.new_reader(4096, true, IoMode::Auto).await.unwrap();

    let follower = tokio::spawn(async move {
        let mut record = Record::default();
        reader.read(&mut record).await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    log.close().await.unwrap();

    let result = timeout(Duration::from_secs(5), follower)
        .await
        .expect("follower unblocked")
        .unwrap();
    assert!(matches!(result, Err(Error::Closed)));
}

#[tokio::test]
async fn test_deadline_is_single_shot() {
    let dir = TempDir::new().unwrap();
    let log = create_log(&dir, LogConfig::default()).await;
    let mut writer = log.new_writer(4096, IoMode::Auto).await.unwrap();
    writer.write(&Record::new(b"first")).await.unwrap();
    writer.sync().await.unwrap();

    let mut reader = log.new_reader(4096, true, IoMode::Auto).await.unwrap();
    let mut record = Record::default();
    reader.read(&mut record).await.unwrap();

    reader.set_wait_deadline(Instant::now() + Duration::from_millis(5));
    assert!(matches!(reader.read(&mut record).await, Err(Error::Timeout)));

    // No deadline armed now: the next read waits for the writer
    let pending = tokio::spawn(async move {
        let mut record = Record::default();
        reader.read(&mut record).await.map(|_| record)
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!pending.is_finished());

    writer.write(&Record::new(b"second")).await.unwrap();
    writer.sync().await.unwrap();
    let record = timeout(Duration::from_secs(5), pending)
        .await
        .expect("reader woke up")
        .unwrap()
        .unwrap();
    assert_eq!(record.payload(), b"second");

    writer.close().await.unwrap();
    log.close().await.unwrap();
}

#[tokio::test]
async fn test_deadline_survives_reads_that_do_not_block() {
    let dir = TempDir::new().unwrap();
    let log = create_log(&dir, LogConfig::default()).await;
    let mut writer = log.new_writer(4096, IoMode::Auto).await.unwrap();
    for payload in [&b"one"[..], b"two", b"three"] {
        writer.write(&Record::new(payload)).await.unwrap();
    }
    writer.sync().await.unwrap();

    let mut reader = log.new_reader(4096, true, IoMode::Auto).await.unwrap();
    reader.set_wait_deadline(Instant::now() + Duration::from_millis(50));
    let mut record = Record::default();
    for _ in 0..3 {
        reader.read(&mut record).await.unwrap();
    }
    assert_eq!(record.payload(), b"three");

    // The deadline is still armed for the first wait that blocks
    let started = Instant::now();
    assert!(matches!(reader.read(&mut record).await, Err(Error::Timeout)));
    assert!(started.elapsed() < Duration::from_secs(5));

    writer.close().await.unwrap();
    log.close().await.unwrap();
}

#[tokio::test]
async fn test_follower_crossing_missing_segment_is_corrupt() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("log");
    let config = LogConfig {
        segment_max_count: 5,
        ..Default::default()
    };
    let log = Log::create(&path, config, Options::default()).await.unwrap();
    let mut writer = log.new_writer(4096, IoMode::Auto).await.unwrap();
    for i in 0..15u32 {
        writer.write(&Record::new(i.to_be_bytes())).await.unwrap();
    }
    writer.sync().await.unwrap();
    writer.close().await.unwrap();
    let segments = log.segments();
    assert_eq!(segments.len(), 3);
    log.close().await.unwrap();

    std::fs::remove_file(segments[1].records_path(&path)).unwrap();
    std::fs::remove_file(segments[1].index_path(&path)).unwrap();

    let log = Log::open(&path, Options::default()).await.unwrap();
    assert_eq!(log.segments().len(), 2);
    let mut reader = log.new_reader(4096, true, IoMode::Auto).await.unwrap();
    let mut record = Record::default();
    for i in 0..5u32 {
        reader.read(&mut record).await.unwrap();
        assert_eq!(record.payload(), i.to_be_bytes());
    }
    let err = timeout(Duration::from_secs(5), reader.read(&mut record))
        .await
        .expect("reader did not wait across the gap")
        .unwrap_err();
    assert!(err.is_corrupt(), "expected Corrupt, got {err:?}");
    log.close().await.unwrap();
}

#[tokio::test]
async fn test_manual_follower_must_fill_then_fill_waits() {
    let dir = TempDir::new().unwrap();
    let log = create_log(&dir, LogConfig::default()).await;
    let mut reader = log.new_reader(4096, true, IoMode::Manual).await.unwrap();
    let mut record = Record::default();

    assert!(matches!(reader.read(&mut record).await, Err(Error::MustFill)));
    reader.set_wait_deadline(Instant::now() + Duration::from_millis(5));
    assert!(matches!(reader.fill().await, Err(Error::Timeout)));

    let mut writer = log.new_writer(4096, IoMode::Auto).await.unwrap();
    writer.write(&Record::new(b"tail")).await.unwrap();
    writer.sync().await.unwrap();

    reader.fill().await.unwrap();
    loop {
        match reader.read(&mut record).await {
            Ok(_) => break,
            Err(Error::MustFill) => {
                reader.fill().await.unwrap();
            }
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }
    assert_eq!(record.payload(), b"tail");

    writer.close().await.unwrap();
    log.close().await.unwrap();
}

#[tokio::test]
async fn test_seek_end_non_follow_is_eof() {
    let dir = TempDir::new().unwrap();
    let log = create_log(&dir, LogConfig::default()).await;
    let mut writer = log.new_writer(4096, IoMode::Auto).await.unwrap();
    for _ in 0..3 {
        writer.write(&Record::new(b"abc")).await.unwrap();
    }
    writer.sync().await.unwrap();

    let mut reader = log.new_reader(4096, false, IoMode::Auto).await.unwrap();
    assert_eq!(reader.seek(0, Whence::End).await.unwrap(), 3);
    let mut record = Record::default();
    assert!(matches!(reader.read(&mut record).await, Err(Error::Eof)));
    assert_eq!(reader.tell(), (3, 33));

    writer.close().await.unwrap();
    log.close().await.unwrap();
}

//! Crash recovery tests: torn tails left by an interrupted write.

use std::io::Write;
use std::path::Path;

use styx_log::{Error, IoMode, Log, LogConfig, Options, Record};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Helper to show recovery warnings with `RUST_LOG=styx_log=warn`
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Helper to find the records file of the newest segment
fn last_records_file(dir: &Path) -> std::path::PathBuf {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.to_string_lossy().ends_with("-records"))
        .collect();
    files.sort();
    files.pop().unwrap()
}

async fn read_all(log: &Log) -> Vec<Vec<u8>> {
    let mut reader = log.new_reader(4096, false, IoMode::Auto).await.unwrap();
    let mut record = Record::default();
    let mut payloads = Vec::new();
    loop {
        match reader.read(&mut record).await {
            Ok(_) => payloads.push(record.payload().to_vec()),
            Err(Error::Eof) => break,
            Err(e) => panic!("unexpected read error: {e}"),
        }
    }
    payloads
}

#[tokio::test]
async fn test_torn_tail_is_cut_and_overwritten() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("log");

    let log = Log::create(&path, LogConfig::default(), Options::default())
        .await
        .unwrap();
    let mut writer = log.new_writer(4096, IoMode::Auto).await.unwrap();
    for i in 0..5 {
        writer.write(&Record::new(format!("rec-{i}"))).await.unwrap();
    }
    writer.close().await.unwrap();
    log.close().await.unwrap();

    // A size prefix promising 10 bytes, followed by only 3
    let records = last_records_file(&path);
    let clean_len = std::fs::metadata(&records).unwrap().len();
    assert_eq!(clean_len, 5 * 13);
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&records)
        .unwrap();
    file.write_all(&[0, 0, 0, 10, 1, 2, 3]).unwrap();
    file.sync_all().unwrap();
    drop(file);

    let log = Log::open(&path, Options::default()).await.unwrap();
    assert_eq!(log.stat().end_position, 5);
    assert_eq!(log.stat().end_offset, 65);
    assert_eq!(Log::scan(&path).await.unwrap().end_position, 5);

    let mut writer = log.new_writer(4096, IoMode::Auto).await.unwrap();
    assert_eq!(std::fs::metadata(&records).unwrap().len(), clean_len);
    writer.write(&Record::new("rec-5")).await.unwrap();
    let event = writer.sync().await.unwrap();
    assert_eq!(event.position, 6);
    writer.close().await.unwrap();

    let payloads = read_all(&log).await;
    assert_eq!(payloads.len(), 6);
    assert_eq!(payloads[5], b"rec-5");
    log.close().await.unwrap();

    let log = Log::open(&path, Options::default()).await.unwrap();
    assert_eq!(log.stat().end_position, 6);
    assert_eq!(log.stat().end_offset, 78);
    assert_eq!(read_all(&log).await.len(), 6);
    log.close().await.unwrap();
}

#[tokio::test]
async fn test_unflushed_manual_writes_are_lost() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("log");

    let log = Log::create(&path, LogConfig::default(), Options::default())
        .await
        .unwrap();
    let mut writer = log.new_writer(4096, IoMode::Manual).await.unwrap();
    writer.write(&Record::new("kept")).await.unwrap();
    writer.sync().await.unwrap();
    writer.write(&Record::new("buffered")).await.unwrap();
    // Dropping without flush discards the buffer
    drop(writer);
    log.close().await.unwrap();

    let log = Log::open(&path, Options::default()).await.unwrap();
    assert_eq!(log.stat().end_position, 1);
    assert_eq!(read_all(&log).await, vec![b"kept".to_vec()]);
    log.close().await.unwrap();
}

#[tokio::test]
async fn test_log_close_retires_open_writer() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("log");

    let log = Log::create(&path, LogConfig::default(), Options::default())
        .await
        .unwrap();
    let mut stale = log.new_writer(4096, IoMode::Auto).await.unwrap();
    stale.write(&Record::new("AAAAAAAAAA")).await.unwrap();
    // Closing the log flushes and syncs the pending record
    log.close().await.unwrap();

    let log = Log::open(&path, Options::default()).await.unwrap();
    assert_eq!(log.stat().end_position, 1);
    let mut writer = log.new_writer(4096, IoMode::Auto).await.unwrap();
    writer.write(&Record::new("BBBBBBBBBB")).await.unwrap();
    writer.write(&Record::new("CCCCCCCCCC")).await.unwrap();
    assert_eq!(writer.sync().await.unwrap().position, 3);
    writer.close().await.unwrap();

    // The old handle must not touch the reopened log
    assert!(matches!(
        stale.write(&Record::new("DDDDDDDDDD")).await,
        Err(Error::Closed)
    ));
    assert!(matches!(stale.flush().await, Err(Error::Closed)));
    assert!(matches!(stale.close().await, Err(Error::Closed)));
    log.close().await.unwrap();

    let log = Log::open(&path, Options::default()).await.unwrap();
    assert_eq!(
        read_all(&log).await,
        vec![
            b"AAAAAAAAAA".to_vec(),
            b"BBBBBBBBBB".to_vec(),
            b"CCCCCCCCCC".to_vec(),
        ]
    );
    log.close().await.unwrap();
}

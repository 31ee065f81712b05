//! Fanin tests: many logical writers sharing one log writer.

use std::sync::Arc;

use parking_lot::Mutex;
use styx_log::{Error, Fanin, IoMode, Log, LogConfig, Options, Record, SyncEvent};
use tempfile::TempDir;

const WRITERS: usize = 4;
const ROUNDS: usize = 5;
const PER_ROUND: usize = 3;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_each_get_their_syncs() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig {
        segment_max_count: 7,
        ..Default::default()
    };
    let log = Log::create(dir.path().join("log"), config, Options::default())
        .await
        .unwrap();
    let fanin = Fanin::new(log.new_writer(4096, IoMode::Manual).await.unwrap());

    let mut tasks = Vec::new();
    for id in 0..WRITERS {
        let fanin = fanin.clone();
        tasks.push(tokio::spawn(async move {
            let mut writer = fanin.writer(IoMode::Manual);
            let events: Arc<Mutex<Vec<SyncEvent>>> = Arc::default();
            let sink = events.clone();
            writer.handle_sync(move |event| sink.lock().push(event));

            let mut flushes = 0;
            let mut seq = 0;
            for _ in 0..ROUNDS {
                for _ in 0..PER_ROUND {
                    let record = Record::new(format!("{id}:{seq}"));
                    loop {
                        match writer.write(&record).await {
                            Ok(_) => break,
                            Err(Error::MustFlush) => {
                                writer.flush().await.unwrap();
                                flushes += 1;
                            }
                            Err(e) => panic!("write failed: {e:?}"),
                        }
                    }
                    seq += 1;
                }
                writer.flush().await.unwrap();
                flushes += 1;
                tokio::task::yield_now().await;
            }
            writer.close().await.unwrap();
            let events = events.lock().clone();
            (flushes, events)
        }));
    }

    for task in tasks {
        let (flushes, events) = task.await.unwrap();
        assert_eq!(events.len(), flushes, "one callback per flush");
        assert!(events.windows(2).all(|w| w[0].position <= w[1].position));
        assert!(events.windows(2).all(|w| w[0].count <= w[1].count));
        assert_eq!(events.last().unwrap().count, (ROUNDS * PER_ROUND) as i64);
    }

    fanin.close().await.unwrap();
    let total = (WRITERS * ROUNDS * PER_ROUND) as i64;
    assert_eq!(log.stat().end_position, total);

    // Every writer's records are present, in its own order
    let mut reader = log.new_reader(4096, false, IoMode::Auto).await.unwrap();
    let mut next_seq = vec![0usize; WRITERS];
    let mut record = Record::default();
    for _ in 0..total {
        reader.read(&mut record).await.unwrap();
        let text = std::str::from_utf8(record.payload()).unwrap();
        let (id, seq) = text.split_once(':').unwrap();
        let id: usize = id.parse().unwrap();
        assert_eq!(seq.parse::<usize>().unwrap(), next_seq[id]);
        next_seq[id] += 1;
    }
    assert!(next_seq.iter().all(|&n| n == ROUNDS * PER_ROUND));
    assert!(matches!(reader.read(&mut record).await, Err(Error::Eof)));

    log.close().await.unwrap();
}

#[tokio::test]
async fn test_auto_writer_handles_segment_rolls() {
    let dir = TempDir::new().unwrap();
    let config = LogConfig {
        segment_max_count: 2,
        ..Default::default()
    };
    let log = Log::create(dir.path().join("log"), config, Options::default())
        .await
        .unwrap();
    let fanin = Fanin::new(log.new_writer(4096, IoMode::Manual).await.unwrap());

    let mut writer = fanin.writer(IoMode::Auto);
    for i in 0..9 {
        writer.write(&Record::new(format!("{i}"))).await.unwrap();
    }
    writer.close().await.unwrap();
    fanin.close().await.unwrap();

    assert_eq!(log.stat().end_position, 9);
    assert_eq!(log.segments().len(), 5);
    log.close().await.unwrap();
}

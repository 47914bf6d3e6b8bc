//! End-to-end checks of the CSV message store through the public API.

use std::{fs, sync::Arc, thread};

use gatelog::core::{read_store, CsvMessageLogger, MessageSink, HEADER};
use tempfile::TempDir;

fn store(dir: &TempDir) -> CsvMessageLogger {
    CsvMessageLogger::new(dir.path().join("config_log.csv"))
}

#[test]
fn test_n_messages_give_header_plus_n_rows() {
    let dir = TempDir::new().unwrap();
    let logger = store(&dir);

    for i in 0..5 {
        logger
            .record("/devices/dev/config", format!("cfg-{i}").as_bytes())
            .unwrap();
    }

    let contents = read_store(logger.path()).unwrap();
    assert_eq!(contents.header, HEADER);
    assert_eq!(contents.records.len(), 5);
    for (i, record) in contents.records.iter().enumerate() {
        assert_eq!(record.payload(), format!("cfg-{i}").as_bytes());
    }

    let raw = fs::read_to_string(logger.path()).unwrap();
    assert_eq!(raw.lines().count(), 6);
    assert_eq!(raw.matches("time,topic,data").count(), 1);
}

#[test]
fn test_arrival_order_and_timestamps_preserved() {
    let dir = TempDir::new().unwrap();
    let logger = store(&dir);

    logger.record("events/device1", b"hello").unwrap();
    logger.record("events/device1", b"world").unwrap();

    let records = read_store(logger.path()).unwrap().records;
    assert_eq!(records[0].topic(), "events/device1");
    assert_eq!(records[0].payload(), b"hello");
    assert_eq!(records[1].payload(), b"world");
    assert!(records[0].timestamp() <= records[1].timestamp());
}

#[test]
fn test_delimiters_and_quotes_survive() {
    let dir = TempDir::new().unwrap();
    let logger = store(&dir);

    logger.record("a,b", b"x\"y").unwrap();
    logger.record("multi", b"line one\nline two").unwrap();

    let raw = fs::read_to_string(logger.path()).unwrap();
    assert!(raw.contains(",\"a,b\",\"x\"\"y\"\r\n"));

    let records = read_store(logger.path()).unwrap().records;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].topic(), "a,b");
    assert_eq!(records[0].payload(), b"x\"y");
    assert_eq!(records[1].payload(), b"line one\nline two");
}

#[test]
fn test_reopening_never_duplicates_header() {
    let dir = TempDir::new().unwrap();

    store(&dir).record("t", b"first run").unwrap();
    store(&dir).record("t", b"second run").unwrap();

    let contents = read_store(dir.path().join("config_log.csv")).unwrap();
    assert_eq!(contents.records.len(), 2);
    assert_eq!(contents.records[1].payload(), b"second run");
}

#[test]
fn test_empty_payload_is_recorded() {
    let dir = TempDir::new().unwrap();
    let logger = store(&dir);

    logger.record("/devices/dev/config", b"").unwrap();

    let records = read_store(logger.path()).unwrap().records;
    assert_eq!(records.len(), 1);
    assert!(records[0].payload().is_empty());
}

#[test]
fn test_concurrent_writers_keep_rows_whole() {
    let dir = TempDir::new().unwrap();
    let logger = Arc::new(store(&dir));

    let workers: Vec<_> = (0..4)
        .map(|w| {
            let logger = logger.clone();
            thread::spawn(move || {
                for i in 0..10 {
                    logger
                        .record(&format!("worker/{w}"), format!("{w}-{i}").as_bytes())
                        .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let records = read_store(logger.path()).unwrap().records;
    assert_eq!(records.len(), 40);
    for w in 0..4 {
        let payloads: Vec<_> = records
            .iter()
            .filter(|r| r.topic() == format!("worker/{w}"))
            .map(|r| r.payload().to_vec())
            .collect();
        let expected: Vec<_> = (0..10).map(|i| format!("{w}-{i}").into_bytes()).collect();
        assert_eq!(payloads, expected);
    }
}

#[test]
fn test_empty_leftover_store_gets_header() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config_log.csv");
    // an interrupted creation leaves a zero-length file behind
    fs::write(&path, b"").unwrap();

    CsvMessageLogger::new(&path)
        .record("events/device1", b"hello")
        .unwrap();

    let raw = fs::read(&path).unwrap();
    assert!(raw.starts_with(b"time,topic,data\r\n"));
    let contents = read_store(&path).unwrap();
    assert_eq!(contents.records.len(), 1);
    assert_eq!(contents.records[0].payload(), b"hello");
}

#[test]
fn test_failed_write_keeps_store_readable() {
    let dir = TempDir::new().unwrap();
    let logger = CsvMessageLogger::new(dir.path().join("missing").join("config_log.csv"));

    assert!(logger.record("t", b"lost").is_err());
    assert!(!logger.path().exists());

    fs::create_dir(dir.path().join("missing")).unwrap();
    logger.record("t", b"kept").unwrap();

    let contents = read_store(logger.path()).unwrap();
    assert_eq!(contents.header, HEADER);
    assert_eq!(contents.records.len(), 1);
    assert_eq!(contents.records[0].payload(), b"kept");
}

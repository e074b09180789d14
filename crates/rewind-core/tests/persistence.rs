//! Log Persistence Tests
//!
//! Writes recorded logs to disk and memory, reads them back, and replays:
//! - Text and binary containers on disk
//! - Converting a container between formats
//! - Lazy snapshot loading
//!
//! # Running Tests
//! ```bash
//! cargo test --test persistence
//! ```

mod common;

use common::{config, counter, registered_heap, Recording};
use rewind_core::log::persist::read_log_stream;
use rewind_core::serialize::{snapshot_stream_name, LOG_STREAM_NAME};
use rewind_core::{DirectoryStreams, EventLog, Format, MemoryStreams, StreamProvider, TtdConfig, TtdError};

fn recorded(format: Format, ticks: usize) -> Recording {
    let mut rec = Recording::start(TtdConfig {
        format,
        ..config(0, 3)
    });
    rec.ticks(ticks);
    rec
}

fn replay_from(provider: &dyn StreamProvider) -> (EventLog, rewind_core::ReferenceHeap) {
    let mut log = EventLog::new(TtdConfig::default()).unwrap();
    log.parse_log_into(provider).unwrap();
    log.load_snapshots(provider).unwrap();
    log.init_for_replay(false);
    let first = log.snapshot_times()[0];
    let mut heap = registered_heap();
    log.do_snapshot_inflate(first, &mut heap).unwrap();
    log.replay_to_end(&mut heap).unwrap();
    (log, heap)
}

#[test]
fn test_directory_round_trip_replays() {
    for format in [Format::Text, Format::Binary] {
        let rec = recorded(format, 4);
        let dir = tempfile::tempdir().unwrap();
        let streams = DirectoryStreams::new(dir.path()).unwrap();
        rec.log.emit_log(&streams).unwrap();

        assert!(dir.path().join(LOG_STREAM_NAME).exists());
        for t in rec.log.snapshot_times() {
            assert!(streams.exists(&snapshot_stream_name(t)), "{:?} snapshot {}", format, t);
        }

        let (log, heap) = replay_from(&streams);
        assert_eq!(log.len(), rec.log.len());
        assert_eq!(counter(&heap, rec.ctx), Some(4.0));
        assert_eq!(heap.fingerprint().unwrap(), rec.heap.fingerprint().unwrap());
    }
}

#[test]
fn test_convert_text_to_binary() {
    let rec = recorded(Format::Text, 3);
    let text = MemoryStreams::new();
    rec.log.emit_log(&text).unwrap();

    let mut converted = EventLog::new(TtdConfig {
        format: Format::Binary,
        ..TtdConfig::default()
    })
    .unwrap();
    let header = converted.parse_log_into(&text).unwrap();
    assert_eq!(header.format, Format::Text);
    converted.load_snapshots(&text).unwrap();
    let binary = MemoryStreams::new();
    converted.emit_log(&binary).unwrap();

    let (_, _, entries_text) = read_log_stream(&text, 4096).unwrap();
    let (header, _, entries_binary) = read_log_stream(&binary, 4096).unwrap();
    assert_eq!(header.format, Format::Binary);
    assert_eq!(entries_text, entries_binary);

    let (_, heap) = replay_from(&binary);
    assert_eq!(heap.fingerprint().unwrap(), rec.heap.fingerprint().unwrap());
}

#[test]
fn test_snapshots_load_on_demand() {
    let rec = recorded(Format::Binary, 2);
    let streams = MemoryStreams::new();
    rec.log.emit_log(&streams).unwrap();

    let mut log = EventLog::new(TtdConfig::default()).unwrap();
    log.parse_log_into(&streams).unwrap();
    assert_eq!(log.stats().loaded_snapshots, 0);

    let times = log.snapshot_times();
    log.ensure_snapshot_loaded(times[1], &streams).unwrap();
    assert_eq!(log.stats().loaded_snapshots, 1);

    log.init_for_replay(false);
    let mut heap = registered_heap();
    assert!(matches!(
        log.do_snapshot_inflate(times[0], &mut heap),
        Err(TtdError::MissingInflateTarget { .. })
    ));
    log.do_snapshot_inflate(times[1], &mut heap).unwrap();
    log.replay_to_end(&mut heap).unwrap();
    assert_eq!(counter(&heap, rec.ctx), Some(2.0));
}

#[test]
fn test_missing_snapshot_stream_is_reported() {
    let rec = recorded(Format::Text, 1);
    let dir = tempfile::tempdir().unwrap();
    let streams = DirectoryStreams::new(dir.path()).unwrap();
    rec.log.emit_log(&streams).unwrap();
    let first = rec.log.snapshot_times()[0];
    std::fs::remove_file(dir.path().join(snapshot_stream_name(first))).unwrap();

    let mut log = EventLog::new(TtdConfig::default()).unwrap();
    log.parse_log_into(&streams).unwrap();
    assert!(log.load_snapshots(&streams).is_err());
}

//! Record/Replay Integration Tests
//!
//! Drives the reference heap through a recorded program and replays it:
//! - Full replay from the first snapshot
//! - Replay to a chosen event time
//! - Host exceptions crossing the boundary
//! - Re-inflating the same snapshot with object reuse
//! - Pruned logs replaying from the oldest retained snapshot
//! - Strict event-time ordering
//!
//! # Running Tests
//! ```bash
//! cargo test --test record_replay
//! ```

mod common;

use common::{config, counter, registered_heap, Recording};
use rewind_core::events::EventPayload;
use rewind_core::{EventKind, LogValue, ResultStatus, TtdError};

fn begin_times(rec: &Recording) -> Vec<i64> {
    rec.log
        .iter()
        .filter(|e| e.kind() == EventKind::CallExistingFunctionBegin)
        .map(|e| e.event_time)
        .collect()
}

// ===== Full Replay =====

#[test]
fn test_replay_reproduces_recorded_heap() {
    let mut rec = Recording::start(config(60_000, 2));
    assert_eq!(rec.ticks(5), LogValue::Number(5.0));

    rec.log.init_for_replay(false);
    let first = rec.log.snapshot_times()[0];
    let mut replay = registered_heap();
    rec.log.do_snapshot_inflate(first, &mut replay).unwrap();
    rec.log.replay_to_end(&mut replay).unwrap();

    assert_eq!(counter(&replay, rec.ctx), Some(5.0));
    assert_eq!(replay.fingerprint().unwrap(), rec.heap.fingerprint().unwrap());
    assert_eq!(
        rec.log.last_consistent_event_time(),
        rec.log.last_event_time_in_log().unwrap()
    );
}

#[test]
fn test_host_exception_is_replayed() {
    let mut rec = Recording::start(config(60_000, 2));
    rec.ticks(2);
    assert_eq!(rec.tick(), LogValue::Undefined);

    let threw: Vec<_> = rec
        .log
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::ExternalCall(call) if call.has_script_exception => Some(e.result_status),
            _ => None,
        })
        .collect();
    assert_eq!(threw, vec![ResultStatus::Exception]);

    rec.log.init_for_replay(false);
    let mut replay = registered_heap();
    rec.log
        .do_snapshot_inflate(rec.log.snapshot_times()[0], &mut replay)
        .unwrap();
    rec.log.replay_to_end(&mut replay).unwrap();
    assert!(!replay.has_pending_exception());
    assert_eq!(counter(&replay, rec.ctx), Some(3.0));
}

#[test]
fn test_replay_to_event_time() {
    let mut rec = Recording::start(config(0, 10));
    rec.ticks(5);
    let begins = begin_times(&rec);
    let target = begins[2];

    rec.log.init_for_replay(false);
    let snap = rec.log.find_snap_time_for_event_time(target, false).unwrap();
    assert!(snap < target);
    let mut replay = registered_heap();
    rec.log.do_snapshot_inflate(snap, &mut replay).unwrap();
    rec.log.replay_root_events_to_time(target, &mut replay).unwrap();
    assert_eq!(rec.log.current_event_time(), target);
    assert_eq!(counter(&replay, rec.ctx), Some(2.0));

    rec.log.replay_to_end(&mut replay).unwrap();
    assert_eq!(counter(&replay, rec.ctx), Some(5.0));
}

#[test]
fn test_tampered_result_is_detected() {
    fn lying_tick(
        heap: &mut rewind_core::ReferenceHeap,
        log: &mut rewind_core::EventLog,
        inv: &rewind_core::heap::Invocation,
    ) -> rewind_core::TtdResult<rewind_core::LiveValue> {
        common::tick(heap, log, inv)?;
        Ok(rewind_core::snapshot::Var::Number(-1.0))
    }

    let mut rec = Recording::start(config(60_000, 2));
    rec.ticks(1);
    rec.log.init_for_replay(false);
    let mut replay = registered_heap();
    replay.register_behavior("tick", lying_tick);
    rec.log
        .do_snapshot_inflate(rec.log.snapshot_times()[0], &mut replay)
        .unwrap();
    match rec.log.replay_to_end(&mut replay) {
        Err(TtdError::ActionResultMismatch { expected, found, .. }) => {
            assert_eq!(expected, LogValue::Number(1.0).to_string());
            assert_eq!(found, LogValue::Number(-1.0).to_string());
        }
        other => panic!("expected a result mismatch, got {:?}", other),
    }
}

// ===== Re-inflation =====

#[test]
fn test_reinflate_same_snapshot_reuses_objects() {
    let mut rec = Recording::start(config(60_000, 2));
    rec.ticks(4);

    rec.log.init_for_replay(true);
    let first = rec.log.snapshot_times()[0];
    let mut replay = registered_heap();
    rec.log.do_snapshot_inflate(first, &mut replay).unwrap();
    let global = replay.context_global(rec.ctx).unwrap();
    rec.log.replay_to_end(&mut replay).unwrap();
    let expected = replay.fingerprint().unwrap();
    // debugging replay takes a ready-to-run snapshot at each top-level call
    assert_eq!(rec.log.stats().ready_to_run, 4);

    rec.log.do_snapshot_inflate(first, &mut replay).unwrap();
    assert_eq!(replay.context_global(rec.ctx).unwrap(), global);
    assert_eq!(counter(&replay, rec.ctx), None);
    rec.log.replay_to_end(&mut replay).unwrap();
    assert_eq!(replay.fingerprint().unwrap(), expected);
    assert_eq!(expected, rec.heap.fingerprint().unwrap());
}

#[test]
fn test_context_churn_forces_fresh_inflate() {
    let mut rec = Recording::start(config(60_000, 2));
    rec.ticks(1);

    rec.log.init_for_replay(false);
    let first = rec.log.snapshot_times()[0];
    let mut replay = registered_heap();
    rec.log.do_snapshot_inflate(first, &mut replay).unwrap();
    let global = replay.context_global(rec.ctx).unwrap();

    let extra = replay.create_context(&mut rec.log, "extra.js").unwrap();
    replay.destroy_context(&rec.log, extra).unwrap();
    rec.log.do_snapshot_inflate(first, &mut replay).unwrap();
    assert_ne!(replay.context_global(rec.ctx).unwrap(), global);
    rec.log.replay_to_end(&mut replay).unwrap();
    assert_eq!(counter(&replay, rec.ctx), Some(1.0));
}

// ===== Pruning =====

#[test]
fn test_pruned_log_replays_from_oldest_snapshot() {
    let mut rec = Recording::start(config(0, 2));
    rec.ticks(6);

    let snaps = rec.log.snapshot_times();
    assert_eq!(snaps.len(), 2);
    assert_eq!(rec.log.first_event_time_in_log(), Some(snaps[0]));
    assert_eq!(rec.log.iter().next().map(|e| e.kind()), Some(EventKind::Snapshot));

    rec.log.init_for_replay(false);
    let mut replay = registered_heap();
    rec.log.do_snapshot_inflate(snaps[0], &mut replay).unwrap();
    assert_eq!(counter(&replay, rec.ctx), Some(4.0));
    rec.log.replay_to_end(&mut replay).unwrap();
    assert_eq!(replay.fingerprint().unwrap(), rec.heap.fingerprint().unwrap());
}

#[test]
fn test_snapshot_before_pruned_range_is_missing() {
    let mut rec = Recording::start(config(0, 2));
    rec.ticks(4);
    let first = rec.log.first_event_time_in_log().unwrap();
    assert!(matches!(
        rec.log.find_snap_time_for_event_time(first - 1, false),
        Err(TtdError::MissingInflateTarget { .. })
    ));
}

// ===== Ordering =====

#[test]
fn test_event_times_are_totally_ordered() {
    let mut rec = Recording::start(config(0, 8));
    rec.ticks(4);

    let times: Vec<i64> = rec.log.iter().map(|e| e.event_time).collect();
    assert!(times.windows(2).all(|w| w[0] < w[1]));

    for entry in rec.log.iter() {
        if let EventPayload::ExternalCall(call) = &entry.payload {
            assert!(call.last_nested_event_time >= entry.event_time);
            assert!(call.last_nested_event_time < rec.log.current_event_time());
        }
    }
    let begins = begin_times(&rec);
    assert_eq!(begins.len(), 4);
    assert!(begins.windows(2).all(|w| w[0] < w[1]));
}

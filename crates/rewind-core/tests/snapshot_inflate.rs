//! Snapshot Extract/Inflate Tests
//!
//! Exercises the snapshot layer directly against the reference heap:
//! - Extract then inflate yields an equivalent heap
//! - Object order in a snapshot does not matter
//! - Construction dependency cycles are rejected
//! - Streams written in either format inflate identically
//!
//! # Running Tests
//! ```bash
//! cargo test --test snapshot_inflate
//! ```

mod common;

use common::{config, Recording};
use rewind_core::snapshot::TopLevelScripts;
use rewind_core::{
    Format, InflateMap, MemoryStreams, ReferenceHeap, SnapShot, SnapshotExtractor, TtdError,
};

fn inflate_fresh(snap: &SnapShot, scripts: &TopLevelScripts) -> Result<ReferenceHeap, TtdError> {
    let mut map = InflateMap::new();
    map.prep_for_initial_inflate(snap.inflate_counts());
    let mut heap = ReferenceHeap::new();
    snap.inflate(&mut map, &mut heap, scripts)?;
    map.cleanup_after_inflate();
    Ok(heap)
}

fn recorded_snapshot() -> (Recording, SnapShot) {
    let mut rec = Recording::start(config(60_000, 2));
    rec.ticks(4);
    let snap = SnapshotExtractor::new().extract(&rec.heap, 0.0).unwrap();
    (rec, snap)
}

#[test]
fn test_extract_inflate_equivalence() {
    let (rec, snap) = recorded_snapshot();
    let heap = inflate_fresh(&snap, rec.log.scripts()).unwrap();
    assert_eq!(heap.fingerprint().unwrap(), rec.heap.fingerprint().unwrap());

    let again = SnapshotExtractor::new().extract(&heap, 0.0).unwrap();
    assert_eq!(again.stats().objects, snap.stats().objects);
}

#[test]
fn test_object_order_is_irrelevant() {
    let (rec, mut snap) = recorded_snapshot();
    snap.objects.reverse();

    // make the first listed plain object wait for the last one
    let plain: Vec<usize> = (0..snap.objects.len())
        .filter(|&i| !snap.objects[i].is_well_known())
        .collect();
    let (first, last) = (plain[0], plain[plain.len() - 1]);
    let dep = snap.objects[last].object_ptr_id;
    snap.objects[first].depends_on.push(dep);

    let heap = inflate_fresh(&snap, rec.log.scripts()).unwrap();
    assert_eq!(heap.fingerprint().unwrap(), rec.heap.fingerprint().unwrap());
}

#[test]
fn test_dependency_cycle_is_rejected() {
    let (rec, mut snap) = recorded_snapshot();
    let plain: Vec<usize> = (0..snap.objects.len())
        .filter(|&i| !snap.objects[i].is_well_known())
        .collect();
    let (a, b) = (plain[0], plain[1]);
    let (ida, idb) = (snap.objects[a].object_ptr_id, snap.objects[b].object_ptr_id);
    snap.objects[a].depends_on.push(idb);
    snap.objects[b].depends_on.push(ida);

    assert!(matches!(
        inflate_fresh(&snap, rec.log.scripts()),
        Err(TtdError::PolicyViolation(_))
    ));
}

#[test]
fn test_missing_script_is_rejected() {
    let (_, snap) = recorded_snapshot();
    assert!(matches!(
        inflate_fresh(&snap, &TopLevelScripts::default()),
        Err(TtdError::MissingInflateTarget { .. })
    ));
}

#[test]
fn test_stream_formats_inflate_identically() {
    let (rec, snap) = recorded_snapshot();
    let mut fingerprints = Vec::new();
    for format in [Format::Text, Format::Binary] {
        let streams = MemoryStreams::new();
        snap.emit(&streams, "snap.snp", format, 1024).unwrap();
        let parsed = SnapShot::parse(&streams, "snap.snp", 1024).unwrap();
        assert_eq!(parsed.objects.len(), snap.objects.len());
        let heap = inflate_fresh(&parsed, rec.log.scripts()).unwrap();
        fingerprints.push(heap.fingerprint().unwrap());
    }
    assert_eq!(fingerprints[0], fingerprints[1]);
    assert_eq!(fingerprints[0], rec.heap.fingerprint().unwrap());
}

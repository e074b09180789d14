//! `rewind verify`: replay a demo log and compare it against its own snapshots

use super::demo::program_heap;
use super::open_log;
use anyhow::{anyhow, bail, Context};
use rewind_core::events::EventPayload;
use rewind_core::{EventLog, InflateMap, ReferenceHeap, TtdConfig};
use std::path::Path;
use tracing::debug;

/// Fingerprint of the heap a stored snapshot inflates to on its own
fn snapshot_fingerprint(log: &EventLog, time: i64) -> anyhow::Result<String> {
    let snap = log
        .iter()
        .find_map(|e| match &e.payload {
            EventPayload::Snapshot(data) if e.event_time == time => data.snap.as_deref(),
            _ => None,
        })
        .ok_or_else(|| anyhow!("snapshot at event {} is not loaded", time))?;

    let mut map = InflateMap::new();
    map.prep_for_initial_inflate(snap.inflate_counts());
    let mut heap = ReferenceHeap::new();
    snap.inflate(&mut map, &mut heap, log.scripts())?;
    map.cleanup_after_inflate();
    Ok(heap.fingerprint()?)
}

pub fn execute(config: &TtdConfig, dir: &Path) -> anyhow::Result<()> {
    let (mut log, _, streams) = open_log(config, dir)?;
    log.load_snapshots(&streams)
        .with_context(|| format!("loading snapshots from {}", dir.display()))?;
    log.init_for_replay(false);

    let times = log.snapshot_times();
    let (&first, rest) = times
        .split_first()
        .ok_or_else(|| anyhow!("{} has no snapshots to start from", dir.display()))?;

    let mut heap = program_heap();
    log.do_snapshot_inflate(first, &mut heap)?;
    for &time in rest {
        log.replay_root_events_to_time(time, &mut heap)?;
        let expected = snapshot_fingerprint(&log, time)?;
        if heap.fingerprint()? != expected {
            bail!("replayed heap differs from the snapshot at event {}", time);
        }
        debug!(event_time = time, "snapshot matches replay");
    }
    log.replay_to_end(&mut heap)?;

    println!(
        "OK: replayed {} events from event {}, {} snapshots checked",
        log.len(),
        first,
        rest.len()
    );
    Ok(())
}

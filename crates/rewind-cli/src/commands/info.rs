//! `rewind info`: header, entry counts and snapshots of a log

use super::open_log;
use rewind_core::TtdConfig;
use serde_json::json;
use std::path::Path;

pub fn execute(config: &TtdConfig, dir: &Path, as_json: bool) -> anyhow::Result<()> {
    let (log, header, _) = open_log(config, dir)?;
    let stats = log.stats();
    let snapshots = log.snapshot_times();
    let scripts = log.scripts();

    if as_json {
        let per_kind: serde_json::Map<String, serde_json::Value> = stats
            .per_kind
            .iter()
            .map(|(kind, count)| (format!("{:?}", kind), json!(count)))
            .collect();
        let out = json!({
            "format": header.format.to_string(),
            "arch": header.arch,
            "platform": header.platform,
            "diagnostics": header.diagnostics,
            "snap_interval_ms": header.snap_interval_ms,
            "snap_history_length": header.snap_history_length,
            "events": header.event_count,
            "first_event_time": log.first_event_time_in_log(),
            "last_event_time": log.last_event_time_in_log(),
            "snapshots": snapshots,
            "script_loads": scripts.script_loads.len(),
            "new_functions": scripts.new_functions.len(),
            "evals": scripts.evals.len(),
            "per_kind": per_kind,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Log:          {}", dir.display());
    println!("Format:       {}", header.format);
    println!("Recorded on:  {} ({})", header.platform, header.arch);
    println!(
        "Snapshots:    every {} ms, keep {}",
        header.snap_interval_ms, header.snap_history_length
    );
    match (log.first_event_time_in_log(), log.last_event_time_in_log()) {
        (Some(first), Some(last)) => println!("Events:       {} ({}..={})", header.event_count, first, last),
        _ => println!("Events:       0"),
    }
    println!(
        "Scripts:      {} loads, {} new functions, {} evals",
        scripts.script_loads.len(),
        scripts.new_functions.len(),
        scripts.evals.len()
    );

    println!();
    println!("Entries by kind:");
    for (kind, count) in &stats.per_kind {
        println!("  {:<28} {}", format!("{:?}", kind), count);
    }

    println!();
    println!("Snapshot times: {:?}", snapshots);
    Ok(())
}

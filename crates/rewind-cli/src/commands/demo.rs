//! `rewind demo`: record a small built-in program
//!
//! The program is native code standing in for script: a `tick` function
//! that counts calls, keeps a running sum in a closure, draws a random
//! number, reads the clock and reports through the `print` host function.

use anyhow::Context;
use rewind_core::heap::reference::property_id;
use rewind_core::heap::{HostCall, Invocation};
use rewind_core::snapshot::Var;
use rewind_core::{
    ActionOp, DirectoryStreams, EventLog, LiveValue, LogValue, ReferenceHeap, TtdConfig, TtdResult,
};
use std::path::Path;
use tracing::info;

const SOURCE: &str = "tick";

fn tick(heap: &mut ReferenceHeap, log: &mut EventLog, inv: &Invocation) -> TtdResult<LiveValue> {
    let ctx = inv.context;
    let global = heap.context_global(ctx)?;
    let count = heap.number_value(heap.get_named(global, "count")?).unwrap_or(0.0) + 1.0;
    heap.set_named(global, "count", Var::Number(count))?;

    let acc = match heap.get_named(global, "acc")? {
        Var::Ref(f) if heap.is_object(f) => f,
        _ => {
            let f = heap.new_closure(ctx, inv.function, "accumulate", vec![Var::Number(0.0)])?;
            heap.set_named(global, "acc", Var::Ref(f))?;
            f
        }
    };
    let sum = heap.call(
        log,
        Invocation {
            context: ctx,
            function: acc,
            this: Var::Invalid,
            args: vec![Var::Number(count)],
        },
    )?;

    let lucky = heap.math_random(log, ctx)?;
    heap.set_named(global, "lucky", Var::Number(lucky))?;
    let now = heap.date_now(log)?;
    heap.set_named(global, "lastTick", Var::Number(now))?;

    if let Var::Ref(print) = heap.get_named(global, "print")? {
        let sum = heap.display_string(sum);
        let message = heap.new_string(ctx, &format!("tick {} sum {}", count, sum))?;
        heap.call(
            log,
            Invocation {
                context: ctx,
                function: print,
                this: Var::Invalid,
                args: vec![message],
            },
        )?;
    }
    Ok(Var::Number(count))
}

// Adds its argument to the captured running sum
fn accumulate(heap: &mut ReferenceHeap, _log: &mut EventLog, inv: &Invocation) -> TtdResult<LiveValue> {
    let sum = heap.number_value(heap.closure_slot(inv.function, 0)?).unwrap_or(0.0);
    let add = heap.number_value(inv.arg(0)).unwrap_or(0.0);
    let next = Var::Number(sum + add);
    heap.set_closure_slot(inv.function, 0, next)?;
    Ok(next)
}

fn print(heap: &mut ReferenceHeap, log: &mut EventLog, call: &HostCall) -> TtdResult<LogValue> {
    let line = call.args.first().cloned().unwrap_or_default();
    info!(target: "demo", "{}", line);
    let global = heap.global_object(log, call.context)?;
    heap.perform(
        log,
        call.context,
        ActionOp::SetProperty {
            object: global,
            pid: property_id("lastLine"),
            value: line,
            use_strict: false,
        },
    )?;
    Ok(LogValue::Undefined)
}

/// A heap that knows the demo program's functions
pub fn program_heap() -> ReferenceHeap {
    let mut heap = ReferenceHeap::new();
    heap.register_behavior("tick", tick);
    heap.register_behavior("accumulate", accumulate);
    heap.register_host_function("print", print);
    heap
}

/// Record `ticks` top-level calls into `log`
pub fn record(log: &mut EventLog, ticks: usize) -> TtdResult<ReferenceHeap> {
    log.init_for_record();
    let mut heap = program_heap();
    let ctx = heap.create_context(log, "demo.js")?;
    let print = heap.create_host_function(log, ctx, "print")?;
    let global = heap.global_object(log, ctx)?;
    heap.perform(
        log,
        ctx,
        ActionOp::SetProperty {
            object: global,
            pid: property_id("print"),
            value: print,
            use_strict: false,
        },
    )?;
    let main = heap.load_script(log, ctx, "demo.js", SOURCE)?;
    log.do_snapshot_extract(&heap)?;

    for i in 0..ticks {
        let result = heap.call_function(log, ctx, &main, &[])?;
        if i == 0 {
            log.record_telemetry(&format!("first tick returned {}", result), false)?;
        }
    }
    Ok(heap)
}

pub fn execute(config: TtdConfig, out: &Path, ticks: usize) -> anyhow::Result<()> {
    let format = config.format;
    let mut log = EventLog::new(config)?;
    record(&mut log, ticks)?;

    let streams = DirectoryStreams::new(out).with_context(|| format!("creating {}", out.display()))?;
    log.emit_log(&streams)?;
    println!(
        "Recorded {} ticks: {} events, {} snapshots ({}) in {}",
        ticks,
        log.len(),
        log.snapshot_times().len(),
        format,
        out.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_ticks() {
        let mut log = EventLog::new(TtdConfig {
            snap_interval_ms: 0,
            snap_history_length: 3,
            ..TtdConfig::default()
        })
        .unwrap();
        let heap = record(&mut log, 5).unwrap();
        let ctx = heap.context_tags()[0];
        let global = heap.context_global(ctx).unwrap();
        assert_eq!(heap.number_value(heap.get_named(global, "count").unwrap()), Some(5.0));
        let acc = heap.get_named(global, "acc").unwrap().reference().unwrap();
        assert_eq!(heap.number_value(heap.closure_slot(acc, 0).unwrap()), Some(15.0));
        assert_eq!(log.snapshot_times().len(), 3);
    }
}

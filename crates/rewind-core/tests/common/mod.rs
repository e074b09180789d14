//! A small recorded program shared by the integration tests
//!
//! `tick` bumps `counter` on the global, reports through the `print` host
//! function, stores `Date.now()` and returns the new count. Every third tick
//! also calls the throwing `fail` host function.

#![allow(dead_code)]

use rewind_core::heap::reference::property_id;
use rewind_core::heap::{HostCall, Invocation};
use rewind_core::snapshot::Var;
use rewind_core::{
    ActionOp, EventLog, LiveValue, LogTag, LogValue, ReferenceHeap, TtdConfig, TtdResult,
};

pub fn tick(heap: &mut ReferenceHeap, log: &mut EventLog, inv: &Invocation) -> TtdResult<LiveValue> {
    let global = heap.context_global(inv.context)?;
    let counter = heap.get_named(global, "counter")?;
    let next = heap.number_value(counter).unwrap_or(0.0) + 1.0;
    heap.set_named(global, "counter", Var::Number(next))?;

    call_global(heap, log, inv.context, "print", &format!("tick {}", next))?;
    if next as i64 % 3 == 0 {
        call_global(heap, log, inv.context, "fail", "third")?;
        if heap.has_pending_exception() {
            return heap.undefined(inv.context);
        }
    }

    let now = heap.date_now(log)?;
    heap.set_named(global, "last", Var::Number(now))?;
    Ok(Var::Number(next))
}

fn call_global(
    heap: &mut ReferenceHeap,
    log: &mut EventLog,
    ctx: LogTag,
    name: &str,
    message: &str,
) -> TtdResult<LiveValue> {
    let global = heap.context_global(ctx)?;
    match heap.get_named(global, name)? {
        Var::Ref(f) if heap.is_object(f) => {
            let arg = heap.new_string(ctx, message)?;
            heap.call(
                log,
                Invocation {
                    context: ctx,
                    function: f,
                    this: Var::Invalid,
                    args: vec![arg],
                },
            )
        }
        _ => heap.undefined(ctx),
    }
}

/// Keeps the last message on a fresh object hung off the global
pub fn print(heap: &mut ReferenceHeap, log: &mut EventLog, call: &HostCall) -> TtdResult<LogValue> {
    let record = heap.perform(log, call.context, ActionOp::AllocateObject { is_external: false })?;
    let global = heap.global_object(log, call.context)?;
    heap.perform(
        log,
        call.context,
        ActionOp::SetProperty {
            object: record.clone(),
            pid: property_id("text"),
            value: call.args.first().cloned().unwrap_or_default(),
            use_strict: false,
        },
    )?;
    heap.perform(
        log,
        call.context,
        ActionOp::SetProperty {
            object: global,
            pid: property_id("lastPrint"),
            value: record,
            use_strict: false,
        },
    )?;
    Ok(LogValue::Undefined)
}

/// Always throws
pub fn fail(heap: &mut ReferenceHeap, _log: &mut EventLog, call: &HostCall) -> TtdResult<LogValue> {
    heap.throw_type_error(call.context, "host refused")?;
    Ok(LogValue::Undefined)
}

pub fn registered_heap() -> ReferenceHeap {
    let mut heap = ReferenceHeap::new();
    heap.register_behavior("tick", tick);
    heap.register_host_function("print", print);
    heap.register_host_function("fail", fail);
    heap
}

pub struct Recording {
    pub log: EventLog,
    pub heap: ReferenceHeap,
    pub ctx: LogTag,
    pub main: LogValue,
}

impl Recording {
    /// Context, host functions and the `tick` script, with a snapshot taken right after setup
    pub fn start(config: TtdConfig) -> Self {
        let mut log = EventLog::new(config).unwrap();
        log.init_for_record();
        let mut heap = registered_heap();
        let ctx = heap.create_context(&mut log, "main.js").unwrap();
        let global = heap.global_object(&mut log, ctx).unwrap();
        for name in ["print", "fail"] {
            let f = heap.create_host_function(&mut log, ctx, name).unwrap();
            heap.perform(
                &mut log,
                ctx,
                ActionOp::SetProperty {
                    object: global.clone(),
                    pid: property_id(name),
                    value: f,
                    use_strict: false,
                },
            )
            .unwrap();
        }
        let main = heap.load_script(&mut log, ctx, "main.js", "tick").unwrap();
        log.do_snapshot_extract(&heap).unwrap();
        Self { log, heap, ctx, main }
    }

    /// One top-level call to `tick`, clearing any exception it left behind
    pub fn tick(&mut self) -> LogValue {
        let result = self
            .heap
            .call_function(&mut self.log, self.ctx, &self.main, &[])
            .unwrap();
        if self.heap.has_pending_exception() {
            self.heap
                .perform(&mut self.log, self.ctx, ActionOp::GetAndClearException)
                .unwrap();
        }
        result
    }

    pub fn ticks(&mut self, n: usize) -> LogValue {
        let mut last = LogValue::Undefined;
        for _ in 0..n {
            last = self.tick();
        }
        last
    }
}

pub fn config(snap_interval_ms: u64, snap_history_length: u32) -> TtdConfig {
    TtdConfig {
        snap_interval_ms,
        snap_history_length,
        ..TtdConfig::default()
    }
}

pub fn counter(heap: &ReferenceHeap, ctx: LogTag) -> Option<f64> {
    let global = heap.context_global(ctx).ok()?;
    heap.number_value(heap.get_named(global, "counter").ok()?)
}

//! The event log driver
//!
//! [`EventLog`] owns the ordered list of entries, the event-time counter, the
//! mode stack, and every snapshot the log still needs. Record mode appends
//! entries and takes snapshots on an elapsed-time cadence; replay mode walks
//! the same list with a cursor and checks that the program asks for exactly
//! the entries that were recorded, in order.

pub mod call_stack;
pub mod host;
pub mod mode;
pub mod persist;

pub use call_stack::{CallFrame, ShadowCallStack};
pub use host::ReplayHost;
pub use mode::{ModeStack, TtdMode};
pub use persist::LogHeader;

use crate::arena::{Slab, SlabKey};
use crate::config::TtdConfig;
use crate::error::{AbortReason, TtdError, TtdResult};
use crate::events::{
    ActionOp, EventKind, EventLogEntry, EventPayload, ExternalCallData, JsRtAction, LogValue,
    ResultStatus, SnapshotEventData,
};
use crate::heap::{HeapBuilder, HeapWalker};
use crate::inflate_map::InflateMap;
use crate::snapshot::{
    IdentityTag, LogTag, PropertyId, SnapShot, SnapshotExtractor, TopLevelEval,
    TopLevelNewFunction, TopLevelScriptLoad, TopLevelScripts,
};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;
use tracing::{debug, trace};

/// Handle to an entry recorded in this session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHandle {
    key: SlabKey,
    event_time: i64,
}

impl EventHandle {
    /// Event time of the entry
    pub fn event_time(&self) -> i64 {
        self.event_time
    }
}

/// Snapshot attached to a root call so replay can resume right before it
#[derive(Debug, Clone)]
pub struct ReadyToRunSnapshot {
    /// Heap state before the call
    pub snap: SnapShot,
    /// Next log tag at the call
    pub restore_log_tag: LogTag,
    /// Next identity tag at the call
    pub restore_identity_tag: IdentityTag,
}

/// Entry counts and memory use
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogStats {
    /// Entries in the log
    pub entries: usize,
    /// Entries per kind
    pub per_kind: BTreeMap<EventKind, usize>,
    /// Snapshot entries
    pub snapshots: usize,
    /// Snapshot entries whose snapshot is loaded
    pub loaded_snapshots: usize,
    /// Ready-to-run snapshots
    pub ready_to_run: usize,
    /// Bytes in live entry slots
    pub used_memory: u64,
    /// Bytes reserved by the entry arena
    pub reserved_memory: u64,
}

/// Ordered event log plus the record/replay state around it
#[derive(Debug)]
pub struct EventLog {
    config: TtdConfig,
    entries: Slab<EventLogEntry>,
    order: VecDeque<SlabKey>,

    event_time_ctr: i64,
    replay_pos: usize,
    last_consistent_time: i64,

    modes: ModeStack,
    call_stack: ShadowCallStack,

    next_log_tag: u64,
    next_identity_tag: u64,
    next_symbol_id: u32,

    scripts: TopLevelScripts,
    next_body_counter: u64,

    extractor: SnapshotExtractor,
    inflate_map: InflateMap,
    last_inflate_snapshot_time: Option<i64>,
    elapsed_since_snapshot_ms: f64,
    started: Instant,

    rtr_snaps: FxHashMap<i64, ReadyToRunSnapshot>,
}

impl EventLog {
    /// Create an empty log in pending mode
    pub fn new(config: TtdConfig) -> TtdResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            entries: Slab::new(),
            order: VecDeque::new(),
            event_time_ctr: 0,
            replay_pos: 0,
            last_consistent_time: -1,
            modes: ModeStack::default(),
            call_stack: ShadowCallStack::new(),
            next_log_tag: 1,
            next_identity_tag: 1,
            next_symbol_id: 1,
            scripts: TopLevelScripts::default(),
            next_body_counter: 1,
            extractor: SnapshotExtractor::new(),
            inflate_map: InflateMap::new(),
            last_inflate_snapshot_time: None,
            elapsed_since_snapshot_ms: 0.0,
            started: Instant::now(),
            rtr_snaps: FxHashMap::default(),
        })
    }

    /// Configuration the log was created with
    pub fn config(&self) -> &TtdConfig {
        &self.config
    }

    // ---- modes ----

    /// Switch to recording
    pub fn init_for_record(&mut self) {
        self.set_global_mode(TtdMode::RECORD_MODE | TtdMode::CURRENTLY_ENABLED);
    }

    /// Switch to replay, optionally under a debugger
    pub fn init_for_replay(&mut self, debugging: bool) {
        let mut mode = TtdMode::REPLAY_MODE | TtdMode::CURRENTLY_ENABLED;
        if debugging {
            mode |= TtdMode::DEBUGGER_MODE;
        }
        self.set_global_mode(mode);
        self.replay_pos = 0;
        self.event_time_ctr = self.first_event_time_in_log().unwrap_or(0);
    }

    /// Replace the global mode
    pub fn set_global_mode(&mut self, mode: TtdMode) {
        self.modes.set_global(mode);
        debug!(mode = %self.modes.current(), "global mode set");
    }

    /// Push a scoped mode such as excluded execution
    pub fn push_mode(&mut self, mode: TtdMode) {
        self.modes.push(mode);
        trace!(mode = %self.modes.current(), "mode pushed");
    }

    /// Pop a scoped mode; it must be the most recently pushed one
    pub fn pop_mode(&mut self, mode: TtdMode) -> TtdResult<()> {
        if !self.modes.pop(mode) {
            debug_assert!(false, "popped mode {} is not on top", mode);
            return Err(TtdError::PolicyViolation("popped mode is not on top of the stack"));
        }
        trace!(mode = %self.modes.current(), "mode popped");
        Ok(())
    }

    /// Mode state
    pub fn modes(&self) -> &ModeStack {
        &self.modes
    }

    // ---- tags ----

    /// Hand out the next log tag
    pub fn next_log_tag(&mut self) -> LogTag {
        let tag = LogTag(self.next_log_tag);
        self.next_log_tag += 1;
        tag
    }

    /// Hand out the next identity tag
    pub fn next_identity_tag(&mut self) -> IdentityTag {
        let tag = IdentityTag(self.next_identity_tag);
        self.next_identity_tag += 1;
        tag
    }

    // ---- recording ----

    fn ensure_recording(&self) -> TtdResult<()> {
        if self.modes.should_perform_record_action() {
            Ok(())
        } else {
            debug_assert!(false, "record attempted in mode {}", self.modes.current());
            Err(TtdError::PolicyViolation("record outside record mode"))
        }
    }

    /// Append an entry at the next event time
    pub fn record_event(&mut self, payload: EventPayload) -> TtdResult<EventHandle> {
        self.ensure_recording()?;
        let event_time = self.event_time_ctr;
        self.event_time_ctr += 1;
        let key = self.entries.insert(EventLogEntry::new(event_time, payload));
        self.order.push_back(key);
        self.last_consistent_time = event_time;
        Ok(EventHandle { key, event_time })
    }

    /// Entry recorded in this session
    pub fn event(&self, handle: EventHandle) -> Option<&EventLogEntry> {
        self.entries.get(handle.key)
    }

    /// Entry recorded in this session, for completing it
    pub fn event_mut(&mut self, handle: EventHandle) -> Option<&mut EventLogEntry> {
        self.entries.get_mut(handle.key)
    }

    /// Record a JsRT action; its status stays pending until completed
    pub fn record_action(&mut self, context_tag: LogTag, op: ActionOp) -> TtdResult<EventHandle> {
        let handle = self.record_event(EventPayload::Action(JsRtAction::new(context_tag, op)))?;
        if let Some(entry) = self.entries.get_mut(handle.key) {
            entry.result_status = ResultStatus::Pending;
        }
        Ok(handle)
    }

    /// Fill in a recorded action's outcome
    pub fn complete_action(
        &mut self,
        handle: EventHandle,
        status: ResultStatus,
        result: LogValue,
    ) -> TtdResult<()> {
        let entry = self
            .entries
            .get_mut(handle.key)
            .ok_or(TtdError::PolicyViolation("completing a pruned action"))?;
        match &mut entry.payload {
            EventPayload::Action(action) => {
                action.result = result;
                entry.result_status = status;
                Ok(())
            }
            _ => Err(TtdError::PolicyViolation("completing a non-action entry")),
        }
    }

    // ---- replay cursor ----

    fn cursor_key(&self, expected: Option<EventKind>) -> TtdResult<SlabKey> {
        let key = match self.order.get(self.replay_pos) {
            Some(key) => *key,
            None => return self.abort_replay_return_to_host(),
        };
        let entry = self
            .entries
            .get(key)
            .ok_or(TtdError::PolicyViolation("stale log entry"))?;
        if entry.event_time != self.event_time_ctr {
            return Err(TtdError::ReplayDivergence {
                expected: self.event_time_ctr,
                found: entry.event_time,
            });
        }
        if let Some(kind) = expected {
            if entry.kind() != kind {
                return Err(TtdError::EventKindMismatch {
                    time: entry.event_time,
                    expected: kind,
                    found: entry.kind(),
                });
            }
        }
        Ok(key)
    }

    fn advance_cursor(&mut self) {
        self.last_consistent_time = self.event_time_ctr;
        self.replay_pos += 1;
        self.event_time_ctr += 1;
    }

    /// Entry under the replay cursor
    pub fn peek_next_event(&self) -> Option<&EventLogEntry> {
        self.order
            .get(self.replay_pos)
            .and_then(|key| self.entries.get(*key))
    }

    /// Consume the next entry, which must have `kind` and the expected event time
    pub fn replay_next_event(&mut self, kind: EventKind) -> TtdResult<&EventLogEntry> {
        let key = self.cursor_key(Some(kind))?;
        self.advance_cursor();
        self.entries
            .get(key)
            .ok_or(TtdError::PolicyViolation("stale log entry"))
    }

    pub(crate) fn replay_next_any(&mut self) -> TtdResult<&EventLogEntry> {
        let key = self.cursor_key(None)?;
        self.advance_cursor();
        self.entries
            .get(key)
            .ok_or(TtdError::PolicyViolation("stale log entry"))
    }

    /// Unwind to the host's control loop: the log has no more entries
    pub fn abort_replay_return_to_host<T>(&self) -> TtdResult<T> {
        debug!(
            last_consistent = self.last_consistent_time,
            "replay reached end of log"
        );
        Err(TtdError::Abort(AbortReason::EndOfLog))
    }

    // ---- data events ----

    /// Record a host-supplied double such as `Date.now()`
    pub fn record_double(&mut self, value: f64) -> TtdResult<()> {
        self.record_event(EventPayload::Double(value)).map(|_| ())
    }

    /// Replay a host-supplied double
    pub fn replay_double(&mut self) -> TtdResult<f64> {
        let entry = self.replay_next_event(EventKind::Double)?;
        match &entry.payload {
            EventPayload::Double(v) => Ok(*v),
            _ => Err(payload_mismatch(EventKind::Double, entry)),
        }
    }

    /// Record a host-supplied string
    pub fn record_string(&mut self, value: &str) -> TtdResult<()> {
        self.record_event(EventPayload::String(value.to_string())).map(|_| ())
    }

    /// Replay a host-supplied string
    pub fn replay_string(&mut self) -> TtdResult<String> {
        let entry = self.replay_next_event(EventKind::String)?;
        match &entry.payload {
            EventPayload::String(s) => Ok(s.clone()),
            _ => Err(payload_mismatch(EventKind::String, entry)),
        }
    }

    /// Record a freshly drawn random seed
    pub fn record_random_seed(&mut self, seed0: u64, seed1: u64) -> TtdResult<()> {
        self.record_event(EventPayload::RandomSeed { seed0, seed1 }).map(|_| ())
    }

    /// Replay a random seed
    pub fn replay_random_seed(&mut self) -> TtdResult<(u64, u64)> {
        let entry = self.replay_next_event(EventKind::RandomSeed)?;
        match &entry.payload {
            EventPayload::RandomSeed { seed0, seed1 } => Ok((*seed0, *seed1)),
            _ => Err(payload_mismatch(EventKind::RandomSeed, entry)),
        }
    }

    /// Record one step of a property enumeration
    pub fn record_property_enum(
        &mut self,
        return_code: bool,
        pid: PropertyId,
        attributes: u8,
        name: Option<&str>,
    ) -> TtdResult<()> {
        self.record_event(EventPayload::PropertyEnum {
            return_code,
            pid,
            attributes,
            name: name.map(str::to_string),
        })
        .map(|_| ())
    }

    /// Replay one step of a property enumeration
    pub fn replay_property_enum(&mut self) -> TtdResult<(bool, PropertyId, u8, Option<String>)> {
        let entry = self.replay_next_event(EventKind::PropertyEnum)?;
        match &entry.payload {
            EventPayload::PropertyEnum {
                return_code,
                pid,
                attributes,
                name,
            } => Ok((*return_code, *pid, *attributes, name.clone())),
            _ => Err(payload_mismatch(EventKind::PropertyEnum, entry)),
        }
    }

    /// Property id for a new symbol: drawn fresh while recording, read back while replaying
    pub fn symbol_creation(&mut self) -> TtdResult<PropertyId> {
        if self.modes.should_perform_replay_action() {
            let entry = self.replay_next_event(EventKind::SymbolCreation)?;
            return match &entry.payload {
                EventPayload::SymbolCreation { pid } => Ok(*pid),
                _ => Err(payload_mismatch(EventKind::SymbolCreation, entry)),
            };
        }
        let pid = PropertyId(self.next_symbol_id);
        self.next_symbol_id += 1;
        if self.modes.should_perform_record_action() {
            self.record_event(EventPayload::SymbolCreation { pid })?;
        }
        Ok(pid)
    }

    /// Record a weak collection lookup, whose answer depends on collection timing
    pub fn record_weak_collection_contains(&mut self, contains: bool) -> TtdResult<()> {
        self.record_event(EventPayload::WeakCollectionContains { contains })
            .map(|_| ())
    }

    /// Replay a weak collection lookup
    pub fn replay_weak_collection_contains(&mut self) -> TtdResult<bool> {
        let entry = self.replay_next_event(EventKind::WeakCollectionContains)?;
        match &entry.payload {
            EventPayload::WeakCollectionContains { contains } => Ok(*contains),
            _ => Err(payload_mismatch(EventKind::WeakCollectionContains, entry)),
        }
    }

    /// Record a telemetry message
    pub fn record_telemetry(&mut self, message: &str, do_print: bool) -> TtdResult<()> {
        self.record_event(EventPayload::Telemetry {
            message: message.to_string(),
            do_print,
        })
        .map(|_| ())
    }

    /// Record that control returned to the host event loop
    pub fn record_yield_point(&mut self, yield_id: u64) -> TtdResult<()> {
        let wall_time = self.wall_time_ms();
        self.record_event(EventPayload::EventLoopYieldPoint { yield_id, wall_time })
            .map(|_| ())
    }

    /// Record a host function registering a callback
    pub fn record_external_cb_register(&mut self, callback_function: LogValue) -> TtdResult<EventHandle> {
        self.record_event(EventPayload::ExternalCbRegisterCall {
            callback_function,
            last_nested_event_time: -1,
        })
    }

    /// Replay a callback registration
    pub fn replay_external_cb_register(&mut self) -> TtdResult<LogValue> {
        let entry = self.replay_next_event(EventKind::ExternalCbRegisterCall)?;
        match &entry.payload {
            EventPayload::ExternalCbRegisterCall {
                callback_function, ..
            } => Ok(callback_function.clone()),
            _ => Err(payload_mismatch(EventKind::ExternalCbRegisterCall, entry)),
        }
    }

    /// Record the start of a call from script into a host function
    pub fn record_external_call(
        &mut self,
        function: LogValue,
        args: Vec<LogValue>,
        root_nesting_depth: i32,
    ) -> TtdResult<EventHandle> {
        let handle = self.record_event(EventPayload::ExternalCall(ExternalCallData {
            function,
            root_nesting_depth,
            args,
            ..ExternalCallData::default()
        }))?;
        if let Some(entry) = self.entries.get_mut(handle.key) {
            entry.result_status = ResultStatus::Pending;
        }
        Ok(handle)
    }

    /// Fill in the outcome of a host call once it returns
    pub fn complete_external_call(
        &mut self,
        handle: EventHandle,
        return_value: LogValue,
        has_script_exception: bool,
        has_terminating_exception: bool,
    ) -> TtdResult<()> {
        let last_nested = self.event_time_ctr - 1;
        let entry = self
            .entries
            .get_mut(handle.key)
            .ok_or(TtdError::PolicyViolation("completing a pruned external call"))?;
        match &mut entry.payload {
            EventPayload::ExternalCall(call) => {
                call.return_value = return_value;
                call.last_nested_event_time = last_nested;
                call.has_script_exception = has_script_exception;
                call.has_terminating_exception = has_terminating_exception;
                entry.result_status = if has_terminating_exception {
                    ResultStatus::DoesNotReturn
                } else if has_script_exception {
                    ResultStatus::Exception
                } else {
                    ResultStatus::Normal
                };
                Ok(())
            }
            _ => Err(TtdError::PolicyViolation("completing a non-call entry")),
        }
    }

    /// Consume an external call entry
    pub fn replay_external_call(&mut self) -> TtdResult<ExternalCallData> {
        let entry = self.replay_next_event(EventKind::ExternalCall)?;
        match &entry.payload {
            EventPayload::ExternalCall(call) => Ok(call.clone()),
            _ => Err(payload_mismatch(EventKind::ExternalCall, entry)),
        }
    }

    // ---- top-level code ----

    /// Counter for the next top-level body
    pub fn next_body_counter_id(&self) -> u64 {
        self.next_body_counter
    }

    fn claim_body_counter(&mut self, id: u64) {
        self.next_body_counter = self.next_body_counter.max(id + 1);
    }

    /// Register a loaded script and log its top-level code
    pub fn record_script_load(&mut self, script: TopLevelScriptLoad) -> TtdResult<()> {
        let id = script.info.body_counter_id;
        self.claim_body_counter(id);
        self.scripts.script_loads.push(script);
        self.record_event(EventPayload::TopLevelCode { body_counter_id: id })
            .map(|_| ())
    }

    /// Register a `new Function` body and log its top-level code
    pub fn record_new_function(&mut self, function: TopLevelNewFunction) -> TtdResult<()> {
        let id = function.info.body_counter_id;
        self.claim_body_counter(id);
        self.scripts.new_functions.push(function);
        self.record_event(EventPayload::TopLevelCode { body_counter_id: id })
            .map(|_| ())
    }

    /// Register an `eval` body and log its top-level code
    pub fn record_eval(&mut self, eval: TopLevelEval) -> TtdResult<()> {
        let id = eval.info.body_counter_id;
        self.claim_body_counter(id);
        self.scripts.evals.push(eval);
        self.record_event(EventPayload::TopLevelCode { body_counter_id: id })
            .map(|_| ())
    }

    /// Every top-level body loaded so far
    pub fn scripts(&self) -> &TopLevelScripts {
        &self.scripts
    }

    // ---- call stack ----

    /// Re-establish the shadow stack before a host-invoked call at `event_time`
    pub fn reset_call_stack_for_top_level_call(&mut self, event_time: i64) {
        self.call_stack.reset_for_top_level_call(event_time);
    }

    /// Shadow call stack
    pub fn call_stack(&self) -> &ShadowCallStack {
        &self.call_stack
    }

    /// Shadow call stack, for pushing and popping frames
    pub fn call_stack_mut(&mut self) -> &mut ShadowCallStack {
        &mut self.call_stack
    }

    // ---- snapshots ----

    /// True once enough execution time has passed since the last snapshot
    pub fn is_time_for_snapshot(&self) -> bool {
        self.elapsed_since_snapshot_ms >= self.config.snap_interval_ms as f64
    }

    /// Account execution time toward the snapshot cadence
    pub fn add_elapsed_execution_time(&mut self, ms: f64) {
        self.elapsed_since_snapshot_ms += ms;
    }

    /// Take a snapshot, log it, and prune; returns the snapshot's event time
    pub fn do_snapshot_extract(&mut self, walker: &dyn HeapWalker) -> TtdResult<i64> {
        self.ensure_recording()?;
        let snap = self.extractor.extract(walker, 0.0)?;
        let objects = snap.objects.len();
        let data = SnapshotEventData {
            restore_log_tag: LogTag(self.next_log_tag),
            restore_identity_tag: IdentityTag(self.next_identity_tag),
            snap: Some(Box::new(snap)),
        };
        let handle = self.record_event(EventPayload::Snapshot(data))?;
        self.elapsed_since_snapshot_ms = 0.0;
        debug!(event_time = handle.event_time, objects, "snapshot taken");
        self.prune_log_length();
        Ok(handle.event_time)
    }

    /// Drop the oldest snapshots beyond the history length, and every entry before the oldest kept one
    pub fn prune_log_length(&mut self) {
        let snap_positions: Vec<usize> = self
            .iter()
            .enumerate()
            .filter(|(_, e)| e.kind() == EventKind::Snapshot)
            .map(|(i, _)| i)
            .collect();
        let keep = self.config.snap_history_length as usize;
        if snap_positions.len() <= keep {
            return;
        }
        let cut = snap_positions[snap_positions.len() - keep];

        let mut dropped = 0;
        for _ in 0..cut {
            if let Some(key) = self.order.pop_front() {
                self.entries.remove(key);
                dropped += 1;
            }
        }
        self.replay_pos = self.replay_pos.saturating_sub(cut);
        if let Some(first) = self.first_event_time_in_log() {
            self.rtr_snaps.retain(|t, _| *t >= first);
        }
        debug!(dropped, remaining = self.order.len(), "log pruned");
    }

    /// Event times of every snapshot entry
    pub fn snapshot_times(&self) -> Vec<i64> {
        self.iter()
            .filter(|e| e.kind() == EventKind::Snapshot)
            .map(|e| e.event_time)
            .collect()
    }

    /// Latest snapshot at or before `target`, preferring a later ready-to-run snapshot when allowed
    pub fn find_snap_time_for_event_time(&self, target: i64, allow_rtr: bool) -> TtdResult<i64> {
        let mut best = self
            .snapshot_times()
            .into_iter()
            .filter(|t| *t <= target)
            .max();
        if allow_rtr {
            for &t in self.rtr_snaps.keys() {
                if t <= target && best.map_or(true, |b| t > b) {
                    best = Some(t);
                }
            }
        }
        best.ok_or(TtdError::MissingInflateTarget {
            what: "snapshot",
            id: target.max(0) as u64,
        })
    }

    /// Rebuild the heap from the snapshot at `etime` and move the cursor there
    ///
    /// Runs as excluded execution: nothing the builder does while the heap
    /// is rebuilt is recorded or replayed.
    pub fn do_snapshot_inflate(&mut self, etime: i64, builder: &mut dyn HeapBuilder) -> TtdResult<()> {
        self.push_mode(TtdMode::EXCLUDED_EXECUTION_TT_ACTION);
        let inflated = self.inflate_snapshot_at(etime, builder);
        self.pop_mode(TtdMode::EXCLUDED_EXECUTION_TT_ACTION)?;
        inflated
    }

    fn inflate_snapshot_at(&mut self, etime: i64, builder: &mut dyn HeapBuilder) -> TtdResult<()> {
        let (snap, restore_log_tag, restore_identity_tag) =
            locate_snapshot(&self.entries, &self.order, &self.rtr_snaps, etime)?;
        let pos = self
            .order
            .iter()
            .position(|k| self.entries.get(*k).map(|e| e.event_time) == Some(etime))
            .ok_or(TtdError::MissingInflateTarget {
                what: "event",
                id: etime.max(0) as u64,
            })?;

        let reuse = self.last_inflate_snapshot_time == Some(etime)
            && !builder.context_created_or_destroyed_in_replay()
            && snap.is_well_known_reuse_safe(&self.inflate_map, &*builder);
        if reuse {
            self.inflate_map.prep_for_reinflate(snap.inflate_counts());
        } else {
            builder.unload_contexts()?;
            self.inflate_map.prep_for_initial_inflate(snap.inflate_counts());
        }
        snap.inflate(&mut self.inflate_map, builder, &self.scripts)?;
        self.inflate_map.cleanup_after_inflate();

        self.last_inflate_snapshot_time = Some(etime);
        self.replay_pos = pos;
        self.event_time_ctr = etime;
        self.last_consistent_time = etime;
        self.next_log_tag = restore_log_tag.0;
        self.next_identity_tag = restore_identity_tag.0;
        self.call_stack.reset_for_top_level_call(etime);
        debug!(event_time = etime, reuse, "snapshot inflated");
        Ok(())
    }

    /// Attach a ready-to-run snapshot to the root call at `begin_time` if configured and missing
    pub fn do_rtr_snap_if_needed(&mut self, walker: &dyn HeapWalker, begin_time: i64) -> TtdResult<bool> {
        if !self.config.record_ready_to_run
            || !self.modes.is_debugger_mode()
            || self.rtr_snaps.contains_key(&begin_time)
        {
            return Ok(false);
        }
        let snap = self.extractor.extract(walker, 0.0)?;
        self.rtr_snaps.insert(
            begin_time,
            ReadyToRunSnapshot {
                snap,
                restore_log_tag: LogTag(self.next_log_tag),
                restore_identity_tag: IdentityTag(self.next_identity_tag),
            },
        );
        debug!(event_time = begin_time, "ready-to-run snapshot taken");
        Ok(true)
    }

    /// Inflate map of the last inflate, for pinning and reuse checks
    pub fn inflate_map(&self) -> &InflateMap {
        &self.inflate_map
    }

    // ---- time queries ----

    /// Event time the next entry gets (record) or must have (replay)
    pub fn current_event_time(&self) -> i64 {
        self.event_time_ctr
    }

    /// Event time of the last consumed or recorded entry
    pub fn last_event_time(&self) -> i64 {
        self.event_time_ctr - 1
    }

    /// Last event time that was known to be consistent with the log
    pub fn last_consistent_event_time(&self) -> i64 {
        self.last_consistent_time
    }

    /// Time of the oldest retained entry
    pub fn first_event_time_in_log(&self) -> Option<i64> {
        self.iter().next().map(|e| e.event_time)
    }

    /// Time of the newest entry
    pub fn last_event_time_in_log(&self) -> Option<i64> {
        self.order
            .back()
            .and_then(|k| self.entries.get(*k))
            .map(|e| e.event_time)
    }

    /// Time of the `k`th retained entry
    pub fn kth_event_time_in_log(&self, k: usize) -> Option<i64> {
        self.order
            .get(k)
            .and_then(|key| self.entries.get(*key))
            .map(|e| e.event_time)
    }

    /// Snapshot interval containing `t`: the snapshot at or before it and the next one, if any
    pub fn get_snapshot_bound_interval(&self, t: i64) -> TtdResult<(i64, Option<i64>)> {
        let times = self.snapshot_times();
        let start = times
            .iter()
            .copied()
            .filter(|s| *s <= t)
            .max()
            .ok_or(TtdError::MissingInflateTarget {
                what: "snapshot",
                id: t.max(0) as u64,
            })?;
        let end = times.iter().copied().find(|s| *s > t);
        Ok((start, end))
    }

    /// Interval before the one starting at snapshot `start`
    pub fn get_previous_snapshot_interval(&self, start: i64) -> Option<(i64, i64)> {
        self.snapshot_times()
            .into_iter()
            .filter(|s| *s < start)
            .max()
            .map(|prev| (prev, start))
    }

    /// Milliseconds since the log was created
    pub fn wall_time_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    // ---- inspection ----

    /// Entries in event-time order
    pub fn iter(&self) -> impl Iterator<Item = &EventLogEntry> + '_ {
        self.order.iter().filter_map(move |k| self.entries.get(*k))
    }

    /// Entry count
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if nothing is logged
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Entry counts and memory use
    pub fn stats(&self) -> LogStats {
        let mut stats = LogStats {
            entries: self.order.len(),
            ready_to_run: self.rtr_snaps.len(),
            ..LogStats::default()
        };
        for entry in self.iter() {
            *stats.per_kind.entry(entry.kind()).or_insert(0) += 1;
            if let EventPayload::Snapshot(data) = &entry.payload {
                stats.snapshots += 1;
                if data.snap.is_some() {
                    stats.loaded_snapshots += 1;
                }
            }
        }
        let (used, reserved) = self.entries.memory_stats();
        stats.used_memory = used;
        stats.reserved_memory = reserved;
        stats
    }
}

fn payload_mismatch(expected: EventKind, entry: &EventLogEntry) -> TtdError {
    TtdError::EventKindMismatch {
        time: entry.event_time,
        expected,
        found: entry.payload.kind(),
    }
}

fn locate_snapshot<'a>(
    entries: &'a Slab<EventLogEntry>,
    order: &VecDeque<SlabKey>,
    rtr_snaps: &'a FxHashMap<i64, ReadyToRunSnapshot>,
    etime: i64,
) -> TtdResult<(&'a SnapShot, LogTag, IdentityTag)> {
    let missing = TtdError::MissingInflateTarget {
        what: "snapshot",
        id: etime.max(0) as u64,
    };
    if let Some(rtr) = rtr_snaps.get(&etime) {
        return Ok((&rtr.snap, rtr.restore_log_tag, rtr.restore_identity_tag));
    }
    for key in order {
        let Some(entry) = entries.get(*key) else {
            continue;
        };
        if entry.event_time != etime {
            continue;
        }
        return match &entry.payload {
            EventPayload::Snapshot(data) => match &data.snap {
                Some(snap) => Ok((&**snap, data.restore_log_tag, data.restore_identity_tag)),
                None => Err(missing),
            },
            _ => Err(missing),
        };
    }
    Err(missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_log(history: u32) -> EventLog {
        let config = TtdConfig {
            snap_history_length: history,
            snap_interval_ms: 10,
            ..TtdConfig::default()
        };
        let mut log = EventLog::new(config).unwrap();
        log.init_for_record();
        log
    }

    fn fake_snapshot(log: &mut EventLog) -> i64 {
        let data = SnapshotEventData {
            restore_log_tag: LogTag(log.next_log_tag),
            restore_identity_tag: IdentityTag(log.next_identity_tag),
            snap: Some(Box::default()),
        };
        let t = log.record_event(EventPayload::Snapshot(data)).unwrap().event_time();
        log.prune_log_length();
        t
    }

    #[test]
    fn test_event_times_strictly_increase() {
        let mut log = recording_log(2);
        log.record_double(1.0).unwrap();
        log.record_string("a").unwrap();
        log.record_random_seed(1, 2).unwrap();
        let times: Vec<i64> = log.iter().map(|e| e.event_time).collect();
        assert_eq!(times, vec![0, 1, 2]);
        assert_eq!(log.last_event_time(), 2);
    }

    #[test]
    fn test_record_requires_record_mode() {
        let mut log = EventLog::new(TtdConfig::default()).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| log.record_double(1.0)));
        match result {
            Ok(r) => assert!(matches!(r, Err(TtdError::PolicyViolation(_)))),
            Err(_) => assert!(cfg!(debug_assertions)),
        }
    }

    #[test]
    fn test_excluded_execution_blocks_record() {
        let mut log = recording_log(2);
        log.push_mode(TtdMode::EXCLUDED_EXECUTION_TT_ACTION);
        assert!(!log.modes().should_perform_record_action());
        log.pop_mode(TtdMode::EXCLUDED_EXECUTION_TT_ACTION).unwrap();
        assert!(log.modes().should_perform_record_action());
    }

    #[test]
    fn test_payload_mismatch_reports_entry_time() {
        let entry = EventLogEntry::new(7, EventPayload::Double(1.0));
        match payload_mismatch(EventKind::String, &entry) {
            TtdError::EventKindMismatch {
                time,
                expected,
                found,
            } => {
                assert_eq!(time, 7);
                assert_eq!(expected, EventKind::String);
                assert_eq!(found, EventKind::Double);
            }
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn test_replay_checks_time_and_kind() {
        let mut log = recording_log(2);
        log.record_double(2.5).unwrap();
        log.record_random_seed(3, 4).unwrap();

        log.init_for_replay(false);
        assert!(matches!(
            log.replay_random_seed(),
            Err(TtdError::EventKindMismatch {
                expected: EventKind::RandomSeed,
                found: EventKind::Double,
                ..
            })
        ));
        assert_eq!(log.replay_double().unwrap(), 2.5);
        assert_eq!(log.replay_random_seed().unwrap(), (3, 4));
        assert!(matches!(
            log.replay_double(),
            Err(TtdError::Abort(AbortReason::EndOfLog))
        ));
        assert_eq!(log.last_consistent_event_time(), 1);
    }

    #[test]
    fn test_symbol_creation_round_trip() {
        let mut log = recording_log(2);
        let a = log.symbol_creation().unwrap();
        let b = log.symbol_creation().unwrap();
        assert_ne!(a, b);
        log.init_for_replay(false);
        assert_eq!(log.symbol_creation().unwrap(), a);
        assert_eq!(log.symbol_creation().unwrap(), b);
    }

    #[test]
    fn test_complete_action_sets_status_and_result() {
        let mut log = recording_log(2);
        let handle = log
            .record_action(LogTag(1), ActionOp::AllocateObject { is_external: false })
            .unwrap();
        assert_eq!(log.event(handle).unwrap().result_status, ResultStatus::Pending);
        log.complete_action(handle, ResultStatus::Normal, LogValue::Object(LogTag(5)))
            .unwrap();
        let entry = log.event(handle).unwrap();
        assert_eq!(entry.result_status, ResultStatus::Normal);
        assert_eq!(entry.action().unwrap().result, LogValue::Object(LogTag(5)));
    }

    #[test]
    fn test_pruning_keeps_history_and_later_entries() {
        let mut log = recording_log(2);
        let s1 = fake_snapshot(&mut log);
        log.record_double(1.0).unwrap();
        let s2 = fake_snapshot(&mut log);
        log.record_double(2.0).unwrap();
        assert_eq!(log.snapshot_times(), vec![s1, s2]);
        assert_eq!(log.first_event_time_in_log(), Some(s1));

        let s3 = fake_snapshot(&mut log);
        log.record_double(3.0).unwrap();
        assert_eq!(log.snapshot_times(), vec![s2, s3]);
        assert_eq!(log.first_event_time_in_log(), Some(s2));
        for t in s2..=log.last_event_time() {
            assert!(log.find_snap_time_for_event_time(t, false).unwrap() <= t);
        }
    }

    #[test]
    fn test_snapshot_intervals() {
        let mut log = recording_log(4);
        let s1 = fake_snapshot(&mut log);
        log.record_double(1.0).unwrap();
        let s2 = fake_snapshot(&mut log);
        log.record_double(2.0).unwrap();
        assert_eq!(log.get_snapshot_bound_interval(s1 + 1).unwrap(), (s1, Some(s2)));
        assert_eq!(log.get_snapshot_bound_interval(s2 + 1).unwrap(), (s2, None));
        assert_eq!(log.get_previous_snapshot_interval(s2), Some((s1, s2)));
        assert_eq!(log.get_previous_snapshot_interval(s1), None);
        assert_eq!(log.kth_event_time_in_log(1), Some(1));
        assert_eq!(log.last_event_time_in_log(), Some(3));
    }

    #[test]
    fn test_snapshot_cadence() {
        let mut log = recording_log(2);
        assert!(!log.is_time_for_snapshot());
        log.add_elapsed_execution_time(6.0);
        assert!(!log.is_time_for_snapshot());
        log.add_elapsed_execution_time(6.0);
        assert!(log.is_time_for_snapshot());
    }

    #[test]
    fn test_stats_counts_kinds() {
        let mut log = recording_log(2);
        fake_snapshot(&mut log);
        log.record_double(1.0).unwrap();
        log.record_double(2.0).unwrap();
        let stats = log.stats();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.snapshots, 1);
        assert_eq!(stats.loaded_snapshots, 1);
        assert_eq!(stats.per_kind.get(&EventKind::Double), Some(&2));
    }
}

//! Executing JsRT actions against the reference heap
//!
//! While recording, [`ReferenceHeap::perform`] and
//! [`ReferenceHeap::call_function`] log every host call before running it.
//! While replaying, the same actions come back through the [`ReplayHost`]
//! impl and each result is checked against the log.
//!
//! Host functions touch the heap only through `perform`. Replay never runs
//! them again: their effects come back as the nested actions logged inside
//! the external call.

use super::reference::{
    not_a, property_id, Cell, ReferenceHeap, DEFAULT_ATTRIBUTES, FALSE, NULL, OBJECT_PROTOTYPE,
    TRUE, UNDEFINED,
};
use super::{snap_value, LivePtr, LiveValue};
use crate::error::{TtdError, TtdResult};
use crate::events::{ActionOp, ConvertTarget, JsRtAction, LogValue, ResultStatus};
use crate::log::{EventLog, ReplayHost};
use crate::snapshot::{
    ArrayInfo, JsTypeTag, LoadedBody, LogTag, ObjectPayload, PrimitivePayload, ScopeType,
    ScriptFunctionInfo, SnapObjectType, TopLevelCommonInfo, TopLevelScriptLoad, Var,
};
use sha2::{Digest, Sha256};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};

/// Native code standing in for a script function body
pub type Behavior = fn(&mut ReferenceHeap, &mut EventLog, &Invocation) -> TtdResult<LiveValue>;

/// Host function reachable from script
pub type HostFunction = fn(&mut ReferenceHeap, &mut EventLog, &HostCall) -> TtdResult<LogValue>;

/// A call into a function object
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Context the call runs in
    pub context: LogTag,
    /// Callee
    pub function: LivePtr,
    /// Receiver
    pub this: LiveValue,
    /// Arguments
    pub args: Vec<LiveValue>,
}

impl Invocation {
    /// Argument `i`, empty if absent
    pub fn arg(&self, i: usize) -> LiveValue {
        self.args.get(i).copied().unwrap_or_default()
    }
}

/// A call from script into a host function
#[derive(Debug, Clone)]
pub struct HostCall {
    /// Context the caller runs in
    pub context: LogTag,
    /// Arguments as they crossed the boundary
    pub args: Vec<LogValue>,
}

/// A value on its way out to the host
enum Produced {
    Value(LogValue),
    /// An object created during replay that the log has not named yet
    Untagged(LivePtr),
}

fn mismatch(time: i64, expected: &LogValue, found: impl ToString) -> TtdError {
    TtdError::ActionResultMismatch {
        time,
        expected: expected.to_string(),
        found: found.to_string(),
    }
}

fn array_get<T: Copy>(a: &ArrayInfo<T>, i: u32) -> Option<T> {
    a.entries
        .binary_search_by_key(&i, |(k, _)| *k)
        .ok()
        .map(|pos| a.entries[pos].1)
}

fn array_set<T>(a: &mut ArrayInfo<T>, i: u32, v: T) {
    match a.entries.binary_search_by_key(&i, |(k, _)| *k) {
        Ok(pos) => a.entries[pos].1 = v,
        Err(pos) => a.entries.insert(pos, (i, v)),
    }
    if i >= a.length {
        a.length = i + 1;
    }
}

fn number_to_string(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else if n.is_nan() {
        "NaN".to_string()
    } else {
        n.to_string()
    }
}

fn fresh_seeds() -> (u64, u64) {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let digest = Sha256::digest(nanos.to_le_bytes());
    let mut a = [0u8; 8];
    let mut b = [0u8; 8];
    a.copy_from_slice(&digest[..8]);
    b.copy_from_slice(&digest[8..16]);
    (u64::from_le_bytes(a) | 1, u64::from_le_bytes(b))
}

impl ReferenceHeap {
    // ---- registration ----

    /// Bind native code to every script body named `name`
    pub fn register_behavior(&mut self, name: &str, behavior: Behavior) {
        self.behaviors.insert(name.to_string(), behavior);
    }

    /// Make a host function available under `name`
    pub fn register_host_function(&mut self, name: &str, function: HostFunction) {
        self.host_functions.insert(name.to_string(), function);
    }

    // ---- contexts ----

    /// Create a script context; its tag comes from the log
    pub fn create_context(&mut self, log: &mut EventLog, uri: &str) -> TtdResult<LogTag> {
        let tag = log.next_log_tag();
        self.build_context(tag, uri, (0, 0))?;
        if log.modes().should_perform_replay_action() {
            self.context_churn = true;
        }
        debug!(context = %tag, uri, "context created");
        Ok(tag)
    }

    /// Drop a script context and the host's roots into it
    pub fn destroy_context(&mut self, log: &EventLog, ctx: LogTag) -> TtdResult<()> {
        let c = self.context_index(ctx)?;
        let global = self.contexts.remove(c).global;
        let cells = &self.cells;
        self.roots
            .retain(|_, p| !matches!(cells.get(p), Some(Cell::Object(o)) if o.context == global));
        if log.modes().should_perform_replay_action() {
            self.context_churn = true;
        }
        debug!(context = %ctx, "context destroyed");
        Ok(())
    }

    /// The context's global object as the host sees it
    pub fn global_object(&mut self, log: &mut EventLog, ctx: LogTag) -> TtdResult<LogValue> {
        let global = self.context_global(ctx)?;
        self.export_value(log, Var::Ref(global))
    }

    // ---- values ----

    fn singleton(&self, ctx: LogTag, token: &str) -> TtdResult<LiveValue> {
        let c = self.context_index(ctx)?;
        Ok(Var::Ref(self.builtin(c, token)?))
    }

    /// `undefined` in a context
    pub fn undefined(&self, ctx: LogTag) -> TtdResult<LiveValue> {
        self.singleton(ctx, UNDEFINED)
    }

    fn undefined_near(&self, obj: LivePtr) -> TtdResult<LiveValue> {
        let c = self.context_index_of_global(self.object(obj)?.context)?;
        Ok(Var::Ref(self.builtin(c, UNDEFINED)?))
    }

    fn boolean(&self, ctx: LogTag, b: bool) -> TtdResult<LiveValue> {
        self.singleton(ctx, if b { TRUE } else { FALSE })
    }

    /// Allocate a string
    pub fn new_string(&mut self, ctx: LogTag, s: &str) -> TtdResult<LiveValue> {
        let c = self.context_index(ctx)?;
        let ptr = self.new_primitive(c, JsTypeTag::String, PrimitivePayload::String(s.to_string()))?;
        Ok(Var::Ref(ptr))
    }

    /// Allocate an empty ordinary object
    pub fn new_object(&mut self, ctx: LogTag) -> TtdResult<LivePtr> {
        let c = self.context_index(ctx)?;
        self.new_object_cell(c, SnapObjectType::Dynamic, JsTypeTag::Object, ObjectPayload::None)
    }

    /// String contents, if `v` is a string
    pub fn string_value(&self, v: LiveValue) -> Option<String> {
        let p = self.primitive(v.reference()?)?;
        match &p.payload {
            PrimitivePayload::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Numeric value, if `v` is a number
    pub fn number_value(&self, v: LiveValue) -> Option<f64> {
        match v {
            Var::Int(i) => Some(i as f64),
            Var::Number(n) => Some(n),
            Var::Ref(ptr) => match &self.primitive(ptr)?.payload {
                PrimitivePayload::Number(n) => Some(*n),
                PrimitivePayload::Int64(i) => Some(*i as f64),
                PrimitivePayload::UInt64(u) => Some(*u as f64),
                _ => None,
            },
            Var::Invalid => None,
        }
    }

    fn primitive_type(&self, v: LiveValue) -> Option<JsTypeTag> {
        let p = self.primitive(v.reference()?)?;
        self.type_cell(p.type_ptr).ok().map(|t| t.js_type)
    }

    fn truthy(&self, v: LiveValue) -> bool {
        match v {
            Var::Invalid => false,
            Var::Int(i) => i != 0,
            Var::Number(n) => n != 0.0 && !n.is_nan(),
            Var::Ref(ptr) => match self.primitive(ptr) {
                None => true,
                Some(p) => match (self.primitive_type(v), &p.payload) {
                    (Some(JsTypeTag::Undefined), _) | (Some(JsTypeTag::Null), _) => false,
                    (_, PrimitivePayload::Bool(b)) => *b,
                    (_, PrimitivePayload::Number(n)) => *n != 0.0 && !n.is_nan(),
                    (_, PrimitivePayload::Int64(i)) => *i != 0,
                    (_, PrimitivePayload::UInt64(u)) => *u != 0,
                    (_, PrimitivePayload::String(s)) => !s.is_empty(),
                    (_, PrimitivePayload::Symbol(_)) => true,
                },
            },
        }
    }

    /// String conversion of any value
    pub fn display_string(&self, v: LiveValue) -> String {
        if let Some(s) = self.string_value(v) {
            return s;
        }
        if let Some(n) = self.number_value(v) {
            return number_to_string(n);
        }
        match (self.primitive_type(v), v.reference().and_then(|p| self.primitive(p))) {
            (Some(JsTypeTag::Undefined), _) => "undefined".to_string(),
            (Some(JsTypeTag::Null), _) => "null".to_string(),
            (_, Some(p)) => match &p.payload {
                PrimitivePayload::Bool(b) => b.to_string(),
                PrimitivePayload::Symbol(pid) => format!("Symbol({})", pid.0),
                _ => String::new(),
            },
            (_, None) if matches!(v, Var::Invalid) => "undefined".to_string(),
            _ => "[object Object]".to_string(),
        }
    }

    /// Property by name along the prototype chain, `undefined` if absent
    pub fn get_named(&self, obj: LivePtr, name: &str) -> TtdResult<LiveValue> {
        match self.lookup_property(obj, property_id(name))? {
            Some(v) => Ok(v),
            None => self.undefined_near(obj),
        }
    }

    /// Set a data property by name
    pub fn set_named(&mut self, obj: LivePtr, name: &str, value: LiveValue) -> TtdResult<()> {
        self.put_property(obj, property_id(name), value, DEFAULT_ATTRIBUTES)
    }

    /// Throw a `TypeError` carrying `message`; returns `undefined` for the caller to hand back
    pub fn throw_type_error(&mut self, ctx: LogTag, message: &str) -> TtdResult<LiveValue> {
        let error = self.new_string(ctx, &format!("TypeError: {}", message))?;
        self.raise(ctx, error)
    }

    /// Throw `value` as a script exception
    pub fn raise(&mut self, ctx: LogTag, value: LiveValue) -> TtdResult<LiveValue> {
        trace!(context = %ctx, "script exception raised");
        self.pending_exception = Some(value);
        self.undefined(ctx)
    }

    /// True while a script exception is waiting for the host
    pub fn has_pending_exception(&self) -> bool {
        self.pending_exception.is_some()
    }

    // ---- closures ----

    /// Script function `name` nested in `parent`, closing over `captured`
    pub fn new_closure(
        &mut self,
        ctx: LogTag,
        parent: LivePtr,
        name: &str,
        captured: Vec<LiveValue>,
    ) -> TtdResult<LivePtr> {
        let c = self.context_index(ctx)?;
        let parent_body = match &self.object(parent)?.payload {
            ObjectPayload::ScriptFunction(f) => LivePtr::from(f.body_id),
            _ => return Err(not_a(parent, "script function")),
        };
        let counter = self.body_cell(parent_body)?.top_level_body_counter;
        let body = self.new_body(c, name, Some(parent_body), counter);
        let scope = self.new_closure_scope(c, body, captured);
        self.new_object_cell(
            c,
            SnapObjectType::ScriptFunction,
            JsTypeTag::Function,
            ObjectPayload::ScriptFunction(ScriptFunctionInfo {
                body_id: body.into(),
                scope_id: Some(scope.into()),
                home_object: None,
                computed_name: Var::Invalid,
                has_super_reference: false,
            }),
        )
    }

    fn closure_slots(&self, function: LivePtr) -> TtdResult<LivePtr> {
        let scope = match &self.object(function)?.payload {
            ObjectPayload::ScriptFunction(ScriptFunctionInfo {
                scope_id: Some(scope), ..
            }) => LivePtr::from(*scope),
            _ => return Err(not_a(function, "closure")),
        };
        self.scope_cell(scope)?
            .entries
            .iter()
            .find(|(kind, _)| *kind == ScopeType::SlotArray)
            .map(|(_, ptr)| *ptr)
            .ok_or_else(|| not_a(function, "closure"))
    }

    /// Captured variable `i` of a closure
    pub fn closure_slot(&self, function: LivePtr, i: usize) -> TtdResult<LiveValue> {
        let slots = self.slot_array_cell(self.closure_slots(function)?)?;
        Ok(slots.slots.get(i).copied().unwrap_or_default())
    }

    /// Overwrite captured variable `i` of a closure
    pub fn set_closure_slot(&mut self, function: LivePtr, i: usize, value: LiveValue) -> TtdResult<()> {
        let ptr = self.closure_slots(function)?;
        let slots = &mut self.slot_array_cell_mut(ptr)?.slots;
        if slots.len() <= i {
            slots.resize(i + 1, Var::Invalid);
        }
        slots[i] = value;
        Ok(())
    }

    // ---- nondeterminism ----

    /// `Date.now()`: the clock while recording, the log while replaying
    pub fn date_now(&self, log: &mut EventLog) -> TtdResult<f64> {
        if log.modes().should_perform_replay_action() {
            return log.replay_double();
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as f64)
            .unwrap_or_default();
        if log.modes().should_perform_record_action() {
            log.record_double(now)?;
        }
        Ok(now)
    }

    /// `Math.random()`; the context is seeded on first use and the seed is logged
    pub fn math_random(&mut self, log: &mut EventLog, ctx: LogTag) -> TtdResult<f64> {
        let c = self.context_index(ctx)?;
        if self.contexts[c].random_seed0 == 0 && self.contexts[c].random_seed1 == 0 {
            let (seed0, seed1) = if log.modes().should_perform_replay_action() {
                log.replay_random_seed()?
            } else {
                let seeds = fresh_seeds();
                if log.modes().should_perform_record_action() {
                    log.record_random_seed(seeds.0, seeds.1)?;
                }
                seeds
            };
            self.contexts[c].random_seed0 = seed0;
            self.contexts[c].random_seed1 = seed1;
        }

        // xorshift128+
        let state = &mut self.contexts[c];
        let mut s1 = state.random_seed0;
        let s0 = state.random_seed1;
        state.random_seed0 = s0;
        s1 ^= s1 << 23;
        s1 ^= s1 >> 17;
        s1 ^= s0;
        s1 ^= s0 >> 26;
        state.random_seed1 = s1;
        let bits = s0.wrapping_add(s1) >> 11;
        Ok(bits as f64 / (1u64 << 53) as f64)
    }

    // ---- boundary ----

    fn export(&mut self, log: &mut EventLog, v: LiveValue) -> TtdResult<Produced> {
        let ptr = match v {
            Var::Invalid => return Ok(Produced::Value(LogValue::Undefined)),
            Var::Int(i) => return Ok(Produced::Value(LogValue::Number(i as f64))),
            Var::Number(n) => return Ok(Produced::Value(LogValue::Number(n))),
            Var::Ref(ptr) => ptr,
        };
        if let Some(p) = self.primitive(ptr) {
            let js_type = self.type_cell(p.type_ptr)?.js_type;
            return Ok(Produced::Value(match (js_type, &p.payload) {
                (JsTypeTag::Undefined, _) => LogValue::Undefined,
                (JsTypeTag::Null, _) => LogValue::Null,
                (_, PrimitivePayload::Bool(b)) => LogValue::Bool(*b),
                (_, PrimitivePayload::Number(n)) => LogValue::Number(*n),
                (_, PrimitivePayload::Int64(i)) => LogValue::Number(*i as f64),
                (_, PrimitivePayload::UInt64(u)) => LogValue::Number(*u as f64),
                (_, PrimitivePayload::Symbol(pid)) => LogValue::Symbol(*pid),
                (_, PrimitivePayload::String(s)) => LogValue::String(s.clone()),
            }));
        }

        let cell = self.object(ptr)?;
        if cell.log_tag.is_valid() {
            return Ok(Produced::Value(LogValue::Object(cell.log_tag)));
        }
        if !log.modes().should_tag_for_record() {
            return Ok(Produced::Untagged(ptr));
        }
        let had_identity = cell.identity_tag.is_valid();
        let tag = log.next_log_tag();
        let identity = if had_identity { None } else { Some(log.next_identity_tag()) };
        let cell = self.object_mut(ptr)?;
        cell.log_tag = tag;
        if let Some(identity) = identity {
            cell.identity_tag = identity;
        }
        self.roots.insert(tag, ptr);
        Ok(Produced::Value(LogValue::Object(tag)))
    }

    fn export_value(&mut self, log: &mut EventLog, v: LiveValue) -> TtdResult<LogValue> {
        match self.export(log, v)? {
            Produced::Value(v) => Ok(v),
            Produced::Untagged(_) => Err(TtdError::PolicyViolation(
                "object crossed the host boundary outside record mode",
            )),
        }
    }

    /// Give a replayed object the tag the recording gave it
    fn bind(&mut self, log: &mut EventLog, ptr: LivePtr, tag: LogTag) -> TtdResult<()> {
        let expected = log.next_log_tag();
        if expected != tag {
            warn!(expected = %expected, recorded = %tag, "log tag sequence drifted");
        }
        let needs_identity = !self.object(ptr)?.identity_tag.is_valid();
        let identity = if needs_identity { Some(log.next_identity_tag()) } else { None };
        let cell = self.object_mut(ptr)?;
        cell.log_tag = tag;
        if let Some(identity) = identity {
            cell.identity_tag = identity;
        }
        self.roots.insert(tag, ptr);
        Ok(())
    }

    fn check_result(
        &mut self,
        log: &mut EventLog,
        time: i64,
        expected: &LogValue,
        produced: Produced,
    ) -> TtdResult<()> {
        match (produced, expected) {
            (Produced::Untagged(ptr), LogValue::Object(tag)) => self.bind(log, ptr, *tag),
            (Produced::Untagged(ptr), _) => Err(mismatch(time, expected, format!("object {}", ptr))),
            (Produced::Value(v), _) if v == *expected => Ok(()),
            (Produced::Value(v), _) => Err(mismatch(time, expected, v)),
        }
    }

    fn import(&mut self, ctx: LogTag, v: &LogValue) -> TtdResult<LiveValue> {
        let c = self.context_index(ctx)?;
        Ok(match v {
            LogValue::Undefined => Var::Ref(self.builtin(c, UNDEFINED)?),
            LogValue::Null => Var::Ref(self.builtin(c, NULL)?),
            LogValue::Bool(true) => Var::Ref(self.builtin(c, TRUE)?),
            LogValue::Bool(false) => Var::Ref(self.builtin(c, FALSE)?),
            LogValue::Number(n) => Var::Number(*n),
            LogValue::String(s) => {
                Var::Ref(self.new_primitive(c, JsTypeTag::String, PrimitivePayload::String(s.clone()))?)
            }
            LogValue::Symbol(pid) => {
                Var::Ref(self.new_primitive(c, JsTypeTag::Symbol, PrimitivePayload::Symbol(*pid))?)
            }
            LogValue::Object(tag) => Var::Ref(
                self.roots
                    .get(tag)
                    .copied()
                    .ok_or_else(|| TtdError::Host(format!("no object holds log tag {}", tag)))?,
            ),
        })
    }

    fn import_object(&mut self, ctx: LogTag, v: &LogValue) -> TtdResult<Option<LivePtr>> {
        Ok(match self.import(ctx, v)? {
            Var::Ref(ptr) if self.is_object(ptr) => Some(ptr),
            _ => None,
        })
    }

    fn import_all(&mut self, ctx: LogTag, values: &[LogValue]) -> TtdResult<Vec<LiveValue>> {
        values.iter().map(|v| self.import(ctx, v)).collect()
    }

    // ---- actions ----

    /// Log and run one host call into the engine
    pub fn perform(&mut self, log: &mut EventLog, ctx: LogTag, op: ActionOp) -> TtdResult<LogValue> {
        if !log.modes().should_perform_record_action() {
            return Err(TtdError::PolicyViolation("host actions run only while recording"));
        }
        if matches!(
            op,
            ActionOp::CallExistingFunctionBegin { .. } | ActionOp::CallExistingFunctionEnd { .. }
        ) {
            return Err(TtdError::PolicyViolation("calls go through call_function"));
        }
        let handle = log.record_action(ctx, op.clone())?;
        let (status, value) = self.apply(log, ctx, &op)?;
        let result = self.export_value(log, value)?;
        log.complete_action(handle, status, result.clone())?;
        Ok(result)
    }

    /// Create a host function object bound to the registered function `name`
    pub fn create_host_function(&mut self, log: &mut EventLog, ctx: LogTag, name: &str) -> TtdResult<LogValue> {
        self.perform(
            log,
            ctx,
            ActionOp::AllocateFunction {
                name: Some(LogValue::String(name.to_string())),
            },
        )
    }

    /// Register a script with the log and parse it; returns the top-level function
    pub fn load_script(&mut self, log: &mut EventLog, ctx: LogTag, uri: &str, source: &str) -> TtdResult<LogValue> {
        let body_counter_id = log.next_body_counter_id();
        log.record_script_load(TopLevelScriptLoad {
            info: TopLevelCommonInfo {
                body_counter_id,
                module_id: 0,
                document_id: body_counter_id,
                uri: uri.to_string(),
                source_code: source.to_string(),
            },
            load_flag: 0,
        })?;
        self.perform(
            log,
            ctx,
            ActionOp::CodeParse {
                source: source.to_string(),
                uri: uri.to_string(),
                document_id: body_counter_id,
                body_counter_id,
                is_expression: false,
            },
        )
    }

    fn apply(&mut self, log: &mut EventLog, ctx: LogTag, op: &ActionOp) -> TtdResult<(ResultStatus, LiveValue)> {
        let c = self.context_index(ctx)?;
        let value = match op {
            ActionOp::AllocateNumber { value } => Var::Number(*value),
            ActionOp::AllocateString { value } => self.new_string(ctx, value)?,
            ActionOp::AllocateSymbol { .. } => {
                let pid = log.symbol_creation()?;
                Var::Ref(self.new_primitive(c, JsTypeTag::Symbol, PrimitivePayload::Symbol(pid))?)
            }
            ActionOp::VarConvert { value, target } => {
                let v = self.import(ctx, value)?;
                self.convert(ctx, v, *target)?
            }
            ActionOp::AllocateObject { is_external } => {
                let (tag, js_type) = if *is_external {
                    (SnapObjectType::External, JsTypeTag::HostObject)
                } else {
                    (SnapObjectType::Dynamic, JsTypeTag::Object)
                };
                Var::Ref(self.new_object_cell(c, tag, js_type, ObjectPayload::None)?)
            }
            ActionOp::AllocateArray { length } => Var::Ref(self.new_object_cell(
                c,
                SnapObjectType::Array,
                JsTypeTag::Array,
                ObjectPayload::Array(ArrayInfo {
                    length: *length,
                    entries: Vec::new(),
                }),
            )?),
            ActionOp::AllocateArrayBuffer { bytes } => Var::Ref(self.new_object_cell(
                c,
                SnapObjectType::ArrayBuffer,
                JsTypeTag::ArrayBuffer,
                ObjectPayload::ArrayBuffer(bytes.clone()),
            )?),
            ActionOp::AllocateFunction { name } => {
                let display_name = match name {
                    Some(n) => snap_value(self.import(ctx, n)?),
                    None => Var::Invalid,
                };
                Var::Ref(self.new_object_cell(
                    c,
                    SnapObjectType::ExternalFunction,
                    JsTypeTag::Function,
                    ObjectPayload::ExternalFunction { display_name },
                )?)
            }
            ActionOp::GetAndClearException => {
                let exception = self.pending_exception.take();
                match exception {
                    Some(e) => e,
                    None => self.undefined(ctx)?,
                }
            }
            ActionOp::GetProperty { object, pid } => match self.import_object(ctx, object)? {
                Some(obj) => match self.lookup_property(obj, *pid)? {
                    Some(v) => v,
                    None => self.undefined(ctx)?,
                },
                None => self.throw_type_error(ctx, "property read on a non-object")?,
            },
            ActionOp::SetProperty { object, pid, value, .. } => match self.import_object(ctx, object)? {
                Some(obj) => {
                    let v = self.import(ctx, value)?;
                    self.put_property(obj, *pid, v, DEFAULT_ATTRIBUTES)?;
                    self.undefined(ctx)?
                }
                None => self.throw_type_error(ctx, "property write on a non-object")?,
            },
            ActionOp::DefineProperty {
                object,
                pid,
                value,
                attributes,
            } => match self.import_object(ctx, object)? {
                Some(obj) => {
                    let v = self.import(ctx, value)?;
                    self.put_property(obj, *pid, v, *attributes)?;
                    self.boolean(ctx, true)?
                }
                None => self.throw_type_error(ctx, "defineProperty on a non-object")?,
            },
            ActionOp::DeleteProperty { object, pid, .. } => match self.import_object(ctx, object)? {
                Some(obj) => {
                    let removed = self.remove_property(obj, *pid)?;
                    self.boolean(ctx, removed)?
                }
                None => self.throw_type_error(ctx, "delete on a non-object")?,
            },
            ActionOp::GetPrototype { object } => match self.import_object(ctx, object)? {
                Some(obj) => match self.prototype_of(obj)? {
                    Var::Invalid => self.singleton(ctx, NULL)?,
                    proto => proto,
                },
                None => self.throw_type_error(ctx, "prototype of a non-object")?,
            },
            ActionOp::SetPrototype { object, prototype } => match self.import_object(ctx, object)? {
                Some(obj) => {
                    let proto = match self.import_object(ctx, prototype)? {
                        Some(p) => Var::Ref(p),
                        None => Var::Invalid,
                    };
                    self.set_prototype(obj, proto)?;
                    self.undefined(ctx)?
                }
                None => self.throw_type_error(ctx, "setPrototypeOf on a non-object")?,
            },
            ActionOp::GetIndex { object, index } => match self.import_object(ctx, object)? {
                Some(obj) => {
                    let index = self.import(ctx, index)?;
                    self.get_index(ctx, obj, index)?
                }
                None => self.throw_type_error(ctx, "indexed read on a non-object")?,
            },
            ActionOp::SetIndex { object, index, value } => match self.import_object(ctx, object)? {
                Some(obj) => {
                    let index = self.import(ctx, index)?;
                    let value = self.import(ctx, value)?;
                    self.set_index(obj, index, value)?;
                    self.undefined(ctx)?
                }
                None => self.throw_type_error(ctx, "indexed write on a non-object")?,
            },
            ActionOp::GetTypedArrayInfo { object, returns_buffer } => {
                let info = match self.import_object(ctx, object)? {
                    Some(obj) => match &self.object(obj)?.payload {
                        ObjectPayload::TypedArray(t) => Some(*t),
                        _ => None,
                    },
                    None => None,
                };
                match info {
                    Some(t) if *returns_buffer => Var::Ref(LivePtr::from(t.buffer)),
                    Some(t) => Var::Number(t.length as f64),
                    None => self.throw_type_error(ctx, "not a typed array")?,
                }
            }
            ActionOp::ConstructCall { function, args } => match self.import_object(ctx, function)? {
                Some(f) => {
                    let args = self.import_all(ctx, args)?;
                    self.construct(log, ctx, f, args)?
                }
                None => self.throw_type_error(ctx, "not a constructor")?,
            },
            ActionOp::CallbackOp {
                is_cancel,
                current_callback_id,
                callback_function,
                created_callback_id,
                ..
            } => {
                if *is_cancel {
                    self.callbacks.remove(current_callback_id);
                } else if let Some(tag) = callback_function.object_tag() {
                    self.callbacks.insert(*created_callback_id, tag);
                }
                self.undefined(ctx)?
            }
            ActionOp::CodeParse {
                source,
                body_counter_id,
                ..
            } => {
                let body = self.new_body(c, source.trim(), None, *body_counter_id);
                let function = self.new_object_cell(
                    c,
                    SnapObjectType::ScriptFunction,
                    JsTypeTag::Function,
                    ObjectPayload::ScriptFunction(ScriptFunctionInfo {
                        body_id: body.into(),
                        scope_id: None,
                        home_object: None,
                        computed_name: Var::Invalid,
                        has_super_reference: false,
                    }),
                )?;
                self.contexts[c].loaded.push(LoadedBody {
                    body_counter_id: *body_counter_id,
                    function_body_id: body.into(),
                });
                Var::Ref(function)
            }
            ActionOp::CallExistingFunctionBegin { .. } | ActionOp::CallExistingFunctionEnd { .. } => {
                return Err(TtdError::PolicyViolation("call actions are driven by the call path"))
            }
        };
        let status = if self.pending_exception.is_some() {
            ResultStatus::Exception
        } else {
            ResultStatus::Normal
        };
        Ok((status, value))
    }

    fn convert(&mut self, ctx: LogTag, v: LiveValue, target: ConvertTarget) -> TtdResult<LiveValue> {
        match target {
            ConvertTarget::ToNumber => {
                if let Some(n) = self.number_value(v) {
                    return Ok(Var::Number(n));
                }
                let n = match (self.primitive_type(v), self.string_value(v)) {
                    (_, Some(s)) if s.trim().is_empty() => 0.0,
                    (_, Some(s)) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
                    (Some(JsTypeTag::Null), _) => 0.0,
                    (Some(JsTypeTag::Boolean), _) => {
                        if self.truthy(v) {
                            1.0
                        } else {
                            0.0
                        }
                    }
                    _ => f64::NAN,
                };
                Ok(Var::Number(n))
            }
            ConvertTarget::ToBoolean => {
                let b = self.truthy(v);
                self.boolean(ctx, b)
            }
            ConvertTarget::ToString => {
                let s = self.display_string(v);
                self.new_string(ctx, &s)
            }
            ConvertTarget::ToObject => {
                if let Var::Ref(ptr) = v {
                    if self.is_object(ptr) {
                        return Ok(v);
                    }
                }
                let (tag, js_type) = match self.primitive_type(v) {
                    Some(JsTypeTag::Undefined) | Some(JsTypeTag::Null) => {
                        return self.throw_type_error(ctx, "cannot convert to object");
                    }
                    Some(JsTypeTag::String) => (SnapObjectType::BoxedValue, JsTypeTag::StringObject),
                    Some(JsTypeTag::Boolean) => (SnapObjectType::BoxedValue, JsTypeTag::BooleanObject),
                    Some(JsTypeTag::Symbol) => (SnapObjectType::BoxedValue, JsTypeTag::SymbolObject),
                    _ => (SnapObjectType::BoxedValue, JsTypeTag::NumberObject),
                };
                let c = self.context_index(ctx)?;
                let boxed = self.new_object_cell(c, tag, js_type, ObjectPayload::BoxedValue(snap_value(v)))?;
                Ok(Var::Ref(boxed))
            }
        }
    }

    fn array_index(&self, index: LiveValue) -> Option<u32> {
        let n = self.number_value(index)?;
        (n >= 0.0 && n.fract() == 0.0 && n < u32::MAX as f64).then_some(n as u32)
    }

    fn get_index(&mut self, ctx: LogTag, obj: LivePtr, index: LiveValue) -> TtdResult<LiveValue> {
        if let Some(i) = self.array_index(index) {
            let element = match &self.object(obj)?.payload {
                ObjectPayload::Array(a) => Some(array_get(a, i).map(|v| v.map_ref(LivePtr::from))),
                ObjectPayload::NativeIntArray(a) => Some(array_get(a, i).map(Var::Int)),
                ObjectPayload::NativeFloatArray(a) => Some(array_get(a, i).map(Var::Number)),
                ObjectPayload::ES5Array(a) => Some(array_get(&a.elements, i).map(|v| v.map_ref(LivePtr::from))),
                _ => None,
            };
            if let Some(element) = element {
                return match element {
                    Some(v) => Ok(v),
                    None => self.undefined(ctx),
                };
            }
        }
        let name = self.display_string(index);
        self.get_named(obj, &name)
    }

    fn set_index(&mut self, obj: LivePtr, index: LiveValue, value: LiveValue) -> TtdResult<()> {
        if let Some(i) = self.array_index(index) {
            let cell = self.object_mut(obj)?;
            match &mut cell.payload {
                ObjectPayload::Array(a) => {
                    array_set(a, i, snap_value(value));
                    return Ok(());
                }
                ObjectPayload::ES5Array(a) => {
                    array_set(&mut a.elements, i, snap_value(value));
                    return Ok(());
                }
                _ => {}
            }
        }
        let name = self.display_string(index);
        self.set_named(obj, &name, value)
    }

    fn construct(&mut self, log: &mut EventLog, ctx: LogTag, f: LivePtr, args: Vec<LiveValue>) -> TtdResult<LiveValue> {
        let c = self.context_index(ctx)?;
        let this = self.new_object(ctx)?;
        if let Some(Var::Ref(proto)) = self.get_own_property(f, property_id("prototype"))? {
            if self.is_object(proto) && proto != self.builtin(c, OBJECT_PROTOTYPE)? {
                self.set_prototype(this, Var::Ref(proto))?;
            }
        }
        let result = self.call(
            log,
            Invocation {
                context: ctx,
                function: f,
                this: Var::Ref(this),
                args,
            },
        )?;
        Ok(match result {
            Var::Ref(ptr) if self.is_object(ptr) => result,
            _ => Var::Ref(this),
        })
    }

    // ---- calls ----

    /// Call a function from script; nothing is logged unless it reaches a host function
    pub fn call(&mut self, log: &mut EventLog, inv: Invocation) -> TtdResult<LiveValue> {
        self.call_depth += 1;
        let out = self.invoke(log, inv);
        self.call_depth -= 1;
        out
    }

    fn invoke(&mut self, log: &mut EventLog, inv: Invocation) -> TtdResult<LiveValue> {
        let payload = self.object(inv.function)?.payload.clone();
        match payload {
            ObjectPayload::ScriptFunction(f) => {
                let name = self.body_cell(LivePtr::from(f.body_id))?.name.clone();
                let now = log.current_event_time();
                log.call_stack_mut().push_call(name.as_str(), now);
                let out = match self.behaviors.get(&name).copied() {
                    Some(behavior) => behavior(self, log, &inv),
                    None => self.undefined(inv.context),
                };
                log.call_stack_mut().pop_call();
                out
            }
            ObjectPayload::ExternalFunction { display_name } => {
                let name = self.display_string(display_name.map_ref(LivePtr::from));
                self.call_host(log, &inv, &name)
            }
            ObjectPayload::BoundFunction(b) => {
                let mut args: Vec<LiveValue> = b.args.iter().map(|a| a.map_ref(LivePtr::from)).collect();
                args.extend(inv.args);
                self.invoke(
                    log,
                    Invocation {
                        context: inv.context,
                        function: LivePtr::from(b.target),
                        this: b.bound_this.map_ref(LivePtr::from),
                        args,
                    },
                )
            }
            _ => self.throw_type_error(inv.context, "not a function"),
        }
    }

    fn call_host(&mut self, log: &mut EventLog, inv: &Invocation, name: &str) -> TtdResult<LiveValue> {
        let function = self.export(log, Var::Ref(inv.function))?;
        let mut args = Vec::with_capacity(inv.args.len());
        for a in &inv.args {
            args.push(self.export(log, *a)?);
        }

        if log.modes().should_perform_replay_action() {
            let call = log.replay_external_call()?;
            let time = log.last_event_time();
            self.check_result(log, time, &call.function, function)?;
            for (produced, recorded) in args.into_iter().zip(call.args.iter()) {
                self.check_result(log, time, recorded, produced)?;
            }
            log.replay_action_event_sequence_through_time(call.last_nested_event_time, self)?;
            let value = self.import(inv.context, &call.return_value)?;
            if call.has_script_exception {
                return self.raise(inv.context, value);
            }
            return Ok(value);
        }

        let host = self
            .host_functions
            .get(name)
            .copied()
            .ok_or_else(|| TtdError::Host(format!("no host function registered as {:?}", name)))?;
        let function = match function {
            Produced::Value(v) => v,
            Produced::Untagged(_) => LogValue::Undefined,
        };
        let args: Vec<LogValue> = args
            .into_iter()
            .map(|a| match a {
                Produced::Value(v) => v,
                Produced::Untagged(_) => LogValue::Undefined,
            })
            .collect();

        let handle = if log.modes().should_perform_record_action() {
            Some(log.record_external_call(function, args.clone(), self.call_depth)?)
        } else {
            None
        };
        let outcome = host(
            self,
            log,
            &HostCall {
                context: inv.context,
                args,
            },
        );
        let thrown = self.pending_exception;
        let outcome = outcome.and_then(|returned| match thrown {
            Some(e) => self.export_value(log, e),
            None => Ok(returned),
        });
        let returned = match outcome {
            Ok(v) => v,
            Err(e) => {
                if let Some(handle) = handle {
                    log.complete_external_call(handle, LogValue::Undefined, false, true)?;
                }
                return Err(e);
            }
        };
        if let Some(handle) = handle {
            log.complete_external_call(handle, returned.clone(), thrown.is_some(), false)?;
        }
        if thrown.is_some() {
            return self.undefined(inv.context);
        }
        self.import(inv.context, &returned)
    }

    /// Call a function on behalf of the host, logging the begin and end of the call
    ///
    /// At the outermost level a snapshot is taken first when the cadence
    /// says one is due.
    pub fn call_function(
        &mut self,
        log: &mut EventLog,
        ctx: LogTag,
        function: &LogValue,
        args: &[LogValue],
    ) -> TtdResult<LogValue> {
        if !log.modes().should_perform_record_action() {
            return Err(TtdError::PolicyViolation("calls are driven by the log during replay"));
        }
        let depth = self.call_depth;
        if depth == 0 && log.is_time_for_snapshot() {
            log.do_snapshot_extract(&*self)?;
        }

        let begin_wall = log.wall_time_ms();
        let begin = log.record_action(
            ctx,
            ActionOp::CallExistingFunctionBegin {
                function: function.clone(),
                args: args.to_vec(),
                callback_depth: depth,
                host_callback_id: -1,
                begin_time: begin_wall,
            },
        )?;
        let begin_time = begin.event_time();
        if depth == 0 {
            log.reset_call_stack_for_top_level_call(begin_time);
        }
        let started = Instant::now();

        let outcome = self.invoke_from_host(log, ctx, function, args);
        let (status, result, threw, terminated) = match &outcome {
            Ok(result) => {
                let threw = self.pending_exception.is_some();
                let status = if threw { ResultStatus::Exception } else { ResultStatus::Normal };
                (status, result.clone(), threw, false)
            }
            Err(_) => (ResultStatus::DoesNotReturn, LogValue::Undefined, false, true),
        };
        log.complete_action(begin, status, result)?;

        let end_wall = log.wall_time_ms();
        let end = log.record_action(
            ctx,
            ActionOp::CallExistingFunctionEnd {
                matching_begin_time: begin_time,
                has_script_exception: threw,
                has_terminating_exception: terminated,
                callback_depth: depth,
                end_time: end_wall,
            },
        )?;
        log.complete_action(end, ResultStatus::Normal, LogValue::Undefined)?;
        if depth == 0 {
            log.add_elapsed_execution_time(started.elapsed().as_secs_f64() * 1000.0);
        }
        outcome
    }

    fn invoke_from_host(
        &mut self,
        log: &mut EventLog,
        ctx: LogTag,
        function: &LogValue,
        args: &[LogValue],
    ) -> TtdResult<LogValue> {
        let result = match self.import_object(ctx, function)? {
            Some(target) => {
                let args = self.import_all(ctx, args)?;
                let this = self.undefined(ctx)?;
                self.call(
                    log,
                    Invocation {
                        context: ctx,
                        function: target,
                        this,
                        args,
                    },
                )?
            }
            None => self.throw_type_error(ctx, "not a function")?,
        };
        self.export_value(log, result)
    }

    fn replay_call_begin(
        &mut self,
        log: &mut EventLog,
        event_time: i64,
        action: &JsRtAction,
        function: &LogValue,
        args: &[LogValue],
        callback_depth: i32,
    ) -> TtdResult<()> {
        let ctx = action.context_tag;
        if callback_depth == 0 {
            log.do_rtr_snap_if_needed(&*self, event_time)?;
            log.reset_call_stack_for_top_level_call(event_time);
        }
        self.open_calls.push(event_time);

        let saved_depth = self.call_depth;
        self.call_depth = callback_depth;
        let out = match self.import_object(ctx, function)? {
            Some(target) => {
                let args = self.import_all(ctx, args)?;
                let this = self.undefined(ctx)?;
                self.call(
                    log,
                    Invocation {
                        context: ctx,
                        function: target,
                        this,
                        args,
                    },
                )
            }
            None => self.throw_type_error(ctx, "not a function"),
        };
        self.call_depth = saved_depth;
        let produced = self.export(log, out?)?;
        self.check_result(log, event_time, &action.result, produced)
    }
}

impl ReplayHost for ReferenceHeap {
    fn execute_action(&mut self, log: &mut EventLog, event_time: i64, action: &JsRtAction) -> TtdResult<()> {
        match &action.op {
            ActionOp::CallExistingFunctionBegin {
                function,
                args,
                callback_depth,
                ..
            } => self.replay_call_begin(log, event_time, action, function, args, *callback_depth),
            ActionOp::CallExistingFunctionEnd {
                matching_begin_time, ..
            } => match self.open_calls.pop() {
                Some(begin) if begin == *matching_begin_time => Ok(()),
                other => Err(TtdError::EventOrder {
                    previous: other.unwrap_or(-1),
                    found: *matching_begin_time,
                }),
            },
            op => {
                let (_, value) = self.apply(log, action.context_tag, op)?;
                let produced = self.export(log, value)?;
                self.check_result(log, event_time, &action.result, produced)
            }
        }
    }
}

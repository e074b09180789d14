//! Point-in-time heap snapshots
//!
//! A [`SnapShot`] is immutable once extracted. It is written to its own
//! stream (`snap_<time>.snp`) and inflated back into a live heap through a
//! [`HeapBuilder`](crate::heap::HeapBuilder).

pub mod extractor;
pub mod inflate;
pub mod objects;
pub mod types;
pub mod values;
pub mod var;

pub use extractor::SnapshotExtractor;
pub use objects::{
    object_kind_ops, AccessorEntry, ArrayInfo, BoundFunctionInfo, ConstructBase, ES5ArrayInfo,
    HeapArgumentsInfo, ObjectKindOps, ObjectPayload, PromiseAllResolveElementInfo,
    PromiseCapability, PromiseInfo, PromiseReaction, PromiseReactionTaskInfo,
    PromiseResolveOrRejectInfo, PromiseStatus, RegexInfo, ScriptFunctionInfo, SnapObject,
    SnapObjectType, TypedArrayInfo,
};
pub use types::{HandlerEntry, HandlerId, JsTypeTag, SlotKind, SnapHandler, SnapType, TypeId};
pub use values::{
    FunctionBodyResolveInfo, LoadedBody, PrimitivePayload, ScopeEntry, ScopeType,
    ScriptFunctionScopeInfo, SlotArrayInfo, SnapContext, SnapPrimitiveValue, SnapRoot,
    TopLevelCommonInfo, TopLevelEval, TopLevelNewFunction, TopLevelScriptLoad, TopLevelScripts,
};
pub use var::{IdentityTag, LogTag, PropertyId, PtrId, SnapVar, Var, WellKnownToken};

use crate::error::{TtdError, TtdResult};
use crate::heap::HeapBuilder;
use crate::inflate_map::{InflateCounts, InflateMap};
use crate::serialize::{
    open_reader_detect, open_writer, preallocation, Format, Key, Reader, Separator, StreamProvider,
    Writer,
};
use rustc_hash::FxHashSet;
use std::time::Instant;
use tracing::debug;

/// Entity counts and timings of one snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SnapShotStats {
    /// Script contexts
    pub contexts: usize,
    /// Property-layout handlers
    pub handlers: usize,
    /// Types
    pub types: usize,
    /// Function bodies
    pub function_bodies: usize,
    /// Primitive values
    pub primitives: usize,
    /// Objects
    pub objects: usize,
    /// Well-known objects among `objects`
    pub well_known_objects: usize,
    /// Scope chains
    pub scopes: usize,
    /// Slot arrays
    pub slot_arrays: usize,
    /// Collection time before extraction, in milliseconds
    pub gc_time: f64,
    /// Mark walk time, in milliseconds
    pub mark_time: f64,
    /// Evacuation time, in milliseconds
    pub extract_time: f64,
    /// Live bytes at extraction
    pub used_memory: u64,
    /// Reserved bytes at extraction
    pub reserved_memory: u64,
}

/// Every entity reachable from the script contexts at one event time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapShot {
    /// Script contexts
    pub contexts: Vec<SnapContext>,
    /// Handlers, deduplicated by id
    pub handlers: Vec<SnapHandler>,
    /// Types, deduplicated by id
    pub types: Vec<SnapType>,
    /// Function bodies, parents before children
    pub function_bodies: Vec<FunctionBodyResolveInfo>,
    /// Primitive values
    pub primitives: Vec<SnapPrimitiveValue>,
    /// Objects
    pub objects: Vec<SnapObject>,
    /// Scope chains
    pub scopes: Vec<ScriptFunctionScopeInfo>,
    /// Closure slot arrays
    pub slot_arrays: Vec<SlotArrayInfo>,
    /// Collection time before extraction, in milliseconds
    pub gc_time: f64,
    /// Mark walk time, in milliseconds
    pub mark_time: f64,
    /// Evacuation time, in milliseconds
    pub extract_time: f64,
    /// Live bytes at extraction
    pub used_memory: u64,
    /// Reserved bytes at extraction
    pub reserved_memory: u64,
}

pub(crate) fn emit_table<T>(
    w: &mut dyn Writer,
    key: Key,
    items: &[T],
    emit: impl Fn(&T, &mut dyn Writer, Separator) -> TtdResult<()>,
) -> TtdResult<()> {
    w.write_record_start_named(key, Separator::CommaAndBigSpace)?;
    w.adjust_indent(1);
    w.write_length_value(items.len() as u32, Separator::None)?;
    w.write_sequence_start_default_key(Separator::Comma)?;
    w.adjust_indent(1);
    for (i, item) in items.iter().enumerate() {
        emit(item, w, Separator::big_comma_if(i != 0))?;
    }
    w.adjust_indent(-1);
    w.write_sequence_end(Separator::BigSpace)?;
    w.adjust_indent(-1);
    w.write_record_end(Separator::BigSpace)
}

pub(crate) fn parse_table<T>(
    r: &mut dyn Reader,
    key: Key,
    parse: impl Fn(&mut dyn Reader, bool) -> TtdResult<T>,
) -> TtdResult<Vec<T>> {
    r.read_record_start_named(key, true)?;
    let count = r.read_length_value(false)?;
    r.read_sequence_start_default_key(true)?;
    let mut items = Vec::with_capacity(preallocation(count));
    for i in 0..count {
        items.push(parse(r, i != 0)?);
    }
    r.read_sequence_end()?;
    r.read_record_end()?;
    Ok(items)
}

impl SnapShot {
    /// Entity counts and timings
    pub fn stats(&self) -> SnapShotStats {
        SnapShotStats {
            contexts: self.contexts.len(),
            handlers: self.handlers.len(),
            types: self.types.len(),
            function_bodies: self.function_bodies.len(),
            primitives: self.primitives.len(),
            objects: self.objects.len(),
            well_known_objects: self.objects.iter().filter(|o| o.is_well_known()).count(),
            scopes: self.scopes.len(),
            slot_arrays: self.slot_arrays.len(),
            gc_time: self.gc_time,
            mark_time: self.mark_time,
            extract_time: self.extract_time,
            used_memory: self.used_memory,
            reserved_memory: self.reserved_memory,
        }
    }

    /// Table sizes for pre-sizing an [`InflateMap`]
    pub fn inflate_counts(&self) -> InflateCounts {
        InflateCounts {
            contexts: self.contexts.len(),
            handlers: self.handlers.len(),
            types: self.types.len(),
            function_bodies: self.function_bodies.len(),
            objects: self.primitives.len() + self.objects.len(),
            scopes: self.scopes.len(),
            slot_arrays: self.slot_arrays.len(),
        }
    }

    /// Object with `id`
    pub fn find_object(&self, id: PtrId) -> Option<&SnapObject> {
        self.objects.iter().find(|o| o.object_ptr_id == id)
    }

    /// Write the snapshot to stream `name`
    pub fn emit(
        &self,
        provider: &dyn StreamProvider,
        name: &str,
        format: Format,
        buffer_size: usize,
    ) -> TtdResult<()> {
        let mut w = open_writer(format, provider.open_write(name)?, buffer_size)?;
        self.emit_to(&mut *w)?;
        w.flush_and_close()?;
        debug!(stream = name, objects = self.objects.len(), "snapshot written");
        Ok(())
    }

    /// Write the snapshot record
    pub fn emit_to(&self, w: &mut dyn Writer) -> TtdResult<()> {
        let start = Instant::now();
        w.write_record_start(Separator::None)?;
        w.adjust_indent(1);
        w.write_double(Key::GcTime, self.gc_time, Separator::BigSpace)?;
        w.write_double(Key::MarkTime, self.mark_time, Separator::Comma)?;
        w.write_double(Key::ExtractTime, self.extract_time, Separator::Comma)?;
        w.write_uint64(Key::UsedMemory, self.used_memory, Separator::Comma)?;
        w.write_uint64(Key::ReservedMemory, self.reserved_memory, Separator::Comma)?;

        emit_table(w, Key::Contexts, &self.contexts, SnapContext::emit)?;
        emit_table(w, Key::Handlers, &self.handlers, SnapHandler::emit)?;
        emit_table(w, Key::Types, &self.types, SnapType::emit)?;
        emit_table(w, Key::FunctionBodies, &self.function_bodies, FunctionBodyResolveInfo::emit)?;
        emit_table(w, Key::Primitives, &self.primitives, SnapPrimitiveValue::emit)?;
        emit_table(w, Key::Objects, &self.objects, SnapObject::emit)?;
        emit_table(w, Key::Scopes, &self.scopes, ScriptFunctionScopeInfo::emit)?;
        emit_table(w, Key::SlotArrays, &self.slot_arrays, SlotArrayInfo::emit)?;

        let write_time = start.elapsed().as_secs_f64() * 1000.0;
        w.write_double(Key::WriteTime, write_time, Separator::CommaAndBigSpace)?;
        w.adjust_indent(-1);
        w.write_record_end(Separator::BigSpace)
    }

    /// Read the snapshot in stream `name`, in whichever format it was written
    pub fn parse(provider: &dyn StreamProvider, name: &str, buffer_size: usize) -> TtdResult<Self> {
        if !provider.exists(name) {
            return Err(TtdError::MissingStream(name.to_string()));
        }
        let (_, mut r) = open_reader_detect(provider.open_read(name)?, buffer_size)?;
        let snap = Self::parse_from(&mut *r)?;
        r.close()?;
        Ok(snap)
    }

    /// Read a snapshot record written by [`SnapShot::emit_to`]
    pub fn parse_from(r: &mut dyn Reader) -> TtdResult<Self> {
        r.read_record_start(false)?;
        let gc_time = r.read_double(Key::GcTime, false)?;
        let mark_time = r.read_double(Key::MarkTime, true)?;
        let extract_time = r.read_double(Key::ExtractTime, true)?;
        let used_memory = r.read_uint64(Key::UsedMemory, true)?;
        let reserved_memory = r.read_uint64(Key::ReservedMemory, true)?;

        let contexts = parse_table(r, Key::Contexts, SnapContext::parse)?;
        let handlers = parse_table(r, Key::Handlers, SnapHandler::parse)?;
        let types = parse_table(r, Key::Types, SnapType::parse)?;

        let handler_ids: FxHashSet<HandlerId> = handlers.iter().map(|h| h.handler_id).collect();
        for ty in &types {
            if let Some(handler) = ty.handler_id {
                if !handler_ids.contains(&handler) {
                    return Err(TtdError::MissingInflateTarget {
                        what: "handler",
                        id: handler.0,
                    });
                }
            }
        }
        let type_ids: FxHashSet<TypeId> = types.iter().map(|t| t.type_id).collect();
        let check_type = |id: TypeId| {
            if type_ids.contains(&id) {
                Ok(())
            } else {
                Err(TtdError::MissingInflateTarget { what: "type", id: id.0 })
            }
        };

        let function_bodies = parse_table(r, Key::FunctionBodies, FunctionBodyResolveInfo::parse)?;
        let primitives = parse_table(r, Key::Primitives, SnapPrimitiveValue::parse)?;
        for p in &primitives {
            check_type(p.type_id)?;
        }
        let objects = parse_table(r, Key::Objects, SnapObject::parse)?;
        for o in &objects {
            check_type(o.type_id)?;
        }
        let scopes = parse_table(r, Key::Scopes, ScriptFunctionScopeInfo::parse)?;
        let slot_arrays = parse_table(r, Key::SlotArrays, SlotArrayInfo::parse)?;
        let _write_time = r.read_double(Key::WriteTime, true)?;
        r.read_record_end()?;

        Ok(Self {
            contexts,
            handlers,
            types,
            function_bodies,
            primitives,
            objects,
            scopes,
            slot_arrays,
            gc_time,
            mark_time,
            extract_time,
            used_memory,
            reserved_memory,
        })
    }

    /// True if every well-known object from the previous inflate of this
    /// snapshot is still alive and of the same kind
    pub fn is_well_known_reuse_safe(&self, map: &InflateMap, builder: &dyn HeapBuilder) -> bool {
        self.objects
            .iter()
            .filter(|o| o.is_well_known())
            .all(|o| match map.lookup_object_opt(o.object_ptr_id) {
                Some(live) => builder.can_reuse_object(live, o.object_tag),
                None => false,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::MemoryStreams;

    fn sample() -> SnapShot {
        SnapShot {
            contexts: vec![SnapContext {
                context_tag: LogTag(1),
                random_seed0: 7,
                random_seed1: 9,
                uri: "main.js".to_string(),
                global_object: PtrId(16),
                loaded_scripts: vec![],
                new_functions: vec![],
                evals: vec![],
                roots: vec![SnapRoot {
                    ptr_id: PtrId(32),
                    log_tag: LogTag(3),
                }],
            }],
            handlers: vec![SnapHandler {
                handler_id: HandlerId(48),
                inline_slot_capacity: 2,
                total_slot_capacity: 2,
                is_extensible: true,
                entries: vec![HandlerEntry {
                    property_id: PropertyId(5),
                    attributes: 7,
                    kind: SlotKind::Data,
                }],
            }],
            types: vec![SnapType {
                type_id: TypeId(64),
                js_type: JsTypeTag::Object,
                context_tag: LogTag(1),
                prototype: Var::Invalid,
                handler_id: Some(HandlerId(48)),
                has_no_enumerable_properties: false,
            }],
            objects: vec![
                SnapObject {
                    object_ptr_id: PtrId(16),
                    object_tag: SnapObjectType::Dynamic,
                    type_id: TypeId(64),
                    optional_well_known_token: Some(WellKnownToken::new("global")),
                    slot_values: vec![Var::Ref(PtrId(32))],
                    optional_indexed_array_id: None,
                    log_tag: LogTag::INVALID,
                    identity_tag: IdentityTag::INVALID,
                    depends_on: vec![],
                    payload: ObjectPayload::None,
                },
                SnapObject {
                    object_ptr_id: PtrId(32),
                    object_tag: SnapObjectType::Date,
                    type_id: TypeId(64),
                    optional_well_known_token: None,
                    slot_values: vec![Var::Number(1.5)],
                    optional_indexed_array_id: None,
                    log_tag: LogTag(3),
                    identity_tag: IdentityTag(4),
                    depends_on: vec![],
                    payload: ObjectPayload::Date(1_600_000_000_000.0),
                },
            ],
            gc_time: 0.5,
            used_memory: 4096,
            reserved_memory: 8192,
            ..SnapShot::default()
        }
    }

    #[test]
    fn test_emit_parse_text_and_binary() {
        let snap = sample();
        for format in [Format::Text, Format::Binary] {
            let streams = MemoryStreams::new();
            snap.emit(&streams, "snap_1.snp", format, 128).unwrap();
            let parsed = SnapShot::parse(&streams, "snap_1.snp", 128).unwrap();
            assert_eq!(parsed, snap, "{:?}", format);
        }
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        let mut snap = sample();
        snap.objects[1].type_id = TypeId(999);
        let streams = MemoryStreams::new();
        snap.emit(&streams, "s", Format::Text, 256).unwrap();
        assert!(matches!(
            SnapShot::parse(&streams, "s", 256),
            Err(TtdError::MissingInflateTarget { what: "type", id: 999 })
        ));
    }

    #[test]
    fn test_parse_missing_stream() {
        let streams = MemoryStreams::new();
        assert!(matches!(
            SnapShot::parse(&streams, "snap_9.snp", 256),
            Err(TtdError::MissingStream(_))
        ));
    }

    #[test]
    fn test_stats() {
        let stats = sample().stats();
        assert_eq!(stats.objects, 2);
        assert_eq!(stats.well_known_objects, 1);
        assert_eq!(stats.used_memory, 4096);
        assert_eq!(sample().inflate_counts().objects, 2);
    }
}

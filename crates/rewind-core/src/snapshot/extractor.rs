//! Live heap to snapshot
//!
//! Extraction runs in three phases over a read-only [`HeapWalker`]:
//! a mark walk from the context roots that visits each reachable cell once,
//! an evacuation pass that copies every marked cell into snapshot records,
//! and completion, which hands the finished [`SnapShot`] to the caller.

use super::objects::{object_kind_ops, ObjectPayload, SnapObject};
use super::types::{HandlerId, SnapHandler, SnapType, TypeId};
use super::values::{
    FunctionBodyResolveInfo, ScopeType, ScriptFunctionScopeInfo, SlotArrayInfo, SnapContext,
    SnapPrimitiveValue,
};
use super::var::PtrId;
use super::SnapShot;
use crate::error::{TtdError, TtdResult};
use crate::heap::{CellKind, HeapWalker, LivePtr};
use rustc_hash::FxHashSet;
use std::time::Instant;
use tracing::{debug, trace};

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Reusable state for taking snapshots
#[derive(Debug, Default)]
pub struct SnapshotExtractor {
    gc_time: f64,
    mark_time: f64,

    contexts: Vec<SnapContext>,
    cells: Vec<LivePtr>,
    marked: FxHashSet<LivePtr>,
    object_cells: FxHashSet<LivePtr>,

    types: Vec<SnapType>,
    seen_types: FxHashSet<TypeId>,
    handlers: Vec<SnapHandler>,
    seen_handlers: FxHashSet<HandlerId>,
    function_bodies: Vec<FunctionBodyResolveInfo>,
    seen_bodies: FxHashSet<PtrId>,
    scopes: Vec<ScriptFunctionScopeInfo>,
    seen_scopes: FxHashSet<PtrId>,
    slot_arrays: Vec<SlotArrayInfo>,
    seen_slot_arrays: FxHashSet<PtrId>,

    pending: Option<SnapShot>,
}

impl SnapshotExtractor {
    /// Create an idle extractor
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every phase and return the snapshot
    pub fn extract(&mut self, heap: &dyn HeapWalker, gc_time: f64) -> TtdResult<SnapShot> {
        self.begin_snapshot(gc_time);
        self.do_mark_walk(heap)?;
        self.evacuate_marked_into_snapshot(heap)?;
        self.complete_snapshot()
    }

    /// Reset state for a new snapshot
    pub fn begin_snapshot(&mut self, gc_time: f64) {
        *self = Self {
            gc_time,
            ..Self::default()
        };
    }

    /// Mark every cell reachable from the roots
    pub fn do_mark_walk(&mut self, heap: &dyn HeapWalker) -> TtdResult<()> {
        let start = Instant::now();
        let contexts = heap.contexts()?;

        let mut stack: Vec<LivePtr> = Vec::new();
        for ctx in &contexts {
            stack.push(ctx.global_object.into());
            stack.extend(ctx.roots.iter().map(|r| LivePtr::from(r.ptr_id)));
            for body in ctx.all_loaded_bodies() {
                self.mark_body(heap, body.function_body_id)?;
            }
        }
        self.contexts = contexts;
        stack.extend(heap.extra_roots()?);
        // LIFO pops reverse the order roots were pushed in
        stack.reverse();

        while let Some(ptr) = stack.pop() {
            if !self.marked.insert(ptr) {
                continue;
            }
            self.cells.push(ptr);
            self.mark_type(heap, heap.type_of(ptr)?, &mut stack)?;

            if heap.cell_kind(ptr)? == CellKind::Primitive {
                continue;
            }
            self.object_cells.insert(ptr);

            let tag = heap.object_tag(ptr)?;
            if object_kind_ops(tag).is_none() {
                return Err(TtdError::UnhandledObject(ptr.into()));
            }
            for v in heap.read_slots(ptr)? {
                stack.extend(v.reference().map(LivePtr::from));
            }
            if let Some(indexed) = heap.indexed_array(ptr)? {
                stack.push(indexed.into());
            }
            if heap.well_known_token(ptr)?.is_some() {
                continue;
            }

            let payload = heap.read_payload(ptr)?;
            stack.extend(payload.all_refs().into_iter().map(LivePtr::from));
            let (body, scope) = payload.function_refs();
            if let Some(body) = body {
                self.mark_body(heap, body)?;
            }
            if let Some(scope) = scope {
                self.mark_scope(heap, scope, &mut stack)?;
            }
        }

        self.mark_time = elapsed_ms(start);
        trace!(cells = self.cells.len(), "mark walk complete");
        Ok(())
    }

    fn mark_type(&mut self, heap: &dyn HeapWalker, id: TypeId, stack: &mut Vec<LivePtr>) -> TtdResult<()> {
        if !self.seen_types.insert(id) {
            return Ok(());
        }
        let ty = heap.describe_type(id)?;
        if let Some(handler) = ty.handler_id {
            if self.seen_handlers.insert(handler) {
                self.handlers.push(heap.describe_handler(handler)?);
            }
        }
        stack.extend(ty.prototype_ref().map(LivePtr::from));
        self.types.push(ty);
        Ok(())
    }

    fn mark_body(&mut self, heap: &dyn HeapWalker, id: PtrId) -> TtdResult<()> {
        if !self.seen_bodies.insert(id) {
            return Ok(());
        }
        let info = heap.describe_function_body(id)?;
        if let Some(parent) = info.parent_body_id {
            self.mark_body(heap, parent)?;
        }
        self.function_bodies.push(info);
        Ok(())
    }

    fn mark_scope(&mut self, heap: &dyn HeapWalker, id: PtrId, stack: &mut Vec<LivePtr>) -> TtdResult<()> {
        if !self.seen_scopes.insert(id) {
            return Ok(());
        }
        let info = heap.describe_scope(id)?;
        for entry in &info.entries {
            match entry.scope_type {
                ScopeType::ActivationObject | ScopeType::With => stack.push(entry.id.into()),
                ScopeType::SlotArray => self.mark_slot_array(heap, entry.id, stack)?,
                ScopeType::Invalid => {}
            }
        }
        self.scopes.push(info);
        Ok(())
    }

    fn mark_slot_array(&mut self, heap: &dyn HeapWalker, id: PtrId, stack: &mut Vec<LivePtr>) -> TtdResult<()> {
        if !self.seen_slot_arrays.insert(id) {
            return Ok(());
        }
        let info = heap.describe_slot_array(id)?;
        for v in &info.slots {
            stack.extend(v.reference().map(LivePtr::from));
        }
        if let Some(body) = info.function_body_id {
            self.mark_body(heap, body)?;
        }
        self.slot_arrays.push(info);
        Ok(())
    }

    /// Copy every marked cell into snapshot records
    pub fn evacuate_marked_into_snapshot(&mut self, heap: &dyn HeapWalker) -> TtdResult<()> {
        let start = Instant::now();
        let mut primitives = Vec::new();
        let mut objects = Vec::new();

        for &ptr in &self.cells {
            let ptr_id = PtrId::from(ptr);
            let type_id = heap.type_of(ptr)?;
            let (log_tag, identity_tag) = heap.object_tags(ptr)?;
            let well_known = heap.well_known_token(ptr)?;

            if !self.object_cells.contains(&ptr) {
                primitives.push(SnapPrimitiveValue {
                    ptr_id,
                    type_id,
                    log_tag,
                    well_known_token: well_known,
                    payload: heap.read_primitive(ptr)?,
                });
                continue;
            }

            let (payload, depends_on) = if well_known.is_some() {
                (ObjectPayload::None, Vec::new())
            } else {
                let payload = heap.read_payload(ptr)?;
                let mut deps: Vec<PtrId> = Vec::new();
                for dep in payload.construction_refs() {
                    if dep != ptr_id && self.object_cells.contains(&dep.into()) && !deps.contains(&dep) {
                        deps.push(dep);
                    }
                }
                (payload, deps)
            };

            objects.push(SnapObject {
                object_ptr_id: ptr_id,
                object_tag: heap.object_tag(ptr)?,
                type_id,
                optional_well_known_token: well_known,
                slot_values: heap.read_slots(ptr)?,
                optional_indexed_array_id: heap.indexed_array(ptr)?,
                log_tag,
                identity_tag,
                depends_on,
                payload,
            });
        }

        let (used_memory, reserved_memory) = heap.memory_stats();
        let snap = SnapShot {
            contexts: std::mem::take(&mut self.contexts),
            handlers: std::mem::take(&mut self.handlers),
            types: std::mem::take(&mut self.types),
            function_bodies: std::mem::take(&mut self.function_bodies),
            primitives,
            objects,
            scopes: std::mem::take(&mut self.scopes),
            slot_arrays: std::mem::take(&mut self.slot_arrays),
            gc_time: self.gc_time,
            mark_time: self.mark_time,
            extract_time: elapsed_ms(start),
            used_memory,
            reserved_memory,
        };
        debug!(
            objects = snap.objects.len(),
            primitives = snap.primitives.len(),
            types = snap.types.len(),
            "snapshot evacuated"
        );
        self.pending = Some(snap);
        Ok(())
    }

    /// Hand over the finished snapshot
    pub fn complete_snapshot(&mut self) -> TtdResult<SnapShot> {
        let snap = self
            .pending
            .take()
            .ok_or(TtdError::PolicyViolation("snapshot completed before evacuation"))?;
        self.cells.clear();
        self.marked.clear();
        self.object_cells.clear();
        Ok(snap)
    }
}

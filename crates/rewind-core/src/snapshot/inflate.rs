//! Snapshot to live heap
//!
//! Order matters: contexts, handlers and types, function bodies,
//! primitives, then objects (each after its construction dependencies),
//! slot arrays and scopes. A second pass wires type prototypes, kind
//! references and slot contents once every object has a live counterpart.
//! Roots are relinked last.

use super::objects::{object_kind_ops, ConstructBase, SnapObject};
use super::types::TypeId;
use super::values::{FunctionBodyResolveInfo, ScopeType, TopLevelScripts};
use super::var::{LogTag, PtrId, Var};
use super::SnapShot;
use crate::error::{TtdError, TtdResult};
use crate::heap::{HeapBuilder, LivePtr};
use crate::inflate_map::InflateMap;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

struct Inflater<'s> {
    objects: FxHashMap<PtrId, &'s SnapObject>,
    bodies: FxHashMap<PtrId, &'s FunctionBodyResolveInfo>,
    type_contexts: FxHashMap<TypeId, LogTag>,
    in_progress: FxHashSet<PtrId>,
}

impl<'s> Inflater<'s> {
    fn new(snap: &'s SnapShot) -> Self {
        Self {
            objects: snap.objects.iter().map(|o| (o.object_ptr_id, o)).collect(),
            bodies: snap
                .function_bodies
                .iter()
                .map(|b| (b.function_body_id, b))
                .collect(),
            type_contexts: snap.types.iter().map(|t| (t.type_id, t.context_tag)).collect(),
            in_progress: FxHashSet::default(),
        }
    }

    fn type_and_context(&self, id: TypeId, map: &InflateMap) -> TtdResult<ConstructBase> {
        let tag = self
            .type_contexts
            .get(&id)
            .copied()
            .ok_or(TtdError::MissingInflateTarget { what: "type", id: id.0 })?;
        Ok(ConstructBase {
            type_ptr: map.lookup_type(id)?,
            context: map.lookup_context(tag)?,
        })
    }

    fn inflate_function_body(
        &self,
        id: PtrId,
        map: &mut InflateMap,
        builder: &mut dyn HeapBuilder,
        scripts: &TopLevelScripts,
    ) -> TtdResult<LivePtr> {
        if let Ok(live) = map.lookup_function_body(id) {
            return Ok(live);
        }
        if let Some(live) = map.find_reusable_function_body_if_exists(id) {
            map.add_function_body(id, live);
            return Ok(live);
        }
        let info = self
            .bodies
            .get(&id)
            .copied()
            .ok_or(TtdError::MissingInflateTarget {
                what: "function body",
                id: id.0,
            })?;
        let parent = match info.parent_body_id {
            Some(parent) => Some(self.inflate_function_body(parent, map, builder, scripts)?),
            None => None,
        };
        let context = map.lookup_context(info.context_tag)?;
        let live = builder.construct_function_body(info, parent, context, scripts)?;
        map.add_function_body(id, live);
        Ok(live)
    }

    fn inflate_single_object(
        &mut self,
        obj: &'s SnapObject,
        map: &mut InflateMap,
        builder: &mut dyn HeapBuilder,
    ) -> TtdResult<LivePtr> {
        let id = obj.object_ptr_id;
        if let Some(live) = map.lookup_object_opt(id) {
            return Ok(live);
        }
        if !self.in_progress.insert(id) {
            return Err(TtdError::PolicyViolation("cyclic construction dependency"));
        }

        for dep in &obj.depends_on {
            match self.objects.get(dep).copied() {
                Some(dep_obj) => {
                    self.inflate_single_object(dep_obj, map, builder)?;
                }
                None if map.is_already_inflated(*dep) => {}
                None => {
                    return Err(TtdError::MissingInflateTarget {
                        what: "object",
                        id: dep.0,
                    })
                }
            }
        }

        let ops = object_kind_ops(obj.object_tag).ok_or(TtdError::UnhandledObject(id))?;
        let base = self.type_and_context(obj.type_id, map)?;

        let reusable = map
            .find_reusable_object_if_exists(id)
            .filter(|&old| ops.reusable && builder.can_reuse_object(old, obj.object_tag));

        let live = if let Some(token) = &obj.optional_well_known_token {
            let live = builder.resolve_well_known(base.context, token)?;
            builder.reset_object(live, base.type_ptr)?;
            map.mark_property_reset(live);
            live
        } else if let Some(old) = reusable {
            builder.reset_object(old, base.type_ptr)?;
            map.mark_property_reset(old);
            old
        } else {
            let inflate = ops.inflate.ok_or(TtdError::UnhandledObject(id))?;
            inflate(obj, base, map, builder)?
        };

        builder.set_object_tags(live, obj.log_tag, obj.identity_tag)?;
        map.add_object(id, live)?;
        self.in_progress.remove(&id);
        Ok(live)
    }
}

impl SnapShot {
    /// Rebuild this snapshot in `builder`, recording every pointer in `map`
    pub fn inflate(
        &self,
        map: &mut InflateMap,
        builder: &mut dyn HeapBuilder,
        scripts: &TopLevelScripts,
    ) -> TtdResult<()> {
        let mut inflater = Inflater::new(self);

        for ctx in &self.contexts {
            let global = builder.inflate_context(ctx, scripts)?;
            map.add_context(ctx.context_tag, global);
        }

        for handler in &self.handlers {
            let live = builder.construct_handler(handler)?;
            map.add_handler(handler.handler_id, live);
        }
        for ty in &self.types {
            let handler = ty.handler_id.map(|h| map.lookup_handler(h)).transpose()?;
            let context = map.lookup_context(ty.context_tag)?;
            let live = builder.construct_type(ty, handler, context)?;
            map.add_type(ty.type_id, live);
        }

        for body in &self.function_bodies {
            inflater.inflate_function_body(body.function_body_id, map, builder, scripts)?;
        }

        for prim in &self.primitives {
            let base = inflater.type_and_context(prim.type_id, map)?;
            let live = match &prim.well_known_token {
                Some(token) => builder.resolve_well_known(base.context, token)?,
                None => builder.construct_primitive(prim, base.type_ptr)?,
            };
            if prim.log_tag.is_valid() {
                builder.set_object_tags(live, prim.log_tag, Default::default())?;
            }
            map.add_object(prim.ptr_id, live)?;
        }

        for obj in &self.objects {
            inflater.inflate_single_object(obj, map, builder)?;
        }
        trace!(objects = self.objects.len(), "objects allocated");

        for slots in &self.slot_arrays {
            let values = slots
                .slots
                .iter()
                .map(|v| map.inflate_var(*v))
                .collect::<TtdResult<Vec<_>>>()?;
            let body = slots
                .function_body_id
                .map(|b| map.lookup_function_body(b))
                .transpose()?;
            let live = builder.construct_slot_array(slots, values, body)?;
            map.add_slot_array(slots.slot_id, live);
        }

        for scope in &self.scopes {
            let mut entries = Vec::with_capacity(scope.entries.len());
            for entry in &scope.entries {
                let live = match entry.scope_type {
                    ScopeType::ActivationObject | ScopeType::With => map.lookup_object(entry.id)?,
                    ScopeType::SlotArray => map.lookup_slot_array(entry.id)?,
                    ScopeType::Invalid => continue,
                };
                entries.push((entry.scope_type, live));
            }
            let live = builder.construct_scope(scope, entries)?;
            map.add_environment(scope.scope_id, live);
        }

        for ty in &self.types {
            if !matches!(ty.prototype, Var::Invalid) {
                let live = map.lookup_type(ty.type_id)?;
                builder.set_type_prototype(live, map.inflate_var(ty.prototype)?)?;
            }
        }

        for obj in &self.objects {
            let live = map.lookup_object(obj.object_ptr_id)?;
            if !obj.is_well_known() {
                if let Some(additional) =
                    object_kind_ops(obj.object_tag).and_then(|ops| ops.additional_instantiation)
                {
                    additional(obj, live, map, builder)?;
                }
            }
            let values = obj
                .slot_values
                .iter()
                .map(|v| map.inflate_var(*v))
                .collect::<TtdResult<Vec<_>>>()?;
            let indexed = obj
                .optional_indexed_array_id
                .map(|id| map.lookup_object(id))
                .transpose()?;
            builder.restore_slots(live, values, indexed)?;
        }

        for ctx in &self.contexts {
            let global = map.lookup_context(ctx.context_tag)?;
            let roots = ctx
                .roots
                .iter()
                .map(|r| Ok((map.lookup_object(r.ptr_id)?, r.log_tag)))
                .collect::<TtdResult<Vec<_>>>()?;
            builder.relink_roots(global, &roots)?;
        }

        debug!(
            contexts = self.contexts.len(),
            objects = map.object_count(),
            "snapshot inflated"
        );
        Ok(())
    }
}

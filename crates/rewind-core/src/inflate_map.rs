//! Snapshot id to live pointer tables for one inflate session
//!
//! Every registered pointer is pinned until the session that created it is
//! cleaned up. Object and function-body tables survive `cleanup_after_inflate`
//! so the next inflate of the same snapshot can recycle them.

use crate::error::{TtdError, TtdResult};
use crate::heap::{LivePtr, LiveValue};
use crate::snapshot::{HandlerId, LogTag, PtrId, SnapVar, TypeId};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// Pointers a collector must treat as roots
pub type PinSet = Arc<RwLock<FxHashSet<LivePtr>>>;

/// Table sizes used to pre-size an inflate session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InflateCounts {
    /// Script contexts
    pub contexts: usize,
    /// Property-layout handlers
    pub handlers: usize,
    /// Types
    pub types: usize,
    /// Function bodies
    pub function_bodies: usize,
    /// Primitives plus objects
    pub objects: usize,
    /// Scope chains
    pub scopes: usize,
    /// Slot arrays
    pub slot_arrays: usize,
}

/// Snapshot id to live pointer tables
#[derive(Debug, Default)]
pub struct InflateMap {
    handler_map: FxHashMap<HandlerId, LivePtr>,
    type_map: FxHashMap<TypeId, LivePtr>,
    tag_to_global: FxHashMap<LogTag, LivePtr>,
    object_map: FxHashMap<PtrId, LivePtr>,
    function_body_map: FxHashMap<PtrId, LivePtr>,
    environment_map: FxHashMap<PtrId, LivePtr>,
    slot_array_map: FxHashMap<PtrId, LivePtr>,

    old_object_map: FxHashMap<PtrId, LivePtr>,
    old_function_body_map: FxHashMap<PtrId, LivePtr>,

    inflate_pin_set: PinSet,
    environment_pin_set: PinSet,
    slot_array_pin_set: PinSet,
    old_inflate_pin_set: PinSet,

    property_reset_set: FxHashSet<LivePtr>,
}

fn pin(set: &PinSet, ptr: LivePtr) {
    set.write().insert(ptr);
}

fn missing(what: &'static str, id: u64) -> TtdError {
    TtdError::MissingInflateTarget { what, id }
}

impl InflateMap {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear everything, including reuse tables, and size for a fresh inflate
    pub fn prep_for_initial_inflate(&mut self, counts: InflateCounts) {
        self.clear_session_tables();
        self.object_map.clear();
        self.function_body_map.clear();
        self.old_object_map.clear();
        self.old_function_body_map.clear();
        self.inflate_pin_set.write().clear();
        self.old_inflate_pin_set.write().clear();
        self.reserve(counts);
    }

    /// Move the previous session's objects to the reuse side and clear current tables
    pub fn prep_for_reinflate(&mut self, counts: InflateCounts) {
        self.clear_session_tables();
        self.old_object_map = std::mem::take(&mut self.object_map);
        self.old_function_body_map = std::mem::take(&mut self.function_body_map);
        {
            let mut current = self.inflate_pin_set.write();
            let mut old = self.old_inflate_pin_set.write();
            *old = std::mem::take(&mut *current);
        }
        self.reserve(counts);
    }

    /// Release transient tables; objects and function bodies stay for reuse
    pub fn cleanup_after_inflate(&mut self) {
        self.clear_session_tables();
        self.old_object_map.clear();
        self.old_function_body_map.clear();
        self.old_inflate_pin_set.write().clear();
    }

    fn clear_session_tables(&mut self) {
        self.handler_map.clear();
        self.type_map.clear();
        self.tag_to_global.clear();
        self.environment_map.clear();
        self.slot_array_map.clear();
        self.environment_pin_set.write().clear();
        self.slot_array_pin_set.write().clear();
        self.property_reset_set.clear();
    }

    fn reserve(&mut self, counts: InflateCounts) {
        self.handler_map.reserve(counts.handlers);
        self.type_map.reserve(counts.types);
        self.tag_to_global.reserve(counts.contexts);
        self.object_map.reserve(counts.objects);
        self.function_body_map.reserve(counts.function_bodies);
        self.environment_map.reserve(counts.scopes);
        self.slot_array_map.reserve(counts.slot_arrays);
        self.inflate_pin_set.write().reserve(counts.objects);
    }

    /// Register a context's global object
    pub fn add_context(&mut self, tag: LogTag, global: LivePtr) {
        self.tag_to_global.insert(tag, global);
        pin(&self.inflate_pin_set, global);
    }

    /// Global object of a context
    pub fn lookup_context(&self, tag: LogTag) -> TtdResult<LivePtr> {
        self.tag_to_global
            .get(&tag)
            .copied()
            .ok_or_else(|| missing("context", tag.0))
    }

    /// Register a handler
    pub fn add_handler(&mut self, id: HandlerId, ptr: LivePtr) {
        self.handler_map.insert(id, ptr);
    }

    /// Inflated handler
    pub fn lookup_handler(&self, id: HandlerId) -> TtdResult<LivePtr> {
        self.handler_map
            .get(&id)
            .copied()
            .ok_or_else(|| missing("handler", id.0))
    }

    /// Register a type
    pub fn add_type(&mut self, id: TypeId, ptr: LivePtr) {
        self.type_map.insert(id, ptr);
    }

    /// Inflated type
    pub fn lookup_type(&self, id: TypeId) -> TtdResult<LivePtr> {
        self.type_map
            .get(&id)
            .copied()
            .ok_or_else(|| missing("type", id.0))
    }

    /// True once `id` has a live counterpart in this session
    pub fn is_already_inflated(&self, id: PtrId) -> bool {
        self.object_map.contains_key(&id)
    }

    /// Register an object or primitive and pin it
    pub fn add_object(&mut self, id: PtrId, ptr: LivePtr) -> TtdResult<()> {
        if self.object_map.insert(id, ptr).is_some() {
            debug_assert!(false, "object {} inflated twice", id);
            return Err(TtdError::PolicyViolation("object inflated twice"));
        }
        pin(&self.inflate_pin_set, ptr);
        Ok(())
    }

    /// Inflated object or primitive
    pub fn lookup_object(&self, id: PtrId) -> TtdResult<LivePtr> {
        self.lookup_object_opt(id).ok_or_else(|| missing("object", id.0))
    }

    /// Inflated object or primitive, if present
    pub fn lookup_object_opt(&self, id: PtrId) -> Option<LivePtr> {
        self.object_map.get(&id).copied()
    }

    /// Previous session's object for `id`
    pub fn find_reusable_object_if_exists(&self, id: PtrId) -> Option<LivePtr> {
        self.old_object_map.get(&id).copied()
    }

    /// Register a function body
    pub fn add_function_body(&mut self, id: PtrId, ptr: LivePtr) {
        self.function_body_map.insert(id, ptr);
    }

    /// Inflated function body
    pub fn lookup_function_body(&self, id: PtrId) -> TtdResult<LivePtr> {
        self.function_body_map
            .get(&id)
            .copied()
            .ok_or_else(|| missing("function body", id.0))
    }

    /// True once the body has a live counterpart in this session
    pub fn is_function_body_inflated(&self, id: PtrId) -> bool {
        self.function_body_map.contains_key(&id)
    }

    /// Previous session's body for `id`
    pub fn find_reusable_function_body_if_exists(&self, id: PtrId) -> Option<LivePtr> {
        self.old_function_body_map.get(&id).copied()
    }

    /// Register a scope chain and pin it
    pub fn add_environment(&mut self, id: PtrId, ptr: LivePtr) {
        self.environment_map.insert(id, ptr);
        pin(&self.environment_pin_set, ptr);
    }

    /// Inflated scope chain
    pub fn lookup_environment(&self, id: PtrId) -> TtdResult<LivePtr> {
        self.environment_map
            .get(&id)
            .copied()
            .ok_or_else(|| missing("environment", id.0))
    }

    /// Register a slot array and pin it
    pub fn add_slot_array(&mut self, id: PtrId, ptr: LivePtr) {
        self.slot_array_map.insert(id, ptr);
        pin(&self.slot_array_pin_set, ptr);
    }

    /// Inflated slot array
    pub fn lookup_slot_array(&self, id: PtrId) -> TtdResult<LivePtr> {
        self.slot_array_map
            .get(&id)
            .copied()
            .ok_or_else(|| missing("slot array", id.0))
    }

    /// Live value for a snapshot value
    pub fn inflate_var(&self, v: SnapVar) -> TtdResult<LiveValue> {
        v.try_map_ref(|id| self.lookup_object(id))
    }

    /// Note that a recycled object had its properties cleared this session
    pub fn mark_property_reset(&mut self, ptr: LivePtr) -> bool {
        self.property_reset_set.insert(ptr)
    }

    /// True if `ptr` was cleared this session
    pub fn was_property_reset(&self, ptr: LivePtr) -> bool {
        self.property_reset_set.contains(&ptr)
    }

    /// Shared handle on the current session's pinned objects
    pub fn inflate_pin_set(&self) -> PinSet {
        Arc::clone(&self.inflate_pin_set)
    }

    /// True if any pin set holds `ptr`
    pub fn is_pinned(&self, ptr: LivePtr) -> bool {
        [
            &self.inflate_pin_set,
            &self.environment_pin_set,
            &self.slot_array_pin_set,
            &self.old_inflate_pin_set,
        ]
        .iter()
        .any(|set| set.read().contains(&ptr))
    }

    /// Number of objects inflated this session
    pub fn object_count(&self) -> usize {
        self.object_map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Var;

    #[test]
    fn test_add_and_lookup_object() {
        let mut map = InflateMap::new();
        map.prep_for_initial_inflate(InflateCounts::default());
        assert!(!map.is_already_inflated(PtrId(8)));
        map.add_object(PtrId(8), LivePtr(100)).unwrap();
        assert!(map.is_already_inflated(PtrId(8)));
        assert_eq!(map.lookup_object(PtrId(8)).unwrap(), LivePtr(100));
        assert!(map.is_pinned(LivePtr(100)));
        assert!(matches!(
            map.lookup_object(PtrId(9)),
            Err(TtdError::MissingInflateTarget { what: "object", id: 9 })
        ));
    }

    #[test]
    fn test_inflate_var() {
        let mut map = InflateMap::new();
        map.add_object(PtrId(8), LivePtr(100)).unwrap();
        assert_eq!(map.inflate_var(Var::Ref(PtrId(8))).unwrap(), Var::Ref(LivePtr(100)));
        assert_eq!(map.inflate_var(Var::Int(5)).unwrap(), Var::Int(5));
        assert!(map.inflate_var(Var::Ref(PtrId(16))).is_err());
    }

    #[test]
    fn test_reinflate_moves_objects_to_reuse_side() {
        let mut map = InflateMap::new();
        map.prep_for_initial_inflate(InflateCounts::default());
        map.add_object(PtrId(8), LivePtr(100)).unwrap();
        map.add_function_body(PtrId(24), LivePtr(300));
        map.add_type(TypeId(4), LivePtr(400));
        map.cleanup_after_inflate();

        assert!(map.lookup_type(TypeId(4)).is_err());
        assert!(map.is_already_inflated(PtrId(8)));

        map.prep_for_reinflate(InflateCounts::default());
        assert!(!map.is_already_inflated(PtrId(8)));
        assert_eq!(map.find_reusable_object_if_exists(PtrId(8)), Some(LivePtr(100)));
        assert_eq!(
            map.find_reusable_function_body_if_exists(PtrId(24)),
            Some(LivePtr(300))
        );
        assert!(map.is_pinned(LivePtr(100)));

        map.cleanup_after_inflate();
        assert_eq!(map.find_reusable_object_if_exists(PtrId(8)), None);
        assert!(!map.is_pinned(LivePtr(100)));
    }

    #[test]
    fn test_initial_inflate_drops_reuse_tables() {
        let mut map = InflateMap::new();
        map.add_object(PtrId(8), LivePtr(100)).unwrap();
        map.prep_for_reinflate(InflateCounts::default());
        map.prep_for_initial_inflate(InflateCounts::default());
        assert_eq!(map.find_reusable_object_if_exists(PtrId(8)), None);
        assert_eq!(map.object_count(), 0);
    }

    #[test]
    fn test_pin_set_handle_is_shared() {
        let mut map = InflateMap::new();
        let handle = map.inflate_pin_set();
        map.add_object(PtrId(8), LivePtr(100)).unwrap();
        assert!(handle.read().contains(&LivePtr(100)));
    }

    #[test]
    fn test_property_reset_set() {
        let mut map = InflateMap::new();
        assert!(map.mark_property_reset(LivePtr(1)));
        assert!(!map.mark_property_reset(LivePtr(1)));
        assert!(map.was_property_reset(LivePtr(1)));
        map.cleanup_after_inflate();
        assert!(!map.was_property_reset(LivePtr(1)));
    }

    #[test]
    fn test_context_lookup() {
        let mut map = InflateMap::new();
        map.add_context(LogTag(1), LivePtr(16));
        assert_eq!(map.lookup_context(LogTag(1)).unwrap(), LivePtr(16));
        assert!(map.lookup_context(LogTag(2)).is_err());
    }
}

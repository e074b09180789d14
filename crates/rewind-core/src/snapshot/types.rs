//! Property-layout descriptors shared between objects

use super::var::{LogTag, PropertyId, PtrId, SnapVar};
use crate::error::TtdResult;
use crate::impl_enum_tag;
use crate::serialize::{preallocation, Key, Reader, Separator, Writer};

/// Identity of a live type (its address at extraction time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u64);

/// Identity of a live property-layout handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub u64);

/// What a handler slot holds
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// Deleted or never-populated slot
    Clear = 0,
    /// Plain data property
    Data = 1,
    /// Accessor getter
    Getter = 2,
    /// Accessor setter
    Setter = 3,
}

impl_enum_tag!(SlotKind, "SlotKind", [Clear, Data, Getter, Setter]);

/// One property slot described by a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerEntry {
    /// Property stored in this slot
    pub property_id: PropertyId,
    /// Writable/enumerable/configurable bits
    pub attributes: u8,
    /// Slot content kind
    pub kind: SlotKind,
}

/// Property layout: which property lives in which slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapHandler {
    /// Handler identity
    pub handler_id: HandlerId,
    /// Slots stored inline in the object
    pub inline_slot_capacity: u32,
    /// All slots, inline and auxiliary
    pub total_slot_capacity: u32,
    /// Whether new properties may be added
    pub is_extensible: bool,
    /// Ordered slot descriptions
    pub entries: Vec<HandlerEntry>,
}

impl SnapHandler {
    /// Slot index holding `pid`
    pub fn slot_of(&self, pid: PropertyId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.property_id == pid && e.kind != SlotKind::Clear)
    }

    /// Serialize
    pub fn emit(&self, w: &mut dyn Writer, sep: Separator) -> TtdResult<()> {
        w.write_record_start(sep)?;
        w.adjust_indent(1);
        w.write_addr(Key::HandlerId, self.handler_id.0, Separator::None)?;
        w.write_uint32(Key::InlineSlotCapacity, self.inline_slot_capacity, Separator::Comma)?;
        w.write_uint32(Key::TotalSlotCapacity, self.total_slot_capacity, Separator::Comma)?;
        w.write_bool(Key::IsExtensible, self.is_extensible, Separator::Comma)?;
        w.write_length_value(self.entries.len() as u32, Separator::Comma)?;
        w.write_sequence_start_default_key(Separator::Comma)?;
        w.adjust_indent(1);
        for (i, entry) in self.entries.iter().enumerate() {
            w.write_record_start(Separator::big_comma_if(i != 0))?;
            w.write_uint32(Key::PropertyId, entry.property_id.0, Separator::None)?;
            w.write_byte(Key::Attributes, entry.attributes, Separator::Comma)?;
            w.write_tag(Key::EntryKind, entry.kind, Separator::Comma)?;
            w.write_record_end(Separator::None)?;
        }
        w.adjust_indent(-1);
        w.write_sequence_end(Separator::BigSpace)?;
        w.adjust_indent(-1);
        w.write_record_end(Separator::BigSpace)
    }

    /// Deserialize
    pub fn parse(r: &mut dyn Reader, read_sep: bool) -> TtdResult<Self> {
        r.read_record_start(read_sep)?;
        let handler_id = HandlerId(r.read_addr(Key::HandlerId, false)?);
        let inline_slot_capacity = r.read_uint32(Key::InlineSlotCapacity, true)?;
        let total_slot_capacity = r.read_uint32(Key::TotalSlotCapacity, true)?;
        let is_extensible = r.read_bool(Key::IsExtensible, true)?;
        let count = r.read_length_value(true)?;
        r.read_sequence_start_default_key(true)?;
        let mut entries = Vec::with_capacity(preallocation(count));
        for i in 0..count {
            r.read_record_start(i != 0)?;
            let property_id = PropertyId(r.read_uint32(Key::PropertyId, false)?);
            let attributes = r.read_byte(Key::Attributes, true)?;
            let kind = r.read_tag(Key::EntryKind, true)?;
            r.read_record_end()?;
            entries.push(HandlerEntry {
                property_id,
                attributes,
                kind,
            });
        }
        r.read_sequence_end()?;
        r.read_record_end()?;
        Ok(Self {
            handler_id,
            inline_slot_capacity,
            total_slot_capacity,
            is_extensible,
            entries,
        })
    }
}

/// Engine-level type classification
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum JsTypeTag {
    Undefined = 0,
    Null = 1,
    Boolean = 2,
    Number = 3,
    Int64Number = 4,
    UInt64Number = 5,
    String = 6,
    Symbol = 7,
    Object = 8,
    Function = 9,
    Array = 10,
    NativeIntArray = 11,
    NativeFloatArray = 12,
    ES5Array = 13,
    Date = 14,
    RegExp = 15,
    Error = 16,
    BooleanObject = 17,
    NumberObject = 18,
    StringObject = 19,
    SymbolObject = 20,
    Arguments = 21,
    ArrayBuffer = 22,
    TypedArray = 23,
    Map = 24,
    Set = 25,
    WeakMap = 26,
    WeakSet = 27,
    Proxy = 28,
    Promise = 29,
    GlobalObject = 30,
    ActivationObject = 31,
    HostObject = 32,
}

impl_enum_tag!(
    JsTypeTag,
    "JsTypeTag",
    [
        Undefined,
        Null,
        Boolean,
        Number,
        Int64Number,
        UInt64Number,
        String,
        Symbol,
        Object,
        Function,
        Array,
        NativeIntArray,
        NativeFloatArray,
        ES5Array,
        Date,
        RegExp,
        Error,
        BooleanObject,
        NumberObject,
        StringObject,
        SymbolObject,
        Arguments,
        ArrayBuffer,
        TypedArray,
        Map,
        Set,
        WeakMap,
        WeakSet,
        Proxy,
        Promise,
        GlobalObject,
        ActivationObject,
        HostObject,
    ]
);

impl JsTypeTag {
    /// True for types whose values are primitives rather than objects
    pub fn is_primitive(self) -> bool {
        (self as u32) <= JsTypeTag::Symbol as u32
    }
}

/// A live type: classification, prototype, and property layout
#[derive(Debug, Clone, PartialEq)]
pub struct SnapType {
    /// Type identity
    pub type_id: TypeId,
    /// Engine classification
    pub js_type: JsTypeTag,
    /// Context the type belongs to
    pub context_tag: LogTag,
    /// Prototype object (wired after all objects exist)
    pub prototype: SnapVar,
    /// Property layout, absent for primitives
    pub handler_id: Option<HandlerId>,
    /// Enumeration fast path
    pub has_no_enumerable_properties: bool,
}

impl SnapType {
    /// Serialize
    pub fn emit(&self, w: &mut dyn Writer, sep: Separator) -> TtdResult<()> {
        w.write_record_start(sep)?;
        w.write_addr(Key::TypeId, self.type_id.0, Separator::None)?;
        w.write_tag(Key::JsTypeTag, self.js_type, Separator::Comma)?;
        w.write_log_tag(self.context_tag.0, Separator::Comma)?;
        w.write_key(Key::Prototype, Separator::Comma)?;
        self.prototype.emit(w, Separator::None)?;
        w.write_addr(
            Key::HandlerId,
            self.handler_id.map(|h| h.0).unwrap_or(0),
            Separator::Comma,
        )?;
        w.write_bool(
            Key::HasNoEnumerableProperties,
            self.has_no_enumerable_properties,
            Separator::Comma,
        )?;
        w.write_record_end(Separator::None)
    }

    /// Deserialize
    pub fn parse(r: &mut dyn Reader, read_sep: bool) -> TtdResult<Self> {
        r.read_record_start(read_sep)?;
        let type_id = TypeId(r.read_addr(Key::TypeId, false)?);
        let js_type = r.read_tag(Key::JsTypeTag, true)?;
        let context_tag = LogTag(r.read_log_tag(true)?);
        r.read_key(Key::Prototype, true)?;
        let prototype = SnapVar::parse(r, false)?;
        let handler = r.read_addr(Key::HandlerId, true)?;
        let has_no_enumerable_properties = r.read_bool(Key::HasNoEnumerableProperties, true)?;
        r.read_record_end()?;
        Ok(Self {
            type_id,
            js_type,
            context_tag,
            prototype,
            handler_id: (handler != 0).then_some(HandlerId(handler)),
            has_no_enumerable_properties,
        })
    }

    /// Prototype object, if it is a reference
    pub fn prototype_ref(&self) -> Option<PtrId> {
        self.prototype.reference()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::EnumTag;

    #[test]
    fn test_slot_of_skips_cleared_slots() {
        let handler = SnapHandler {
            handler_id: HandlerId(1),
            inline_slot_capacity: 4,
            total_slot_capacity: 4,
            is_extensible: true,
            entries: vec![
                HandlerEntry {
                    property_id: PropertyId(7),
                    attributes: 0,
                    kind: SlotKind::Clear,
                },
                HandlerEntry {
                    property_id: PropertyId(7),
                    attributes: 0,
                    kind: SlotKind::Data,
                },
            ],
        };
        assert_eq!(handler.slot_of(PropertyId(7)), Some(1));
        assert_eq!(handler.slot_of(PropertyId(8)), None);
    }

    #[test]
    fn test_js_type_tags() {
        assert!(JsTypeTag::String.is_primitive());
        assert!(!JsTypeTag::Object.is_primitive());
        assert_eq!(JsTypeTag::from_tag(29), Some(JsTypeTag::Promise));
        assert_eq!(JsTypeTag::from_tag(99), None);
        assert_eq!(SlotKind::from_tag(3), Some(SlotKind::Setter));
    }
}

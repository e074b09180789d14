//! Field keys of the persisted format
//!
//! Text streams render a key by name, binary streams by its discriminant
//! byte. New keys go at the end so existing discriminants stay stable.

macro_rules! define_keys {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// A field name in a persisted record
        #[allow(missing_docs)]
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Key {
            $($variant),*
        }

        impl Key {
            /// Every key, indexed by discriminant
            pub const ALL: &'static [Key] = &[$(Key::$variant),*];

            /// Name used by the text format
            pub fn name(self) -> &'static str {
                match self {
                    $(Key::$variant => $name),*
                }
            }
        }
    };
}

define_keys! {
    Count => "count",
    Values => "values",
    Entry => "entry",
    Index => "index",
    Name => "name",
    Value => "value",
    Id => "id",

    // log header
    Arch => "arch",
    Platform => "platform",
    DiagEnabled => "diagEnabled",
    UsedMemory => "usedMemory",
    ReservedMemory => "reservedMemory",
    SnapInterval => "snapInterval",
    SnapHistoryLength => "snapHistoryLength",

    // event framing
    EventKind => "eventKind",
    EventTime => "eventTime",
    ResultStatus => "resultStatus",
    Diagnostics => "diagnostics",

    // data-only events
    RestoreTime => "restoreTime",
    RestoreLogTag => "restoreLogTag",
    RestoreIdentityTag => "restoreIdentityTag",
    YieldId => "yieldId",
    WallTime => "wallTime",
    BodyCounterId => "bodyCounterId",
    Message => "message",
    DoPrint => "doPrint",
    DoubleVal => "doubleVal",
    StringVal => "stringVal",
    BoolVal => "boolVal",
    IntVal => "intVal",
    I64Val => "i64Val",
    U64Val => "u64Val",
    Seed0 => "seed0",
    Seed1 => "seed1",
    ReturnCode => "returnCode",
    PropertyId => "pid",
    Attributes => "attributes",
    CallbackFunction => "callbackFunction",
    LastNestedEventTime => "lastNestedEventTime",
    Function => "function",
    RootNestingDepth => "rootNestingDepth",
    Arguments => "arguments",
    ReturnValue => "returnValue",
    HasScriptException => "hasScriptException",
    HasTerminatingException => "hasTerminatingException",

    // values
    ValueKind => "valueKind",
    LogTag => "logTag",
    IdentityTag => "identityTag",
    VarTag => "ttdVarTag",
    PtrIdVal => "ptrIdVal",

    // actions
    ContextTag => "ctxTag",
    Object => "object",
    Prototype => "prototype",
    Descriptor => "descriptor",
    UseStrict => "useStrict",
    Result => "result",
    IsExternal => "isExternal",
    Length => "length",
    Bytes => "bytes",
    IsNamed => "isNamed",
    ConvertTarget => "convertTarget",
    Exception => "exception",
    IsCancel => "isCancel",
    IsRepeating => "isRepeating",
    CurrentCallbackId => "currentCallbackId",
    CreatedCallbackId => "createdCallbackId",
    IsExpression => "isExpression",
    SourceCode => "src",
    Uri => "uri",
    DocumentId => "documentId",
    HostCallbackId => "hostCallbackId",
    BeginTime => "beginTime",
    EndTime => "endTime",
    MatchingBeginTime => "matchingBeginTime",
    Line => "line",
    Column => "column",

    // snapshot container
    GcTime => "gcTime",
    MarkTime => "markTime",
    ExtractTime => "extractTime",
    WriteTime => "writeTime",
    Contexts => "contexts",
    Handlers => "handlers",
    Types => "types",
    FunctionBodies => "functionBodies",
    Primitives => "primitives",
    Objects => "objects",
    Scopes => "scopes",
    SlotArrays => "slotArrays",

    // value model
    HandlerId => "handlerId",
    InlineSlotCapacity => "inlineSlotCapacity",
    TotalSlotCapacity => "totalSlotCapacity",
    IsExtensible => "isExtensible",
    EntryKind => "entryKind",
    TypeId => "typeId",
    JsTypeTag => "jsTypeTag",
    HasNoEnumerableProperties => "hasNoEnumerableProperties",
    PtrId => "ptrId",
    IsWellKnown => "isWellKnown",
    WellKnownToken => "wellKnownToken",
    PayloadKind => "payloadKind",
    FunctionBodyId => "functionBodyId",
    KnownPath => "knownPath",
    ParentBodyId => "parentBodyId",
    ModuleId => "moduleId",
    LoadFlag => "loadFlag",
    IsStrict => "isStrict",
    RegisterDocument => "registerDocument",
    ScriptLoads => "scriptLoads",
    NewFunctions => "newFunctions",
    Evals => "evals",
    GlobalObject => "globalObject",
    Roots => "roots",
    SlotId => "slotId",
    Slots => "slots",
    PropertyIds => "pids",
    ScopeId => "scopeId",
    ScopeType => "scopeType",
    ObjectType => "objectType",
    IndexedArrayId => "indexedArrayId",
    DependsOn => "dependsOn",

    // object payloads
    HomeObject => "homeObject",
    ComputedName => "computedName",
    HasSuperReference => "hasSuperReference",
    Proxy => "proxy",
    Target => "target",
    BoundThis => "boundThis",
    NumberOfArgs => "numberOfArgs",
    FormalCount => "formalCount",
    FrameObject => "frameObject",
    DeletedArgs => "deletedArgs",
    Pattern => "pattern",
    Flags => "flags",
    LastIndex => "lastIndex",
    IsLengthWritable => "isLengthWritable",
    Accessors => "accessors",
    Getter => "getter",
    Setter => "setter",
    ByteOffset => "byteOffset",
    Buffer => "buffer",
    Handler => "handler",
    Status => "status",
    IsHandled => "isHandled",
    ResolveReactions => "resolveReactions",
    RejectReactions => "rejectReactions",
    Capability => "capability",
    Promise => "promise",
    Resolve => "resolve",
    Reject => "reject",
    IsReject => "isReject",
    AlreadyResolved => "alreadyResolved",
    Reaction => "reaction",
    Argument => "argument",
    RemainingElements => "remainingElements",
    AlreadyCalled => "alreadyCalled",

    // entry diagnostics
    HasLocation => "hasLocation",
    SourceId => "sourceId",

    // log container
    Events => "events",
}

impl Key {
    /// Discriminant used by the binary format
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Key for a binary discriminant
    pub fn from_byte(byte: u8) -> Option<Key> {
        Self::ALL.get(byte as usize).copied()
    }

    /// Key for a text-format name
    pub fn from_name(name: &str) -> Option<Key> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn test_key_discriminants_index_all() {
        for (i, key) in Key::ALL.iter().enumerate() {
            assert_eq!(key.to_byte() as usize, i);
            assert_eq!(Key::from_byte(i as u8), Some(*key));
        }
        assert!(Key::ALL.len() < 256);
    }

    #[test]
    fn test_key_names_unique() {
        let names: FxHashSet<&str> = Key::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(names.len(), Key::ALL.len());
        assert_eq!(Key::from_name("eventTime"), Some(Key::EventTime));
        assert_eq!(Key::from_name("nope"), None);
    }
}

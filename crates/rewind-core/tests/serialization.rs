//! Serialization Round-Trip Tests
//!
//! Emits and parses every persisted shape through both backends with the
//! smallest buffer, so scalars and strings straddle refills:
//! - Every object kind and its payload
//! - Every JsRT action
//! - Every non-action event payload
//!
//! # Running Tests
//! ```bash
//! cargo test --test serialization
//! ```

use rewind_core::events::{ActionOp, ConvertTarget, EventPayload, ExternalCallData, SnapshotEventData};
use rewind_core::serialize::{open_reader, open_writer, EnumTag, Separator, MIN_BUFFER_SIZE};
use rewind_core::snapshot::*;
use rewind_core::{EventLogEntry, Format, JsRtAction, LogValue, MemoryStreams, ResultStatus, StreamProvider};

const FORMATS: [Format; 2] = [Format::Text, Format::Binary];

fn round_trip_objects(objects: &[SnapObject], format: Format) -> Vec<SnapObject> {
    let streams = MemoryStreams::new();
    let mut w = open_writer(format, streams.open_write("o").unwrap(), MIN_BUFFER_SIZE).unwrap();
    for (i, obj) in objects.iter().enumerate() {
        obj.emit(&mut *w, Separator::big_comma_if(i != 0)).unwrap();
    }
    w.flush_and_close().unwrap();

    let mut r = open_reader(format, streams.open_read("o").unwrap(), MIN_BUFFER_SIZE).unwrap();
    let parsed = (0..objects.len())
        .map(|i| SnapObject::parse(&mut *r, i != 0).unwrap())
        .collect();
    r.close().unwrap();
    parsed
}

fn round_trip_entries(entries: &[EventLogEntry], format: Format) -> Vec<EventLogEntry> {
    let streams = MemoryStreams::new();
    let mut w = open_writer(format, streams.open_write("e").unwrap(), MIN_BUFFER_SIZE).unwrap();
    for (i, e) in entries.iter().enumerate() {
        e.emit(&mut *w, Separator::big_comma_if(i != 0), true).unwrap();
    }
    w.flush_and_close().unwrap();

    let mut r = open_reader(format, streams.open_read("e").unwrap(), MIN_BUFFER_SIZE).unwrap();
    let parsed = (0..entries.len())
        .map(|i| EventLogEntry::parse(&mut *r, i != 0, true).unwrap())
        .collect();
    r.close().unwrap();
    parsed
}

// ===== Object Payloads =====

fn object(id: u64, tag: SnapObjectType, payload: ObjectPayload) -> SnapObject {
    SnapObject {
        object_ptr_id: PtrId(id),
        object_tag: tag,
        type_id: TypeId(64),
        optional_well_known_token: None,
        slot_values: vec![Var::Int(id as i32), Var::Number(-0.5), Var::Ref(PtrId(8))],
        optional_indexed_array_id: None,
        log_tag: LogTag(id),
        identity_tag: IdentityTag(id + 1),
        depends_on: payload.construction_refs(),
        payload,
    }
}

fn capability() -> PromiseCapability<PtrId> {
    PromiseCapability {
        promise: PtrId(200),
        resolve: PtrId(208),
        reject: PtrId(216),
    }
}

fn reaction(handler: u64) -> PromiseReaction<PtrId> {
    PromiseReaction {
        handler: PtrId(handler),
        capability: capability(),
    }
}

fn every_object() -> Vec<SnapObject> {
    use SnapObjectType as T;

    let mut objects = vec![
        object(
            16,
            T::ScriptFunction,
            ObjectPayload::ScriptFunction(ScriptFunctionInfo {
                body_id: PtrId(300),
                scope_id: Some(PtrId(308)),
                home_object: Some(PtrId(316)),
                computed_name: Var::Ref(PtrId(324)),
                has_super_reference: true,
            }),
        ),
        object(
            24,
            T::ExternalFunction,
            ObjectPayload::ExternalFunction {
                display_name: Var::Ref(PtrId(332)),
            },
        ),
        object(
            32,
            T::RuntimeRevokerFunction,
            ObjectPayload::RevokerFunction { proxy: Some(PtrId(340)) },
        ),
        object(
            40,
            T::RuntimeRevokerFunction,
            ObjectPayload::RevokerFunction { proxy: None },
        ),
        object(
            48,
            T::BoundFunction,
            ObjectPayload::BoundFunction(BoundFunctionInfo {
                target: PtrId(16),
                bound_this: Var::Invalid,
                args: vec![Var::Int(1), Var::Ref(PtrId(24))],
            }),
        ),
        object(
            56,
            T::HeapArguments,
            ObjectPayload::HeapArguments(HeapArgumentsInfo {
                number_of_arguments: 3,
                formal_count: 2,
                frame_object: Some(PtrId(348)),
                deleted_args: vec![false, true, false],
            }),
        ),
        object(
            64,
            T::ES5HeapArguments,
            ObjectPayload::HeapArguments(HeapArgumentsInfo {
                number_of_arguments: 0,
                formal_count: 0,
                frame_object: None,
                deleted_args: vec![],
            }),
        ),
        object(72, T::BoxedValue, ObjectPayload::BoxedValue(Var::Number(2.5))),
        object(80, T::Date, ObjectPayload::Date(-1.0e12)),
        object(
            88,
            T::Regex,
            ObjectPayload::Regex(RegexInfo {
                pattern: "a\"b\\d+,{}".to_string(),
                flags: 0b101,
                last_index: Var::Int(4),
            }),
        ),
        object(
            96,
            T::Array,
            ObjectPayload::Array(ArrayInfo {
                length: 100,
                entries: vec![(0, Var::Int(1)), (7, Var::Ref(PtrId(16))), (99, Var::Number(0.1))],
            }),
        ),
        object(
            104,
            T::NativeIntArray,
            ObjectPayload::NativeIntArray(ArrayInfo {
                length: 3,
                entries: vec![(0, i32::MIN), (2, i32::MAX)],
            }),
        ),
        object(
            112,
            T::NativeFloatArray,
            ObjectPayload::NativeFloatArray(ArrayInfo {
                length: 4,
                entries: vec![(1, f64::INFINITY), (3, f64::EPSILON)],
            }),
        ),
        object(
            120,
            T::ES5Array,
            ObjectPayload::ES5Array(ES5ArrayInfo {
                elements: ArrayInfo {
                    length: 5,
                    entries: vec![(0, Var::Int(9))],
                },
                accessors: vec![AccessorEntry {
                    index: 4,
                    getter: Some(PtrId(16)),
                    setter: None,
                    attributes: 2,
                }],
                is_length_writable: false,
            }),
        ),
        object(
            128,
            T::ArrayBuffer,
            ObjectPayload::ArrayBuffer((0..=255).collect()),
        ),
        object(
            136,
            T::TypedArray,
            ObjectPayload::TypedArray(TypedArrayInfo {
                byte_offset: 8,
                length: 16,
                buffer: PtrId(128),
            }),
        ),
        object(
            144,
            T::Set,
            ObjectPayload::Set(vec![Var::Int(1), Var::Ref(PtrId(16))]),
        ),
        object(
            152,
            T::Map,
            ObjectPayload::Map(vec![(Var::Int(1), Var::Ref(PtrId(24))), (Var::Number(2.0), Var::Invalid)]),
        ),
        object(
            160,
            T::Proxy,
            ObjectPayload::Proxy {
                handler: Some(PtrId(144)),
                target: Some(PtrId(152)),
            },
        ),
        object(
            168,
            T::Promise,
            ObjectPayload::Promise(PromiseInfo {
                status: PromiseStatus::Pending,
                is_handled: true,
                result: Var::Invalid,
                resolve_reactions: vec![reaction(16), reaction(24)],
                reject_reactions: vec![reaction(48)],
            }),
        ),
        object(
            176,
            T::Promise,
            ObjectPayload::Promise(PromiseInfo {
                status: PromiseStatus::Rejected,
                is_handled: false,
                result: Var::Ref(PtrId(88)),
                resolve_reactions: vec![],
                reject_reactions: vec![],
            }),
        ),
        object(
            184,
            T::PromiseResolveOrRejectFunction,
            ObjectPayload::PromiseResolveOrReject(PromiseResolveOrRejectInfo {
                promise: PtrId(168),
                is_reject: true,
                already_resolved: false,
            }),
        ),
        object(
            192,
            T::PromiseReactionTaskFunction,
            ObjectPayload::PromiseReactionTask(PromiseReactionTaskInfo {
                reaction: reaction(16),
                argument: Var::Int(-3),
            }),
        ),
        object(
            200,
            T::PromiseAllResolveElementFunction,
            ObjectPayload::PromiseAllResolveElement(PromiseAllResolveElementInfo {
                capability: capability(),
                index: 2,
                remaining_elements: 5,
                values: PtrId(96),
                already_called: true,
            }),
        ),
    ];

    for (i, tag) in [
        T::Dynamic,
        T::External,
        T::RuntimeFunction,
        T::Activation,
        T::BlockActivation,
        T::PseudoActivation,
        T::ConsoleScopeActivation,
        T::Error,
    ]
    .into_iter()
    .enumerate()
    {
        objects.push(object(400 + 8 * i as u64, tag, ObjectPayload::None));
    }

    let mut global = object(500, T::WellKnown, ObjectPayload::None);
    global.optional_well_known_token = Some(WellKnownToken::new("global"));
    global.optional_indexed_array_id = Some(PtrId(96));
    objects.push(global);
    objects
}

#[test]
fn test_every_object_kind_round_trips() {
    let objects = every_object();
    for format in FORMATS {
        let parsed = round_trip_objects(&objects, format);
        for (p, o) in parsed.iter().zip(&objects) {
            assert_eq!(p, o, "{:?} {:?}", format, o.object_tag);
        }
        assert_eq!(parsed.len(), objects.len());
    }
}

#[test]
fn test_every_handled_kind_is_covered() {
    let objects = every_object();
    for tag in (0..=32).filter_map(SnapObjectType::from_tag) {
        if object_kind_ops(tag).is_some() {
            assert!(
                objects.iter().any(|o| o.object_tag == tag),
                "{:?} has no round-trip case",
                tag
            );
        }
    }
}

#[test]
fn test_formats_agree_on_objects() {
    let objects = every_object();
    let text = round_trip_objects(&objects, Format::Text);
    let binary = round_trip_objects(&objects, Format::Binary);
    assert_eq!(text, binary);
}

// ===== Actions =====

fn action(time: i64, op: ActionOp, result: LogValue) -> EventLogEntry {
    EventLogEntry::new(
        time,
        EventPayload::Action(JsRtAction {
            context_tag: LogTag(1),
            op,
            result,
        }),
    )
}

fn every_action() -> Vec<ActionOp> {
    let obj = LogValue::Object(LogTag(6));
    vec![
        ActionOp::AllocateNumber { value: -0.0 },
        ActionOp::AllocateString {
            value: "line\nbreak \"quoted\"".to_string(),
        },
        ActionOp::AllocateSymbol {
            description: LogValue::String("sym".into()),
        },
        ActionOp::VarConvert {
            value: LogValue::Bool(true),
            target: ConvertTarget::ToString,
        },
        ActionOp::VarConvert {
            value: LogValue::Null,
            target: ConvertTarget::ToObject,
        },
        ActionOp::AllocateObject { is_external: true },
        ActionOp::AllocateArray { length: 12 },
        ActionOp::AllocateArrayBuffer {
            bytes: vec![0, 1, 254, 255],
        },
        ActionOp::AllocateFunction {
            name: Some(LogValue::String("f".into())),
        },
        ActionOp::AllocateFunction { name: None },
        ActionOp::GetAndClearException,
        ActionOp::GetProperty {
            object: obj.clone(),
            pid: PropertyId(3),
        },
        ActionOp::SetProperty {
            object: obj.clone(),
            pid: PropertyId(4),
            value: LogValue::Symbol(PropertyId(9)),
            use_strict: true,
        },
        ActionOp::DefineProperty {
            object: obj.clone(),
            pid: PropertyId(5),
            value: LogValue::Number(7.0),
            attributes: 0b111,
        },
        ActionOp::DeleteProperty {
            object: obj.clone(),
            pid: PropertyId(6),
            use_strict: false,
        },
        ActionOp::GetPrototype { object: obj.clone() },
        ActionOp::SetPrototype {
            object: obj.clone(),
            prototype: LogValue::Null,
        },
        ActionOp::GetIndex {
            object: obj.clone(),
            index: LogValue::Number(2.0),
        },
        ActionOp::SetIndex {
            object: obj.clone(),
            index: LogValue::String("k".into()),
            value: LogValue::Undefined,
        },
        ActionOp::GetTypedArrayInfo {
            object: obj.clone(),
            returns_buffer: true,
        },
        ActionOp::ConstructCall {
            function: obj.clone(),
            args: vec![LogValue::Number(1.0), LogValue::Object(LogTag(7))],
        },
        ActionOp::CallbackOp {
            is_cancel: false,
            is_repeating: true,
            current_callback_id: -1,
            callback_function: obj.clone(),
            created_callback_id: 42,
        },
        ActionOp::CodeParse {
            source: "function f() { return 1; }".to_string(),
            uri: "file:///a b.js".to_string(),
            document_id: 3,
            body_counter_id: 11,
            is_expression: false,
        },
        ActionOp::CallExistingFunctionBegin {
            function: obj.clone(),
            args: vec![],
            callback_depth: 1,
            host_callback_id: 17,
            begin_time: 3.25,
        },
        ActionOp::CallExistingFunctionEnd {
            matching_begin_time: 20,
            has_script_exception: false,
            has_terminating_exception: true,
            callback_depth: 1,
            end_time: 9.75,
        },
    ]
}

#[test]
fn test_every_action_round_trips() {
    let entries: Vec<EventLogEntry> = every_action()
        .into_iter()
        .enumerate()
        .map(|(i, op)| action(i as i64, op, LogValue::Object(LogTag(i as u64 + 10))))
        .collect();
    for format in FORMATS {
        let parsed = round_trip_entries(&entries, format);
        for (p, e) in parsed.iter().zip(&entries) {
            assert_eq!(p, e, "{:?} {:?}", format, e.kind());
        }
        assert_eq!(parsed.len(), entries.len());
    }
}

// ===== Other Events =====

fn every_event() -> Vec<EventPayload> {
    vec![
        EventPayload::Snapshot(SnapshotEventData {
            restore_log_tag: LogTag(40),
            restore_identity_tag: IdentityTag(41),
            snap: None,
        }),
        EventPayload::EventLoopYieldPoint {
            yield_id: 2,
            wall_time: 1234.5,
        },
        EventPayload::TopLevelCode { body_counter_id: 5 },
        EventPayload::Telemetry {
            message: "hello, world".to_string(),
            do_print: true,
        },
        EventPayload::Double(f64::MAX),
        EventPayload::String("Thu Jan 01 1970".to_string()),
        EventPayload::RandomSeed {
            seed0: u64::MAX,
            seed1: 1,
        },
        EventPayload::PropertyEnum {
            return_code: false,
            pid: PropertyId(0),
            attributes: 0,
            name: None,
        },
        EventPayload::SymbolCreation { pid: PropertyId(77) },
        EventPayload::WeakCollectionContains { contains: true },
        EventPayload::ExternalCbRegisterCall {
            callback_function: LogValue::Object(LogTag(8)),
            last_nested_event_time: 30,
        },
        EventPayload::ExternalCall(ExternalCallData {
            function: LogValue::Object(LogTag(9)),
            root_nesting_depth: 2,
            args: vec![LogValue::String(String::new()), LogValue::Bool(false)],
            return_value: LogValue::Number(-1.0),
            last_nested_event_time: 35,
            has_script_exception: true,
            has_terminating_exception: false,
        }),
    ]
}

#[test]
fn test_every_event_payload_round_trips() {
    let entries: Vec<EventLogEntry> = every_event()
        .into_iter()
        .enumerate()
        .map(|(i, payload)| {
            let mut entry = EventLogEntry::new(i as i64 * 3, payload);
            if i % 2 == 1 {
                entry.result_status = ResultStatus::Exception;
            }
            entry
        })
        .collect();
    for format in FORMATS {
        let parsed = round_trip_entries(&entries, format);
        assert_eq!(parsed, entries, "{:?}", format);
    }
}

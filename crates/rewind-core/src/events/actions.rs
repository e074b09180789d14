//! JsRT actions: host calls into the engine
//!
//! Each action names the script context it ran in, the operation and its
//! arguments, and the result the engine produced. Replay re-executes the
//! operation and checks the result against the recorded one.

use super::value::{emit_keyed_value, emit_value_array, parse_keyed_value, parse_value_array, LogValue};
use super::EventKind;
use crate::error::{TtdError, TtdResult};
use crate::impl_enum_tag;
use crate::serialize::{preallocation, Key, Reader, Separator, Writer};
use crate::snapshot::{LogTag, PropertyId};

/// Conversion requested by a `VarConvert` action
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum ConvertTarget {
    ToNumber = 0,
    ToBoolean = 1,
    ToString = 2,
    ToObject = 3,
}

impl_enum_tag!(ConvertTarget, "ConvertTarget", [ToNumber, ToBoolean, ToString, ToObject]);

/// Operation and arguments of a JsRT action
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum ActionOp {
    AllocateNumber {
        value: f64,
    },
    AllocateString {
        value: String,
    },
    AllocateSymbol {
        description: LogValue,
    },
    VarConvert {
        value: LogValue,
        target: ConvertTarget,
    },
    AllocateObject {
        is_external: bool,
    },
    AllocateArray {
        length: u32,
    },
    AllocateArrayBuffer {
        bytes: Vec<u8>,
    },
    AllocateFunction {
        name: Option<LogValue>,
    },
    GetAndClearException,
    GetProperty {
        object: LogValue,
        pid: PropertyId,
    },
    SetProperty {
        object: LogValue,
        pid: PropertyId,
        value: LogValue,
        use_strict: bool,
    },
    DefineProperty {
        object: LogValue,
        pid: PropertyId,
        value: LogValue,
        attributes: u8,
    },
    DeleteProperty {
        object: LogValue,
        pid: PropertyId,
        use_strict: bool,
    },
    GetPrototype {
        object: LogValue,
    },
    SetPrototype {
        object: LogValue,
        prototype: LogValue,
    },
    GetIndex {
        object: LogValue,
        index: LogValue,
    },
    SetIndex {
        object: LogValue,
        index: LogValue,
        value: LogValue,
    },
    GetTypedArrayInfo {
        object: LogValue,
        returns_buffer: bool,
    },
    ConstructCall {
        function: LogValue,
        args: Vec<LogValue>,
    },
    CallbackOp {
        is_cancel: bool,
        is_repeating: bool,
        current_callback_id: i64,
        callback_function: LogValue,
        created_callback_id: i64,
    },
    CodeParse {
        source: String,
        uri: String,
        document_id: u64,
        body_counter_id: u64,
        is_expression: bool,
    },
    CallExistingFunctionBegin {
        function: LogValue,
        args: Vec<LogValue>,
        callback_depth: i32,
        host_callback_id: i64,
        begin_time: f64,
    },
    CallExistingFunctionEnd {
        matching_begin_time: i64,
        has_script_exception: bool,
        has_terminating_exception: bool,
        callback_depth: i32,
        end_time: f64,
    },
}

impl ActionOp {
    /// Event kind this operation is logged as
    pub fn kind(&self) -> EventKind {
        match self {
            ActionOp::AllocateNumber { .. } => EventKind::AllocateNumber,
            ActionOp::AllocateString { .. } => EventKind::AllocateString,
            ActionOp::AllocateSymbol { .. } => EventKind::AllocateSymbol,
            ActionOp::VarConvert { .. } => EventKind::VarConvert,
            ActionOp::AllocateObject { .. } => EventKind::AllocateObject,
            ActionOp::AllocateArray { .. } => EventKind::AllocateArray,
            ActionOp::AllocateArrayBuffer { .. } => EventKind::AllocateArrayBuffer,
            ActionOp::AllocateFunction { .. } => EventKind::AllocateFunction,
            ActionOp::GetAndClearException => EventKind::GetAndClearException,
            ActionOp::GetProperty { .. } => EventKind::GetProperty,
            ActionOp::SetProperty { .. } => EventKind::SetProperty,
            ActionOp::DefineProperty { .. } => EventKind::DefineProperty,
            ActionOp::DeleteProperty { .. } => EventKind::DeleteProperty,
            ActionOp::GetPrototype { .. } => EventKind::GetPrototype,
            ActionOp::SetPrototype { .. } => EventKind::SetPrototype,
            ActionOp::GetIndex { .. } => EventKind::GetIndex,
            ActionOp::SetIndex { .. } => EventKind::SetIndex,
            ActionOp::GetTypedArrayInfo { .. } => EventKind::GetTypedArrayInfo,
            ActionOp::ConstructCall { .. } => EventKind::ConstructCall,
            ActionOp::CallbackOp { .. } => EventKind::CallbackOp,
            ActionOp::CodeParse { .. } => EventKind::CodeParse,
            ActionOp::CallExistingFunctionBegin { .. } => EventKind::CallExistingFunctionBegin,
            ActionOp::CallExistingFunctionEnd { .. } => EventKind::CallExistingFunctionEnd,
        }
    }
}

/// A host call into the engine
#[derive(Debug, Clone, PartialEq)]
pub struct JsRtAction {
    /// Script context the action ran in
    pub context_tag: LogTag,
    /// Operation and arguments
    pub op: ActionOp,
    /// Value handed back to the host
    pub result: LogValue,
}

impl JsRtAction {
    /// Action with an undefined result, to be completed after execution
    pub fn new(context_tag: LogTag, op: ActionOp) -> Self {
        Self {
            context_tag,
            op,
            result: LogValue::Undefined,
        }
    }

    /// True for the begin of a call made directly by the host loop
    pub fn is_root_call_begin(&self) -> bool {
        matches!(
            self.op,
            ActionOp::CallExistingFunctionBegin { callback_depth: 0, .. }
        )
    }

    /// True for the end of a call made directly by the host loop
    pub fn is_root_call_end(&self) -> bool {
        matches!(
            self.op,
            ActionOp::CallExistingFunctionEnd { callback_depth: 0, .. }
        )
    }

    pub(crate) fn emit_fields(&self, w: &mut dyn Writer) -> TtdResult<()> {
        w.write_uint64(Key::ContextTag, self.context_tag.0, Separator::Comma)?;
        match &self.op {
            ActionOp::AllocateNumber { value } => {
                w.write_double(Key::DoubleVal, *value, Separator::Comma)?;
            }
            ActionOp::AllocateString { value } => {
                w.write_string(Key::StringVal, value, Separator::Comma)?;
            }
            ActionOp::AllocateSymbol { description } => {
                emit_keyed_value(w, Key::Value, description, Separator::Comma)?;
            }
            ActionOp::VarConvert { value, target } => {
                emit_keyed_value(w, Key::Value, value, Separator::Comma)?;
                w.write_tag(Key::ConvertTarget, *target, Separator::Comma)?;
            }
            ActionOp::AllocateObject { is_external } => {
                w.write_bool(Key::IsExternal, *is_external, Separator::Comma)?;
            }
            ActionOp::AllocateArray { length } => {
                w.write_uint32(Key::Length, *length, Separator::Comma)?;
            }
            ActionOp::AllocateArrayBuffer { bytes } => {
                w.write_record_start_named(Key::Bytes, Separator::Comma)?;
                w.write_length_value(bytes.len() as u32, Separator::None)?;
                w.write_sequence_start_default_key(Separator::Comma)?;
                for (i, b) in bytes.iter().enumerate() {
                    w.write_naked_byte(*b, Separator::comma_if(i != 0))?;
                }
                w.write_sequence_end(Separator::None)?;
                w.write_record_end(Separator::None)?;
            }
            ActionOp::AllocateFunction { name } => {
                w.write_bool(Key::IsNamed, name.is_some(), Separator::Comma)?;
                if let Some(name) = name {
                    emit_keyed_value(w, Key::Name, name, Separator::Comma)?;
                }
            }
            ActionOp::GetAndClearException => {}
            ActionOp::GetProperty { object, pid } => {
                emit_keyed_value(w, Key::Object, object, Separator::Comma)?;
                w.write_uint32(Key::PropertyId, pid.0, Separator::Comma)?;
            }
            ActionOp::SetProperty {
                object,
                pid,
                value,
                use_strict,
            } => {
                emit_keyed_value(w, Key::Object, object, Separator::Comma)?;
                w.write_uint32(Key::PropertyId, pid.0, Separator::Comma)?;
                emit_keyed_value(w, Key::Value, value, Separator::Comma)?;
                w.write_bool(Key::UseStrict, *use_strict, Separator::Comma)?;
            }
            ActionOp::DefineProperty {
                object,
                pid,
                value,
                attributes,
            } => {
                emit_keyed_value(w, Key::Object, object, Separator::Comma)?;
                w.write_uint32(Key::PropertyId, pid.0, Separator::Comma)?;
                emit_keyed_value(w, Key::Value, value, Separator::Comma)?;
                w.write_byte(Key::Attributes, *attributes, Separator::Comma)?;
            }
            ActionOp::DeleteProperty {
                object,
                pid,
                use_strict,
            } => {
                emit_keyed_value(w, Key::Object, object, Separator::Comma)?;
                w.write_uint32(Key::PropertyId, pid.0, Separator::Comma)?;
                w.write_bool(Key::UseStrict, *use_strict, Separator::Comma)?;
            }
            ActionOp::GetPrototype { object } => {
                emit_keyed_value(w, Key::Object, object, Separator::Comma)?;
            }
            ActionOp::SetPrototype { object, prototype } => {
                emit_keyed_value(w, Key::Object, object, Separator::Comma)?;
                emit_keyed_value(w, Key::Prototype, prototype, Separator::Comma)?;
            }
            ActionOp::GetIndex { object, index } => {
                emit_keyed_value(w, Key::Object, object, Separator::Comma)?;
                emit_keyed_value(w, Key::Index, index, Separator::Comma)?;
            }
            ActionOp::SetIndex { object, index, value } => {
                emit_keyed_value(w, Key::Object, object, Separator::Comma)?;
                emit_keyed_value(w, Key::Index, index, Separator::Comma)?;
                emit_keyed_value(w, Key::Value, value, Separator::Comma)?;
            }
            ActionOp::GetTypedArrayInfo {
                object,
                returns_buffer,
            } => {
                emit_keyed_value(w, Key::Object, object, Separator::Comma)?;
                w.write_bool(Key::Buffer, *returns_buffer, Separator::Comma)?;
            }
            ActionOp::ConstructCall { function, args } => {
                emit_keyed_value(w, Key::Function, function, Separator::Comma)?;
                emit_value_array(w, Key::Arguments, args, Separator::Comma)?;
            }
            ActionOp::CallbackOp {
                is_cancel,
                is_repeating,
                current_callback_id,
                callback_function,
                created_callback_id,
            } => {
                w.write_bool(Key::IsCancel, *is_cancel, Separator::Comma)?;
                w.write_bool(Key::IsRepeating, *is_repeating, Separator::Comma)?;
                w.write_int64(Key::CurrentCallbackId, *current_callback_id, Separator::Comma)?;
                emit_keyed_value(w, Key::CallbackFunction, callback_function, Separator::Comma)?;
                w.write_int64(Key::CreatedCallbackId, *created_callback_id, Separator::Comma)?;
            }
            ActionOp::CodeParse {
                source,
                uri,
                document_id,
                body_counter_id,
                is_expression,
            } => {
                w.write_string(Key::SourceCode, source, Separator::Comma)?;
                w.write_string(Key::Uri, uri, Separator::Comma)?;
                w.write_uint64(Key::DocumentId, *document_id, Separator::Comma)?;
                w.write_uint64(Key::BodyCounterId, *body_counter_id, Separator::Comma)?;
                w.write_bool(Key::IsExpression, *is_expression, Separator::Comma)?;
            }
            ActionOp::CallExistingFunctionBegin {
                function,
                args,
                callback_depth,
                host_callback_id,
                begin_time,
            } => {
                emit_keyed_value(w, Key::Function, function, Separator::Comma)?;
                emit_value_array(w, Key::Arguments, args, Separator::Comma)?;
                w.write_int32(Key::RootNestingDepth, *callback_depth, Separator::Comma)?;
                w.write_int64(Key::HostCallbackId, *host_callback_id, Separator::Comma)?;
                w.write_double(Key::BeginTime, *begin_time, Separator::Comma)?;
            }
            ActionOp::CallExistingFunctionEnd {
                matching_begin_time,
                has_script_exception,
                has_terminating_exception,
                callback_depth,
                end_time,
            } => {
                w.write_int64(Key::MatchingBeginTime, *matching_begin_time, Separator::Comma)?;
                w.write_bool(Key::HasScriptException, *has_script_exception, Separator::Comma)?;
                w.write_bool(
                    Key::HasTerminatingException,
                    *has_terminating_exception,
                    Separator::Comma,
                )?;
                w.write_int32(Key::RootNestingDepth, *callback_depth, Separator::Comma)?;
                w.write_double(Key::EndTime, *end_time, Separator::Comma)?;
            }
        }
        emit_keyed_value(w, Key::Result, &self.result, Separator::Comma)
    }

    pub(crate) fn parse_fields(kind: EventKind, r: &mut dyn Reader) -> TtdResult<Self> {
        let context_tag = LogTag(r.read_uint64(Key::ContextTag, true)?);
        let op = match kind {
            EventKind::AllocateNumber => ActionOp::AllocateNumber {
                value: r.read_double(Key::DoubleVal, true)?,
            },
            EventKind::AllocateString => ActionOp::AllocateString {
                value: r.read_string(Key::StringVal, true)?,
            },
            EventKind::AllocateSymbol => ActionOp::AllocateSymbol {
                description: parse_keyed_value(r, Key::Value, true)?,
            },
            EventKind::VarConvert => ActionOp::VarConvert {
                value: parse_keyed_value(r, Key::Value, true)?,
                target: r.read_tag(Key::ConvertTarget, true)?,
            },
            EventKind::AllocateObject => ActionOp::AllocateObject {
                is_external: r.read_bool(Key::IsExternal, true)?,
            },
            EventKind::AllocateArray => ActionOp::AllocateArray {
                length: r.read_uint32(Key::Length, true)?,
            },
            EventKind::AllocateArrayBuffer => {
                r.read_record_start_named(Key::Bytes, true)?;
                let count = r.read_length_value(false)?;
                r.read_sequence_start_default_key(true)?;
                let mut bytes = Vec::with_capacity(preallocation(count));
                for i in 0..count {
                    bytes.push(r.read_naked_byte(i != 0)?);
                }
                r.read_sequence_end()?;
                r.read_record_end()?;
                ActionOp::AllocateArrayBuffer { bytes }
            }
            EventKind::AllocateFunction => {
                let name = if r.read_bool(Key::IsNamed, true)? {
                    Some(parse_keyed_value(r, Key::Name, true)?)
                } else {
                    None
                };
                ActionOp::AllocateFunction { name }
            }
            EventKind::GetAndClearException => ActionOp::GetAndClearException,
            EventKind::GetProperty => ActionOp::GetProperty {
                object: parse_keyed_value(r, Key::Object, true)?,
                pid: PropertyId(r.read_uint32(Key::PropertyId, true)?),
            },
            EventKind::SetProperty => ActionOp::SetProperty {
                object: parse_keyed_value(r, Key::Object, true)?,
                pid: PropertyId(r.read_uint32(Key::PropertyId, true)?),
                value: parse_keyed_value(r, Key::Value, true)?,
                use_strict: r.read_bool(Key::UseStrict, true)?,
            },
            EventKind::DefineProperty => ActionOp::DefineProperty {
                object: parse_keyed_value(r, Key::Object, true)?,
                pid: PropertyId(r.read_uint32(Key::PropertyId, true)?),
                value: parse_keyed_value(r, Key::Value, true)?,
                attributes: r.read_byte(Key::Attributes, true)?,
            },
            EventKind::DeleteProperty => ActionOp::DeleteProperty {
                object: parse_keyed_value(r, Key::Object, true)?,
                pid: PropertyId(r.read_uint32(Key::PropertyId, true)?),
                use_strict: r.read_bool(Key::UseStrict, true)?,
            },
            EventKind::GetPrototype => ActionOp::GetPrototype {
                object: parse_keyed_value(r, Key::Object, true)?,
            },
            EventKind::SetPrototype => ActionOp::SetPrototype {
                object: parse_keyed_value(r, Key::Object, true)?,
                prototype: parse_keyed_value(r, Key::Prototype, true)?,
            },
            EventKind::GetIndex => ActionOp::GetIndex {
                object: parse_keyed_value(r, Key::Object, true)?,
                index: parse_keyed_value(r, Key::Index, true)?,
            },
            EventKind::SetIndex => ActionOp::SetIndex {
                object: parse_keyed_value(r, Key::Object, true)?,
                index: parse_keyed_value(r, Key::Index, true)?,
                value: parse_keyed_value(r, Key::Value, true)?,
            },
            EventKind::GetTypedArrayInfo => ActionOp::GetTypedArrayInfo {
                object: parse_keyed_value(r, Key::Object, true)?,
                returns_buffer: r.read_bool(Key::Buffer, true)?,
            },
            EventKind::ConstructCall => ActionOp::ConstructCall {
                function: parse_keyed_value(r, Key::Function, true)?,
                args: parse_value_array(r, Key::Arguments, true)?,
            },
            EventKind::CallbackOp => ActionOp::CallbackOp {
                is_cancel: r.read_bool(Key::IsCancel, true)?,
                is_repeating: r.read_bool(Key::IsRepeating, true)?,
                current_callback_id: r.read_int64(Key::CurrentCallbackId, true)?,
                callback_function: parse_keyed_value(r, Key::CallbackFunction, true)?,
                created_callback_id: r.read_int64(Key::CreatedCallbackId, true)?,
            },
            EventKind::CodeParse => ActionOp::CodeParse {
                source: r.read_string(Key::SourceCode, true)?,
                uri: r.read_string(Key::Uri, true)?,
                document_id: r.read_uint64(Key::DocumentId, true)?,
                body_counter_id: r.read_uint64(Key::BodyCounterId, true)?,
                is_expression: r.read_bool(Key::IsExpression, true)?,
            },
            EventKind::CallExistingFunctionBegin => ActionOp::CallExistingFunctionBegin {
                function: parse_keyed_value(r, Key::Function, true)?,
                args: parse_value_array(r, Key::Arguments, true)?,
                callback_depth: r.read_int32(Key::RootNestingDepth, true)?,
                host_callback_id: r.read_int64(Key::HostCallbackId, true)?,
                begin_time: r.read_double(Key::BeginTime, true)?,
            },
            EventKind::CallExistingFunctionEnd => ActionOp::CallExistingFunctionEnd {
                matching_begin_time: r.read_int64(Key::MatchingBeginTime, true)?,
                has_script_exception: r.read_bool(Key::HasScriptException, true)?,
                has_terminating_exception: r.read_bool(Key::HasTerminatingException, true)?,
                callback_depth: r.read_int32(Key::RootNestingDepth, true)?,
                end_time: r.read_double(Key::EndTime, true)?,
            },
            other => {
                return Err(TtdError::UnknownDiscriminant {
                    what: "JsRT action",
                    value: other as u64,
                })
            }
        };
        let result = parse_keyed_value(r, Key::Result, true)?;
        Ok(Self {
            context_tag,
            op,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_kinds() {
        let op = ActionOp::SetProperty {
            object: LogValue::Object(LogTag(3)),
            pid: PropertyId(9),
            value: LogValue::Number(1.0),
            use_strict: false,
        };
        assert_eq!(op.kind(), EventKind::SetProperty);
        assert!(op.kind().is_action());
        assert_eq!(ActionOp::GetAndClearException.kind(), EventKind::GetAndClearException);
    }

    #[test]
    fn test_root_call_detection() {
        let begin = JsRtAction::new(
            LogTag(1),
            ActionOp::CallExistingFunctionBegin {
                function: LogValue::Object(LogTag(4)),
                args: vec![],
                callback_depth: 0,
                host_callback_id: -1,
                begin_time: 0.0,
            },
        );
        assert!(begin.is_root_call_begin());
        assert!(!begin.is_root_call_end());

        let nested_end = JsRtAction::new(
            LogTag(1),
            ActionOp::CallExistingFunctionEnd {
                matching_begin_time: 2,
                has_script_exception: false,
                has_terminating_exception: false,
                callback_depth: 1,
                end_time: 1.0,
            },
        );
        assert!(!nested_end.is_root_call_end());
    }
}

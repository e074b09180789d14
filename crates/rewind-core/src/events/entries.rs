//! Kind-specific entry data

use super::actions::JsRtAction;
use super::value::{emit_keyed_value, emit_value_array, parse_keyed_value, parse_value_array, LogValue};
use super::EventKind;
use crate::error::TtdResult;
use crate::serialize::{Key, Reader, Separator, Writer};
use crate::snapshot::{IdentityTag, LogTag, PropertyId, SnapShot};

/// A snapshot taken between two events
///
/// The snapshot itself lives in its own stream; the entry carries it only
/// while it is loaded.
#[derive(Debug, Clone, Default)]
pub struct SnapshotEventData {
    /// Next log tag to hand out after restoring
    pub restore_log_tag: LogTag,
    /// Next identity tag to hand out after restoring
    pub restore_identity_tag: IdentityTag,
    /// Loaded snapshot
    pub snap: Option<Box<SnapShot>>,
}

impl PartialEq for SnapshotEventData {
    fn eq(&self, other: &Self) -> bool {
        self.restore_log_tag == other.restore_log_tag
            && self.restore_identity_tag == other.restore_identity_tag
    }
}

/// A call from script into a host function
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExternalCallData {
    /// Function called
    pub function: LogValue,
    /// Nesting depth below the root call
    pub root_nesting_depth: i32,
    /// Arguments
    pub args: Vec<LogValue>,
    /// Returned value
    pub return_value: LogValue,
    /// Time of the last event logged while the host function ran
    pub last_nested_event_time: i64,
    /// The host function threw
    pub has_script_exception: bool,
    /// The host function terminated the script
    pub has_terminating_exception: bool,
}

/// Data of one event
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum EventPayload {
    Snapshot(SnapshotEventData),
    EventLoopYieldPoint {
        yield_id: u64,
        wall_time: f64,
    },
    TopLevelCode {
        body_counter_id: u64,
    },
    Telemetry {
        message: String,
        do_print: bool,
    },
    Double(f64),
    String(String),
    RandomSeed {
        seed0: u64,
        seed1: u64,
    },
    PropertyEnum {
        return_code: bool,
        pid: PropertyId,
        attributes: u8,
        name: Option<String>,
    },
    SymbolCreation {
        pid: PropertyId,
    },
    WeakCollectionContains {
        contains: bool,
    },
    ExternalCbRegisterCall {
        callback_function: LogValue,
        last_nested_event_time: i64,
    },
    ExternalCall(ExternalCallData),
    Action(JsRtAction),
}

impl EventPayload {
    /// Event kind of this payload
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Snapshot(_) => EventKind::Snapshot,
            EventPayload::EventLoopYieldPoint { .. } => EventKind::EventLoopYieldPoint,
            EventPayload::TopLevelCode { .. } => EventKind::TopLevelCode,
            EventPayload::Telemetry { .. } => EventKind::Telemetry,
            EventPayload::Double(_) => EventKind::Double,
            EventPayload::String(_) => EventKind::String,
            EventPayload::RandomSeed { .. } => EventKind::RandomSeed,
            EventPayload::PropertyEnum { .. } => EventKind::PropertyEnum,
            EventPayload::SymbolCreation { .. } => EventKind::SymbolCreation,
            EventPayload::WeakCollectionContains { .. } => EventKind::WeakCollectionContains,
            EventPayload::ExternalCbRegisterCall { .. } => EventKind::ExternalCbRegisterCall,
            EventPayload::ExternalCall(_) => EventKind::ExternalCall,
            EventPayload::Action(action) => action.op.kind(),
        }
    }

    pub(crate) fn emit_fields(&self, w: &mut dyn Writer) -> TtdResult<()> {
        match self {
            EventPayload::Snapshot(data) => {
                w.write_uint64(Key::RestoreLogTag, data.restore_log_tag.0, Separator::Comma)?;
                w.write_uint64(Key::RestoreIdentityTag, data.restore_identity_tag.0, Separator::Comma)?;
            }
            EventPayload::EventLoopYieldPoint { yield_id, wall_time } => {
                w.write_uint64(Key::YieldId, *yield_id, Separator::Comma)?;
                w.write_double(Key::WallTime, *wall_time, Separator::Comma)?;
            }
            EventPayload::TopLevelCode { body_counter_id } => {
                w.write_uint64(Key::BodyCounterId, *body_counter_id, Separator::Comma)?;
            }
            EventPayload::Telemetry { message, do_print } => {
                w.write_string(Key::Message, message, Separator::Comma)?;
                w.write_bool(Key::DoPrint, *do_print, Separator::Comma)?;
            }
            EventPayload::Double(v) => w.write_double(Key::DoubleVal, *v, Separator::Comma)?,
            EventPayload::String(s) => w.write_string(Key::StringVal, s, Separator::Comma)?,
            EventPayload::RandomSeed { seed0, seed1 } => {
                w.write_uint64(Key::Seed0, *seed0, Separator::Comma)?;
                w.write_uint64(Key::Seed1, *seed1, Separator::Comma)?;
            }
            EventPayload::PropertyEnum {
                return_code,
                pid,
                attributes,
                name,
            } => {
                w.write_bool(Key::ReturnCode, *return_code, Separator::Comma)?;
                w.write_uint32(Key::PropertyId, pid.0, Separator::Comma)?;
                w.write_byte(Key::Attributes, *attributes, Separator::Comma)?;
                w.write_opt_string(Key::Name, name.as_deref(), Separator::Comma)?;
            }
            EventPayload::SymbolCreation { pid } => {
                w.write_uint32(Key::PropertyId, pid.0, Separator::Comma)?;
            }
            EventPayload::WeakCollectionContains { contains } => {
                w.write_bool(Key::BoolVal, *contains, Separator::Comma)?;
            }
            EventPayload::ExternalCbRegisterCall {
                callback_function,
                last_nested_event_time,
            } => {
                emit_keyed_value(w, Key::CallbackFunction, callback_function, Separator::Comma)?;
                w.write_int64(Key::LastNestedEventTime, *last_nested_event_time, Separator::Comma)?;
            }
            EventPayload::ExternalCall(call) => {
                emit_keyed_value(w, Key::Function, &call.function, Separator::Comma)?;
                w.write_int32(Key::RootNestingDepth, call.root_nesting_depth, Separator::Comma)?;
                emit_value_array(w, Key::Arguments, &call.args, Separator::Comma)?;
                emit_keyed_value(w, Key::ReturnValue, &call.return_value, Separator::Comma)?;
                w.write_int64(Key::LastNestedEventTime, call.last_nested_event_time, Separator::Comma)?;
                w.write_bool(Key::HasScriptException, call.has_script_exception, Separator::Comma)?;
                w.write_bool(
                    Key::HasTerminatingException,
                    call.has_terminating_exception,
                    Separator::Comma,
                )?;
            }
            EventPayload::Action(action) => action.emit_fields(w)?,
        }
        Ok(())
    }

    pub(crate) fn parse_fields(kind: EventKind, r: &mut dyn Reader) -> TtdResult<Self> {
        Ok(match kind {
            EventKind::Snapshot => EventPayload::Snapshot(SnapshotEventData {
                restore_log_tag: LogTag(r.read_uint64(Key::RestoreLogTag, true)?),
                restore_identity_tag: IdentityTag(r.read_uint64(Key::RestoreIdentityTag, true)?),
                snap: None,
            }),
            EventKind::EventLoopYieldPoint => EventPayload::EventLoopYieldPoint {
                yield_id: r.read_uint64(Key::YieldId, true)?,
                wall_time: r.read_double(Key::WallTime, true)?,
            },
            EventKind::TopLevelCode => EventPayload::TopLevelCode {
                body_counter_id: r.read_uint64(Key::BodyCounterId, true)?,
            },
            EventKind::Telemetry => EventPayload::Telemetry {
                message: r.read_string(Key::Message, true)?,
                do_print: r.read_bool(Key::DoPrint, true)?,
            },
            EventKind::Double => EventPayload::Double(r.read_double(Key::DoubleVal, true)?),
            EventKind::String => EventPayload::String(r.read_string(Key::StringVal, true)?),
            EventKind::RandomSeed => EventPayload::RandomSeed {
                seed0: r.read_uint64(Key::Seed0, true)?,
                seed1: r.read_uint64(Key::Seed1, true)?,
            },
            EventKind::PropertyEnum => EventPayload::PropertyEnum {
                return_code: r.read_bool(Key::ReturnCode, true)?,
                pid: PropertyId(r.read_uint32(Key::PropertyId, true)?),
                attributes: r.read_byte(Key::Attributes, true)?,
                name: r.read_opt_string(Key::Name, true)?,
            },
            EventKind::SymbolCreation => EventPayload::SymbolCreation {
                pid: PropertyId(r.read_uint32(Key::PropertyId, true)?),
            },
            EventKind::WeakCollectionContains => EventPayload::WeakCollectionContains {
                contains: r.read_bool(Key::BoolVal, true)?,
            },
            EventKind::ExternalCbRegisterCall => EventPayload::ExternalCbRegisterCall {
                callback_function: parse_keyed_value(r, Key::CallbackFunction, true)?,
                last_nested_event_time: r.read_int64(Key::LastNestedEventTime, true)?,
            },
            EventKind::ExternalCall => EventPayload::ExternalCall(ExternalCallData {
                function: parse_keyed_value(r, Key::Function, true)?,
                root_nesting_depth: r.read_int32(Key::RootNestingDepth, true)?,
                args: parse_value_array(r, Key::Arguments, true)?,
                return_value: parse_keyed_value(r, Key::ReturnValue, true)?,
                last_nested_event_time: r.read_int64(Key::LastNestedEventTime, true)?,
                has_script_exception: r.read_bool(Key::HasScriptException, true)?,
                has_terminating_exception: r.read_bool(Key::HasTerminatingException, true)?,
            }),
            action => EventPayload::Action(JsRtAction::parse_fields(action, r)?),
        })
    }
}

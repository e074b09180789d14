//! Event log entries
//!
//! Every operation whose outcome the engine cannot reproduce on its own is
//! logged as one [`EventLogEntry`], stamped with a strictly increasing event
//! time. An entry is written as one record: kind tag, time, result status,
//! the optional diagnostics record, then kind-specific fields.

pub mod actions;
pub mod entries;
pub mod value;

pub use actions::{ActionOp, ConvertTarget, JsRtAction};
pub use entries::{EventPayload, ExternalCallData, SnapshotEventData};
pub use value::LogValue;

use crate::error::TtdResult;
use crate::impl_enum_tag;
use crate::serialize::{Key, Reader, Separator, Writer};
use once_cell::sync::OnceCell;

/// Kind of a logged event
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum EventKind {
    Snapshot = 0,
    EventLoopYieldPoint = 1,
    TopLevelCode = 2,
    Telemetry = 3,
    Double = 4,
    String = 5,
    RandomSeed = 6,
    PropertyEnum = 7,
    SymbolCreation = 8,
    WeakCollectionContains = 9,
    ExternalCbRegisterCall = 10,
    ExternalCall = 11,
    AllocateNumber = 12,
    AllocateString = 13,
    AllocateSymbol = 14,
    VarConvert = 15,
    AllocateObject = 16,
    AllocateArray = 17,
    AllocateArrayBuffer = 18,
    AllocateFunction = 19,
    GetAndClearException = 20,
    GetProperty = 21,
    SetProperty = 22,
    DefineProperty = 23,
    DeleteProperty = 24,
    GetPrototype = 25,
    SetPrototype = 26,
    GetIndex = 27,
    SetIndex = 28,
    GetTypedArrayInfo = 29,
    ConstructCall = 30,
    CallbackOp = 31,
    CodeParse = 32,
    CallExistingFunctionBegin = 33,
    CallExistingFunctionEnd = 34,
}

impl_enum_tag!(
    EventKind,
    "EventKind",
    [
        Snapshot,
        EventLoopYieldPoint,
        TopLevelCode,
        Telemetry,
        Double,
        String,
        RandomSeed,
        PropertyEnum,
        SymbolCreation,
        WeakCollectionContains,
        ExternalCbRegisterCall,
        ExternalCall,
        AllocateNumber,
        AllocateString,
        AllocateSymbol,
        VarConvert,
        AllocateObject,
        AllocateArray,
        AllocateArrayBuffer,
        AllocateFunction,
        GetAndClearException,
        GetProperty,
        SetProperty,
        DefineProperty,
        DeleteProperty,
        GetPrototype,
        SetPrototype,
        GetIndex,
        SetIndex,
        GetTypedArrayInfo,
        ConstructCall,
        CallbackOp,
        CodeParse,
        CallExistingFunctionBegin,
        CallExistingFunctionEnd,
    ]
);

impl EventKind {
    /// True for JsRT actions, which the replay host re-executes
    pub fn is_action(self) -> bool {
        self >= EventKind::AllocateNumber
    }

    /// True for entries the host loop consumes directly during replay
    pub fn is_root(self) -> bool {
        matches!(
            self,
            EventKind::Snapshot | EventKind::EventLoopYieldPoint | EventKind::TopLevelCode | EventKind::Telemetry
        ) || self.is_action()
    }
}

/// How a logged operation completed
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultStatus {
    /// Returned normally
    #[default]
    Normal = 0,
    /// Threw a script exception
    Exception = 1,
    /// Unwound without returning
    DoesNotReturn = 2,
    /// Failed inside the runtime
    RuntimeError = 3,
    /// Recorded but not completed yet
    Pending = 4,
}

impl_enum_tag!(
    ResultStatus,
    "ResultStatus",
    [Normal, Exception, DoesNotReturn, RuntimeError, Pending]
);

/// Position in a script source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    /// Zero-based line
    pub line: u32,
    /// Zero-based column
    pub column: u32,
    /// Document the position is in
    pub source_id: u64,
}

/// Debugger data filled in after the entry is written
///
/// Each field is set at most once; the entry itself stays immutable.
#[derive(Debug, Clone, Default)]
pub struct EntryDiagnostics {
    label: OnceCell<String>,
    location: OnceCell<SourceLocation>,
}

impl EntryDiagnostics {
    /// Function name of a call, or registration site label of a callback
    pub fn label(&self) -> Option<&str> {
        self.label.get().map(String::as_str)
    }

    /// Set the label; returns false if it was already set
    pub fn set_label(&self, label: impl Into<String>) -> bool {
        self.label.set(label.into()).is_ok()
    }

    /// Last executed or registration source location
    pub fn location(&self) -> Option<SourceLocation> {
        self.location.get().copied()
    }

    /// Set the location; returns false if it was already set
    pub fn set_location(&self, location: SourceLocation) -> bool {
        self.location.set(location).is_ok()
    }

    fn emit(&self, w: &mut dyn Writer) -> TtdResult<()> {
        w.write_record_start_named(Key::Diagnostics, Separator::Comma)?;
        w.write_opt_string(Key::Name, self.label(), Separator::None)?;
        match self.location() {
            Some(loc) => {
                w.write_bool(Key::HasLocation, true, Separator::Comma)?;
                w.write_uint32(Key::Line, loc.line, Separator::Comma)?;
                w.write_uint32(Key::Column, loc.column, Separator::Comma)?;
                w.write_uint64(Key::SourceId, loc.source_id, Separator::Comma)?;
            }
            None => w.write_bool(Key::HasLocation, false, Separator::Comma)?,
        }
        w.write_record_end(Separator::None)
    }

    fn parse(r: &mut dyn Reader) -> TtdResult<Self> {
        r.read_record_start_named(Key::Diagnostics, true)?;
        let diag = EntryDiagnostics::default();
        if let Some(label) = r.read_opt_string(Key::Name, false)? {
            diag.set_label(label);
        }
        if r.read_bool(Key::HasLocation, true)? {
            diag.set_location(SourceLocation {
                line: r.read_uint32(Key::Line, true)?,
                column: r.read_uint32(Key::Column, true)?,
                source_id: r.read_uint64(Key::SourceId, true)?,
            });
        }
        r.read_record_end()?;
        Ok(diag)
    }
}

impl PartialEq for EntryDiagnostics {
    fn eq(&self, other: &Self) -> bool {
        self.label() == other.label() && self.location() == other.location()
    }
}

/// One logged event
#[derive(Debug, Clone, PartialEq)]
pub struct EventLogEntry {
    /// Position in the total order
    pub event_time: i64,
    /// Completion status
    pub result_status: ResultStatus,
    /// Lazily filled debugger data
    pub diagnostics: EntryDiagnostics,
    /// Kind-specific data
    pub payload: EventPayload,
}

impl EventLogEntry {
    /// Entry at `event_time` with normal status
    pub fn new(event_time: i64, payload: EventPayload) -> Self {
        Self {
            event_time,
            result_status: ResultStatus::Normal,
            diagnostics: EntryDiagnostics::default(),
            payload,
        }
    }

    /// Kind of this entry
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Action data, if this is a JsRT action
    pub fn action(&self) -> Option<&JsRtAction> {
        match &self.payload {
            EventPayload::Action(action) => Some(action),
            _ => None,
        }
    }

    /// Serialize; the diagnostics record is written only when `diagnostics` is set
    pub fn emit(&self, w: &mut dyn Writer, sep: Separator, diagnostics: bool) -> TtdResult<()> {
        w.write_record_start(sep)?;
        w.adjust_indent(1);
        w.write_tag(Key::EventKind, self.kind(), Separator::None)?;
        w.write_int64(Key::EventTime, self.event_time, Separator::Comma)?;
        w.write_tag(Key::ResultStatus, self.result_status, Separator::Comma)?;
        if diagnostics {
            self.diagnostics.emit(w)?;
        }
        self.payload.emit_fields(w)?;
        w.adjust_indent(-1);
        w.write_record_end(Separator::BigSpace)
    }

    /// Deserialize an entry written with the same `diagnostics` setting
    pub fn parse(r: &mut dyn Reader, read_sep: bool, diagnostics: bool) -> TtdResult<Self> {
        r.read_record_start(read_sep)?;
        let kind: EventKind = r.read_tag(Key::EventKind, false)?;
        let event_time = r.read_int64(Key::EventTime, true)?;
        let result_status = r.read_tag(Key::ResultStatus, true)?;
        let diagnostics = if diagnostics {
            EntryDiagnostics::parse(r)?
        } else {
            EntryDiagnostics::default()
        };
        let payload = EventPayload::parse_fields(kind, r)?;
        r.read_record_end()?;
        Ok(Self {
            event_time,
            result_status,
            diagnostics,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::{open_reader, open_writer, Format, MemoryStreams, StreamProvider};
    use crate::snapshot::{LogTag, PropertyId};

    fn round_trip(entries: &[EventLogEntry], format: Format, diagnostics: bool) -> Vec<EventLogEntry> {
        let streams = MemoryStreams::new();
        let mut w = open_writer(format, streams.open_write("e").unwrap(), 128).unwrap();
        for (i, e) in entries.iter().enumerate() {
            e.emit(&mut *w, Separator::big_comma_if(i != 0), diagnostics).unwrap();
        }
        w.flush_and_close().unwrap();

        let mut r = open_reader(format, streams.open_read("e").unwrap(), 128).unwrap();
        let parsed = (0..entries.len())
            .map(|i| EventLogEntry::parse(&mut *r, i != 0, diagnostics).unwrap())
            .collect();
        r.close().unwrap();
        parsed
    }

    fn sample_entries() -> Vec<EventLogEntry> {
        let mut call_end = EventLogEntry::new(
            4,
            EventPayload::Action(JsRtAction::new(
                LogTag(1),
                ActionOp::CallExistingFunctionEnd {
                    matching_begin_time: 2,
                    has_script_exception: true,
                    has_terminating_exception: false,
                    callback_depth: 0,
                    end_time: 12.25,
                },
            )),
        );
        call_end.result_status = ResultStatus::Exception;
        call_end.diagnostics.set_location(SourceLocation {
            line: 3,
            column: 9,
            source_id: 1,
        });

        let begin = EventLogEntry::new(
            2,
            EventPayload::Action(JsRtAction {
                context_tag: LogTag(1),
                op: ActionOp::CallExistingFunctionBegin {
                    function: LogValue::Object(LogTag(6)),
                    args: vec![LogValue::Number(1.0), LogValue::String("x".into())],
                    callback_depth: 0,
                    host_callback_id: -1,
                    begin_time: 10.5,
                },
                result: LogValue::Undefined,
            }),
        );
        begin.diagnostics.set_label("onTick");

        vec![
            EventLogEntry::new(0, EventPayload::RandomSeed { seed0: 7, seed1: 11 }),
            EventLogEntry::new(
                1,
                EventPayload::PropertyEnum {
                    return_code: true,
                    pid: PropertyId(4),
                    attributes: 3,
                    name: Some("length".into()),
                },
            ),
            begin,
            EventLogEntry::new(3, EventPayload::Double(0.25)),
            call_end,
        ]
    }

    #[test]
    fn test_entries_round_trip_both_formats() {
        let entries = sample_entries();
        for format in [Format::Text, Format::Binary] {
            for diagnostics in [false, true] {
                let parsed = round_trip(&entries, format, diagnostics);
                if diagnostics {
                    assert_eq!(parsed, entries, "{:?}", format);
                } else {
                    for (p, e) in parsed.iter().zip(&entries) {
                        assert_eq!(p.payload, e.payload);
                        assert_eq!(p.result_status, e.result_status);
                        assert_eq!(p.diagnostics.label(), None);
                    }
                }
            }
        }
    }

    #[test]
    fn test_diagnostics_set_once() {
        let diag = EntryDiagnostics::default();
        assert!(diag.set_label("f"));
        assert!(!diag.set_label("g"));
        assert_eq!(diag.label(), Some("f"));
        assert_eq!(diag.location(), None);
    }

    #[test]
    fn test_kind_classification() {
        assert!(EventKind::SetProperty.is_action());
        assert!(!EventKind::ExternalCall.is_action());
        assert!(EventKind::TopLevelCode.is_root());
        assert!(!EventKind::Double.is_root());
    }
}

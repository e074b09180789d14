//! Writing and reading a log container
//!
//! A container holds `ttdlog.log` (header, top-level scripts, every entry)
//! and one `snap_<time>.snp` stream per loaded snapshot.

use super::EventLog;
use crate::error::{TtdError, TtdResult};
use crate::events::{EventLogEntry, EventPayload};
use crate::serialize::{
    open_reader_detect, open_writer, snapshot_stream_name, Format, Key, Reader, Separator,
    StreamProvider, LOG_STREAM_NAME,
};
use crate::snapshot::{
    emit_table, parse_table, SnapShot, TopLevelEval, TopLevelNewFunction, TopLevelScriptLoad,
    TopLevelScripts,
};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Header of a persisted log
#[derive(Debug, Clone, PartialEq)]
pub struct LogHeader {
    /// CPU architecture the log was recorded on
    pub arch: String,
    /// Operating system the log was recorded on
    pub platform: String,
    /// Entries carry diagnostics records
    pub diagnostics: bool,
    /// Entry arena bytes in use when written
    pub used_memory: u64,
    /// Entry arena bytes reserved when written
    pub reserved_memory: u64,
    /// Snapshot interval used while recording
    pub snap_interval_ms: u64,
    /// Snapshot history length used while recording
    pub snap_history_length: u32,
    /// Encoding of the log stream
    pub format: Format,
    /// Number of entries
    pub event_count: usize,
}

impl EventLog {
    /// Write the log and every loaded snapshot into `provider`
    pub fn emit_log(&self, provider: &dyn StreamProvider) -> TtdResult<()> {
        let format = self.config.format;
        let buffer_size = self.config.buffer_size;
        let diagnostics = self.config.diagnostics;

        let mut w = open_writer(format, provider.open_write(LOG_STREAM_NAME)?, buffer_size)?;
        let (used, reserved) = self.entries.memory_stats();
        w.write_record_start(Separator::None)?;
        w.adjust_indent(1);
        w.write_string(Key::Arch, std::env::consts::ARCH, Separator::BigSpace)?;
        w.write_string(Key::Platform, std::env::consts::OS, Separator::Comma)?;
        w.write_bool(Key::DiagEnabled, diagnostics, Separator::Comma)?;
        w.write_uint64(Key::UsedMemory, used, Separator::Comma)?;
        w.write_uint64(Key::ReservedMemory, reserved, Separator::Comma)?;
        w.write_uint64(Key::SnapInterval, self.config.snap_interval_ms, Separator::Comma)?;
        w.write_uint32(Key::SnapHistoryLength, self.config.snap_history_length, Separator::Comma)?;

        emit_table(&mut *w, Key::ScriptLoads, &self.scripts.script_loads, TopLevelScriptLoad::emit)?;
        emit_table(&mut *w, Key::NewFunctions, &self.scripts.new_functions, TopLevelNewFunction::emit)?;
        emit_table(&mut *w, Key::Evals, &self.scripts.evals, TopLevelEval::emit)?;

        let entries: Vec<&EventLogEntry> = self.iter().collect();
        emit_table(&mut *w, Key::Events, &entries, |e, w, sep| e.emit(w, sep, diagnostics))?;
        w.adjust_indent(-1);
        w.write_record_end(Separator::BigSpace)?;
        w.flush_and_close()?;

        let mut snapshots = 0;
        for entry in &entries {
            if let EventPayload::Snapshot(data) = &entry.payload {
                if let Some(snap) = &data.snap {
                    snap.emit(provider, &snapshot_stream_name(entry.event_time), format, buffer_size)?;
                    snapshots += 1;
                }
            }
        }
        debug!(events = entries.len(), snapshots, "log written");
        Ok(())
    }

    /// Replace this log's entries and scripts with the log in `provider`
    ///
    /// Snapshots are not loaded; see [`EventLog::load_snapshots`].
    pub fn parse_log_into(&mut self, provider: &dyn StreamProvider) -> TtdResult<LogHeader> {
        if !provider.exists(LOG_STREAM_NAME) {
            return Err(TtdError::MissingStream(LOG_STREAM_NAME.to_string()));
        }
        let (format, mut r) = open_reader_detect(provider.open_read(LOG_STREAM_NAME)?, self.config.buffer_size)?;
        let (header, scripts, entries) = read_log(&mut *r, format)?;
        r.close()?;

        if header.arch != std::env::consts::ARCH {
            warn!(
                recorded = %header.arch,
                current = std::env::consts::ARCH,
                "log recorded on a different architecture"
            );
        }
        if !header.diagnostics {
            debug!("log written without diagnostics");
        }

        self.entries.clear();
        self.order = VecDeque::with_capacity(entries.len());
        for entry in entries {
            self.order.push_back(self.entries.insert(entry));
        }
        self.scripts = scripts;
        self.next_body_counter = self
            .scripts
            .script_loads
            .iter()
            .map(|s| s.info.body_counter_id)
            .chain(self.scripts.new_functions.iter().map(|s| s.info.body_counter_id))
            .chain(self.scripts.evals.iter().map(|s| s.info.body_counter_id))
            .max()
            .map_or(1, |m| m + 1);
        self.rtr_snaps.clear();
        self.last_inflate_snapshot_time = None;
        self.replay_pos = 0;
        self.event_time_ctr = self.first_event_time_in_log().unwrap_or(0);
        debug!(events = header.event_count, "log read");
        Ok(header)
    }

    /// Load the snapshot for the snapshot entry at `etime`, if not already loaded
    pub fn ensure_snapshot_loaded(&mut self, etime: i64, provider: &dyn StreamProvider) -> TtdResult<()> {
        let buffer_size = self.config.buffer_size;
        for key in &self.order {
            let Some(entry) = self.entries.get_mut(*key) else {
                continue;
            };
            if entry.event_time != etime {
                continue;
            }
            return match &mut entry.payload {
                EventPayload::Snapshot(data) => {
                    if data.snap.is_none() {
                        let snap = SnapShot::parse(provider, &snapshot_stream_name(etime), buffer_size)?;
                        data.snap = Some(Box::new(snap));
                    }
                    Ok(())
                }
                _ => Err(TtdError::MissingInflateTarget {
                    what: "snapshot",
                    id: etime.max(0) as u64,
                }),
            };
        }
        Err(TtdError::MissingInflateTarget {
            what: "snapshot",
            id: etime.max(0) as u64,
        })
    }

    /// Load every snapshot the log references
    pub fn load_snapshots(&mut self, provider: &dyn StreamProvider) -> TtdResult<usize> {
        let times = self.snapshot_times();
        for &t in &times {
            self.ensure_snapshot_loaded(t, provider)?;
        }
        Ok(times.len())
    }
}

/// Read only the header and entries of a log stream
pub fn read_log_stream(
    provider: &dyn StreamProvider,
    buffer_size: usize,
) -> TtdResult<(LogHeader, TopLevelScripts, Vec<EventLogEntry>)> {
    let (format, mut r) = open_reader_detect(provider.open_read(LOG_STREAM_NAME)?, buffer_size)?;
    let result = read_log(&mut *r, format)?;
    r.close()?;
    Ok(result)
}

fn read_log(
    r: &mut dyn Reader,
    format: Format,
) -> TtdResult<(LogHeader, TopLevelScripts, Vec<EventLogEntry>)> {
    r.read_record_start(false)?;
    let arch = r.read_string(Key::Arch, false)?;
    let platform = r.read_string(Key::Platform, true)?;
    let diagnostics = r.read_bool(Key::DiagEnabled, true)?;
    let used_memory = r.read_uint64(Key::UsedMemory, true)?;
    let reserved_memory = r.read_uint64(Key::ReservedMemory, true)?;
    let snap_interval_ms = r.read_uint64(Key::SnapInterval, true)?;
    let snap_history_length = r.read_uint32(Key::SnapHistoryLength, true)?;

    let scripts = TopLevelScripts {
        script_loads: parse_table(r, Key::ScriptLoads, TopLevelScriptLoad::parse)?,
        new_functions: parse_table(r, Key::NewFunctions, TopLevelNewFunction::parse)?,
        evals: parse_table(r, Key::Evals, TopLevelEval::parse)?,
    };
    let entries = parse_table(r, Key::Events, |r, sep| EventLogEntry::parse(r, sep, diagnostics))?;
    r.read_record_end()?;

    for pair in entries.windows(2) {
        if pair[1].event_time <= pair[0].event_time {
            return Err(TtdError::EventOrder {
                previous: pair[0].event_time,
                found: pair[1].event_time,
            });
        }
    }

    let header = LogHeader {
        arch,
        platform,
        diagnostics,
        used_memory,
        reserved_memory,
        snap_interval_ms,
        snap_history_length,
        format,
        event_count: entries.len(),
    };
    Ok((header, scripts, entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TtdConfig;
    use crate::events::{ActionOp, LogValue, ResultStatus};
    use crate::serialize::MemoryStreams;
    use crate::snapshot::{LogTag, TopLevelCommonInfo};

    fn recorded(format: Format, diagnostics: bool) -> EventLog {
        let config = TtdConfig {
            format,
            diagnostics,
            ..TtdConfig::default()
        };
        let mut log = EventLog::new(config).unwrap();
        log.init_for_record();
        log.record_script_load(TopLevelScriptLoad {
            info: TopLevelCommonInfo {
                body_counter_id: 1,
                module_id: 0,
                document_id: 1,
                uri: "main.js".into(),
                source_code: "let x = 1;".into(),
            },
            load_flag: 0,
        })
        .unwrap();
        log.record_random_seed(9, 10).unwrap();
        let h = log
            .record_action(LogTag(1), ActionOp::AllocateString { value: "hi".into() })
            .unwrap();
        log.complete_action(h, ResultStatus::Normal, LogValue::String("hi".into()))
            .unwrap();
        if diagnostics {
            log.event(h).unwrap().diagnostics.set_label("alloc");
        }
        log
    }

    #[test]
    fn test_emit_parse_log_both_formats() {
        for format in [Format::Text, Format::Binary] {
            for diagnostics in [false, true] {
                let log = recorded(format, diagnostics);
                let streams = MemoryStreams::new();
                log.emit_log(&streams).unwrap();

                let mut restored = EventLog::new(TtdConfig::default()).unwrap();
                let header = restored.parse_log_into(&streams).unwrap();
                assert_eq!(header.format, format);
                assert_eq!(header.event_count, 3);
                assert_eq!(header.diagnostics, diagnostics);
                assert_eq!(restored.scripts(), log.scripts());
                let a: Vec<&EventLogEntry> = log.iter().collect();
                let b: Vec<&EventLogEntry> = restored.iter().collect();
                assert_eq!(a, b);
                assert_eq!(restored.next_body_counter_id(), 2);
            }
        }
    }

    #[test]
    fn test_parse_rejects_out_of_order_times() {
        let log = recorded(Format::Text, false);
        let streams = MemoryStreams::new();
        log.emit_log(&streams).unwrap();
        let text = String::from_utf8(streams.contents(LOG_STREAM_NAME).unwrap()).unwrap();
        let tampered = text.replacen("eventTime:1", "eventTime:0", 1);
        assert_ne!(text, tampered);
        streams.insert(LOG_STREAM_NAME, tampered.into_bytes());

        let mut restored = EventLog::new(TtdConfig::default()).unwrap();
        assert!(matches!(
            restored.parse_log_into(&streams),
            Err(TtdError::EventOrder { previous: 0, found: 0 })
        ));
    }

    #[test]
    fn test_missing_log_stream() {
        let mut log = EventLog::new(TtdConfig::default()).unwrap();
        assert!(matches!(
            log.parse_log_into(&MemoryStreams::new()),
            Err(TtdError::MissingStream(_))
        ));
    }
}

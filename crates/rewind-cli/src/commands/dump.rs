//! `rewind dump`: list log entries

use super::open_log;
use rewind_core::events::EventPayload;
use rewind_core::{EventLogEntry, TtdConfig};
use serde_json::json;
use std::path::Path;

/// Which entries to show
#[derive(Debug, Default)]
pub struct Filter {
    pub kind: Option<String>,
    pub from: Option<i64>,
    pub to: Option<i64>,
}

impl Filter {
    fn matches(&self, entry: &EventLogEntry) -> bool {
        if self.from.is_some_and(|from| entry.event_time < from) {
            return false;
        }
        if self.to.is_some_and(|to| entry.event_time > to) {
            return false;
        }
        match &self.kind {
            Some(kind) => format!("{:?}", entry.kind()).eq_ignore_ascii_case(kind),
            None => true,
        }
    }
}

/// One-line description of an entry's payload
pub fn describe(payload: &EventPayload) -> String {
    match payload {
        EventPayload::Snapshot(data) => format!(
            "restore tags {}/{}{}",
            data.restore_log_tag,
            data.restore_identity_tag.0,
            if data.snap.is_some() { "" } else { " (not loaded)" }
        ),
        EventPayload::EventLoopYieldPoint { yield_id, wall_time } => {
            format!("yield {} at {:.3} ms", yield_id, wall_time)
        }
        EventPayload::TopLevelCode { body_counter_id } => format!("body {}", body_counter_id),
        EventPayload::Telemetry { message, .. } => format!("{:?}", message),
        EventPayload::Double(v) => v.to_string(),
        EventPayload::String(s) => format!("{:?}", s),
        EventPayload::RandomSeed { seed0, seed1 } => format!("{:#x} {:#x}", seed0, seed1),
        EventPayload::PropertyEnum { return_code, pid, name, .. } => {
            format!("{} pid={} {}", return_code, pid.0, name.as_deref().unwrap_or(""))
        }
        EventPayload::SymbolCreation { pid } => format!("pid={}", pid.0),
        EventPayload::WeakCollectionContains { contains } => contains.to_string(),
        EventPayload::ExternalCbRegisterCall {
            callback_function,
            last_nested_event_time,
        } => format!("{} nested through {}", callback_function, last_nested_event_time),
        EventPayload::ExternalCall(call) => {
            let args: Vec<String> = call.args.iter().map(|a| a.to_string()).collect();
            format!(
                "{}({}) -> {}{} nested through {}",
                call.function,
                args.join(", "),
                call.return_value,
                if call.has_script_exception { " threw" } else { "" },
                call.last_nested_event_time
            )
        }
        EventPayload::Action(action) => format!("ctx {} -> {}", action.context_tag, action.result),
    }
}

pub fn execute(config: &TtdConfig, dir: &Path, filter: &Filter, as_json: bool) -> anyhow::Result<()> {
    let (log, _, _) = open_log(config, dir)?;
    let mut shown = 0;
    for entry in log.iter().filter(|e| filter.matches(e)) {
        if as_json {
            let line = json!({
                "time": entry.event_time,
                "kind": format!("{:?}", entry.kind()),
                "status": format!("{:?}", entry.result_status),
                "detail": describe(&entry.payload),
            });
            println!("{}", line);
        } else {
            println!(
                "{:>8}  {:<28} {:<10} {}",
                entry.event_time,
                format!("{:?}", entry.kind()),
                format!("{:?}", entry.result_status),
                describe(&entry.payload)
            );
        }
        shown += 1;
    }
    tracing::debug!(shown, total = log.len(), "entries listed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_core::events::ExternalCallData;
    use rewind_core::LogValue;

    #[test]
    fn test_filter_by_kind_and_range() {
        let entry = EventLogEntry::new(5, EventPayload::Double(1.5));
        let by_kind = Filter {
            kind: Some("double".into()),
            ..Filter::default()
        };
        assert!(by_kind.matches(&entry));
        let out_of_range = Filter {
            from: Some(6),
            ..Filter::default()
        };
        assert!(!out_of_range.matches(&entry));
        let in_range = Filter {
            from: Some(5),
            to: Some(5),
            kind: None,
        };
        assert!(in_range.matches(&entry));
    }

    #[test]
    fn test_describe_external_call() {
        let call = ExternalCallData {
            function: LogValue::Object(rewind_core::LogTag(3)),
            args: vec![LogValue::String("x".into())],
            return_value: LogValue::Undefined,
            last_nested_event_time: 9,
            has_script_exception: true,
            ..ExternalCallData::default()
        };
        let text = describe(&EventPayload::ExternalCall(call));
        assert!(text.contains("threw"));
        assert!(text.contains("nested through 9"));
    }
}

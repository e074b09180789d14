//! Driving replay through the host
//!
//! The log decides which entry comes next; a [`ReplayHost`] re-executes the
//! JsRT actions against its heap. Root entries are consumed one at a time by
//! the host's control loop.

use super::EventLog;
use crate::error::{TtdError, TtdResult};
use crate::events::{EventKind, EventPayload, JsRtAction};
use tracing::{debug, info};

/// Executes recorded host calls during replay
pub trait ReplayHost {
    /// Re-run `action`, recorded at `event_time`, and check its result
    fn execute_action(&mut self, log: &mut EventLog, event_time: i64, action: &JsRtAction) -> TtdResult<()>;
}

impl EventLog {
    /// Consume one root entry; actions are handed to `host`
    pub fn replay_single_root_entry(&mut self, host: &mut dyn ReplayHost) -> TtdResult<()> {
        let (kind, time) = match self.peek_next_event() {
            Some(entry) => (entry.kind(), entry.event_time),
            None => return self.abort_replay_return_to_host(),
        };
        match kind {
            EventKind::Snapshot | EventKind::EventLoopYieldPoint | EventKind::TopLevelCode => {
                self.replay_next_event(kind)?;
            }
            EventKind::Telemetry => {
                if let EventPayload::Telemetry {
                    message,
                    do_print: true,
                } = &self.replay_next_event(kind)?.payload
                {
                    info!(event_time = time, "{}", message);
                }
            }
            k if k.is_action() => self.replay_single_action_event_entry(host)?,
            _ => {
                return Err(TtdError::PolicyViolation(
                    "data event outside any call at top level",
                ))
            }
        }
        Ok(())
    }

    /// Consume one action entry and have `host` execute it
    pub fn replay_single_action_event_entry(&mut self, host: &mut dyn ReplayHost) -> TtdResult<()> {
        let entry = self.replay_next_any()?;
        let time = entry.event_time;
        let action = match &entry.payload {
            EventPayload::Action(action) => action.clone(),
            other => {
                return Err(TtdError::EventKindMismatch {
                    time,
                    expected: EventKind::CallExistingFunctionBegin,
                    found: other.kind(),
                })
            }
        };
        host.execute_action(self, time, &action)
    }

    /// Replay root entries until the counter reaches `target`
    pub fn replay_root_events_to_time(&mut self, target: i64, host: &mut dyn ReplayHost) -> TtdResult<()> {
        while self.current_event_time() < target {
            self.replay_single_root_entry(host)?;
        }
        Ok(())
    }

    /// Replay action entries up to and including `end_time`
    pub fn replay_action_event_sequence_through_time(
        &mut self,
        end_time: i64,
        host: &mut dyn ReplayHost,
    ) -> TtdResult<()> {
        while self.current_event_time() <= end_time {
            self.replay_single_action_event_entry(host)?;
        }
        Ok(())
    }

    /// Replay every remaining root entry; reaching the end of the log is success
    pub fn replay_to_end(&mut self, host: &mut dyn ReplayHost) -> TtdResult<()> {
        loop {
            match self.replay_single_root_entry(host) {
                Ok(()) => {}
                Err(TtdError::Abort(reason)) if reason.is_end_of_log() => {
                    debug!(last = self.last_consistent_event_time(), "replay complete");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TtdConfig;
    use crate::events::{ActionOp, LogValue};
    use crate::snapshot::LogTag;

    #[derive(Default)]
    struct CountingHost {
        executed: Vec<(i64, EventKind)>,
    }

    impl ReplayHost for CountingHost {
        fn execute_action(&mut self, _log: &mut EventLog, event_time: i64, action: &JsRtAction) -> TtdResult<()> {
            self.executed.push((event_time, action.op.kind()));
            Ok(())
        }
    }

    fn recorded() -> EventLog {
        let mut log = EventLog::new(TtdConfig::default()).unwrap();
        log.init_for_record();
        log.record_yield_point(1).unwrap();
        log.record_telemetry("hello", true).unwrap();
        let h = log
            .record_action(LogTag(1), ActionOp::AllocateNumber { value: 4.0 })
            .unwrap();
        log.complete_action(h, crate::events::ResultStatus::Normal, LogValue::Number(4.0))
            .unwrap();
        log.record_action(LogTag(1), ActionOp::GetAndClearException).unwrap();
        log
    }

    #[test]
    fn test_replay_to_end_dispatches_actions() {
        let mut log = recorded();
        log.init_for_replay(false);
        let mut host = CountingHost::default();
        log.replay_to_end(&mut host).unwrap();
        assert_eq!(
            host.executed,
            vec![(2, EventKind::AllocateNumber), (3, EventKind::GetAndClearException)]
        );
        assert_eq!(log.current_event_time(), 4);
    }

    #[test]
    fn test_replay_root_events_to_time_stops() {
        let mut log = recorded();
        log.init_for_replay(false);
        let mut host = CountingHost::default();
        log.replay_root_events_to_time(3, &mut host).unwrap();
        assert_eq!(host.executed.len(), 1);
        assert_eq!(log.current_event_time(), 3);
    }

    #[test]
    fn test_data_event_at_top_level_is_rejected() {
        let mut log = EventLog::new(TtdConfig::default()).unwrap();
        log.init_for_record();
        log.record_double(1.0).unwrap();
        log.init_for_replay(false);
        let mut host = CountingHost::default();
        assert!(matches!(
            log.replay_single_root_entry(&mut host),
            Err(TtdError::PolicyViolation(_))
        ));
    }
}

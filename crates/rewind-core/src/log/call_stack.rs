//! Shadow call stack for one top-level call
//!
//! Frame bookkeeping is only meaningful inside a single top-level call, so
//! replay resets it every time the host starts one.

use crate::events::SourceLocation;

/// One script frame
#[derive(Debug, Clone, PartialEq)]
pub struct CallFrame {
    /// Function name
    pub name: String,
    /// Event time when the frame was entered
    pub event_time_start: i64,
    /// Per-top-level call counter value when entered
    pub function_time: u64,
    /// Loop iterations executed in the frame
    pub loop_time: u64,
    /// Current statement
    pub location: Option<SourceLocation>,
}

/// Shadow stack and re-entrancy counters
#[derive(Debug, Clone, Default)]
pub struct ShadowCallStack {
    frames: Vec<CallFrame>,
    top_level_event_time: i64,
    function_counter: u64,
    last_returned: Option<SourceLocation>,
}

impl ShadowCallStack {
    /// Empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear every frame and counter before a top-level call at `event_time`
    pub fn reset_for_top_level_call(&mut self, event_time: i64) {
        self.frames.clear();
        self.top_level_event_time = event_time;
        self.function_counter = 0;
        self.last_returned = None;
    }

    /// Event time of the current top-level call
    pub fn top_level_event_time(&self) -> i64 {
        self.top_level_event_time
    }

    /// Enter a frame
    pub fn push_call(&mut self, name: impl Into<String>, event_time: i64) {
        self.function_counter += 1;
        self.frames.push(CallFrame {
            name: name.into(),
            event_time_start: event_time,
            function_time: self.function_counter,
            loop_time: 0,
            location: None,
        });
    }

    /// Leave the innermost frame
    pub fn pop_call(&mut self) -> Option<CallFrame> {
        let frame = self.frames.pop()?;
        if frame.location.is_some() {
            self.last_returned = frame.location;
        }
        Some(frame)
    }

    /// Record the statement the innermost frame is executing
    pub fn update_location(&mut self, location: SourceLocation) {
        if let Some(frame) = self.frames.last_mut() {
            frame.location = Some(location);
        }
    }

    /// Count one loop iteration in the innermost frame
    pub fn update_loop(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.loop_time += 1;
        }
    }

    /// Frame count
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Innermost frame
    pub fn top(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    /// Location of the innermost frame
    pub fn current_location(&self) -> Option<SourceLocation> {
        self.frames.last().and_then(|f| f.location)
    }

    /// Current location, or the last one seen before the stack emptied
    pub fn last_executed_location(&self) -> Option<SourceLocation> {
        self.current_location().or(self.last_returned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(line: u32) -> SourceLocation {
        SourceLocation {
            line,
            column: 0,
            source_id: 1,
        }
    }

    #[test]
    fn test_push_pop_counters() {
        let mut stack = ShadowCallStack::new();
        stack.reset_for_top_level_call(5);
        stack.push_call("outer", 5);
        stack.push_call("inner", 6);
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.top().map(|f| f.function_time), Some(2));
        stack.update_loop();
        let inner = stack.pop_call().unwrap();
        assert_eq!(inner.name, "inner");
        assert_eq!(inner.loop_time, 1);
    }

    #[test]
    fn test_last_executed_location_survives_pop() {
        let mut stack = ShadowCallStack::new();
        stack.push_call("f", 0);
        stack.update_location(loc(4));
        assert_eq!(stack.current_location(), Some(loc(4)));
        stack.pop_call();
        assert_eq!(stack.current_location(), None);
        assert_eq!(stack.last_executed_location(), Some(loc(4)));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut stack = ShadowCallStack::new();
        stack.push_call("f", 0);
        stack.update_location(loc(1));
        stack.reset_for_top_level_call(9);
        assert_eq!(stack.depth(), 0);
        assert_eq!(stack.last_executed_location(), None);
        assert_eq!(stack.top_level_event_time(), 9);
    }
}

//! Record/replay/debug mode bits
//!
//! The net mode is the global mode OR'd with every pushed mode. It is
//! recomputed on every change, never patched incrementally.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Mode bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TtdMode(pub u32);

impl TtdMode {
    /// No mode set yet
    pub const PENDING: TtdMode = TtdMode(0x0);
    /// Time travel turned off for the context
    pub const DETACHED: TtdMode = TtdMode(0x1);
    /// Recording
    pub const RECORD_MODE: TtdMode = TtdMode(0x2);
    /// Replaying
    pub const REPLAY_MODE: TtdMode = TtdMode(0x4);
    /// Replaying under a debugger
    pub const DEBUGGER_MODE: TtdMode = TtdMode(0x8);
    /// Record or replay is active right now
    pub const CURRENTLY_ENABLED: TtdMode = TtdMode(0x10);
    /// Engine-internal code that must not be recorded
    pub const EXCLUDED_EXECUTION_TT_ACTION: TtdMode = TtdMode(0x20);
    /// Debugger-internal code that must not be recorded
    pub const EXCLUDED_EXECUTION_DEBUGGER_ACTION: TtdMode = TtdMode(0x40);
    /// Debugger evaluations must not run getters
    pub const DEBUGGER_SUPPRESS_GETTER: TtdMode = TtdMode(0x80);
    /// Debugger breakpoints are ignored
    pub const DEBUGGER_SUPPRESS_BREAKPOINTS: TtdMode = TtdMode(0x100);
    /// Breakpoints are logged instead of stopping
    pub const DEBUGGER_LOG_BREAKPOINTS: TtdMode = TtdMode(0x200);

    /// Either excluded-execution bit
    pub const ANY_EXCLUDED: TtdMode =
        TtdMode(Self::EXCLUDED_EXECUTION_TT_ACTION.0 | Self::EXCLUDED_EXECUTION_DEBUGGER_ACTION.0);

    /// Bits that may be pushed and popped
    pub const PUSHABLE: TtdMode = TtdMode(
        Self::ANY_EXCLUDED.0
            | Self::DEBUGGER_SUPPRESS_GETTER.0
            | Self::DEBUGGER_SUPPRESS_BREAKPOINTS.0
            | Self::DEBUGGER_LOG_BREAKPOINTS.0,
    );

    /// True if every bit in `other` is set
    pub fn contains(self, other: TtdMode) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any bit in `other` is set
    pub fn intersects(self, other: TtdMode) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for TtdMode {
    type Output = TtdMode;

    fn bitor(self, rhs: TtdMode) -> TtdMode {
        TtdMode(self.0 | rhs.0)
    }
}

impl BitOrAssign for TtdMode {
    fn bitor_assign(&mut self, rhs: TtdMode) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for TtdMode {
    type Output = TtdMode;

    fn bitand(self, rhs: TtdMode) -> TtdMode {
        TtdMode(self.0 & rhs.0)
    }
}

impl fmt::Display for TtdMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(TtdMode, &str); 10] = [
            (TtdMode::DETACHED, "detached"),
            (TtdMode::RECORD_MODE, "record"),
            (TtdMode::REPLAY_MODE, "replay"),
            (TtdMode::DEBUGGER_MODE, "debugger"),
            (TtdMode::CURRENTLY_ENABLED, "enabled"),
            (TtdMode::EXCLUDED_EXECUTION_TT_ACTION, "excluded-tt"),
            (TtdMode::EXCLUDED_EXECUTION_DEBUGGER_ACTION, "excluded-debugger"),
            (TtdMode::DEBUGGER_SUPPRESS_GETTER, "suppress-getter"),
            (TtdMode::DEBUGGER_SUPPRESS_BREAKPOINTS, "suppress-breakpoints"),
            (TtdMode::DEBUGGER_LOG_BREAKPOINTS, "log-breakpoints"),
        ];
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "pending")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Global mode plus a stack of pushed modes
#[derive(Debug, Clone, Default)]
pub struct ModeStack {
    global: TtdMode,
    stack: Vec<TtdMode>,
    current: TtdMode,
}

impl ModeStack {
    /// Net mode
    pub fn current(&self) -> TtdMode {
        self.current
    }

    /// Replace the global mode
    pub fn set_global(&mut self, mode: TtdMode) {
        self.global = mode;
        self.recompute();
    }

    /// Push a scoped mode
    pub fn push(&mut self, mode: TtdMode) {
        debug_assert!(TtdMode::PUSHABLE.contains(mode), "mode {} cannot be pushed", mode);
        self.stack.push(mode);
        self.recompute();
    }

    /// Pop a scoped mode; `mode` must be the top of the stack
    pub fn pop(&mut self, mode: TtdMode) -> bool {
        match self.stack.last() {
            Some(top) if *top == mode => {
                self.stack.pop();
                self.recompute();
                true
            }
            _ => false,
        }
    }

    /// Pushed mode count
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    fn recompute(&mut self) {
        self.current = self.stack.iter().fold(self.global, |acc, m| acc | *m);
    }

    fn enabled(&self) -> bool {
        self.current.contains(TtdMode::CURRENTLY_ENABLED)
            && !self.current.intersects(TtdMode::ANY_EXCLUDED)
    }

    /// Recording and not inside excluded execution
    pub fn should_perform_record_action(&self) -> bool {
        self.current.contains(TtdMode::RECORD_MODE) && self.enabled()
    }

    /// Replaying and not inside excluded execution
    pub fn should_perform_replay_action(&self) -> bool {
        self.current.contains(TtdMode::REPLAY_MODE) && self.enabled()
    }

    /// Debugging and not inside excluded execution
    pub fn should_perform_debugger_action(&self) -> bool {
        self.current.contains(TtdMode::DEBUGGER_MODE) && self.enabled()
    }

    /// Debugger attached, regardless of exclusion
    pub fn is_debugger_mode(&self) -> bool {
        self.current.contains(TtdMode::DEBUGGER_MODE)
    }

    /// Objects crossing the boundary get log tags
    pub fn should_tag_for_record(&self) -> bool {
        self.current.contains(TtdMode::RECORD_MODE) && self.current.contains(TtdMode::CURRENTLY_ENABLED)
    }

    /// Debugger evaluations run without getters
    pub fn should_suppress_getters(&self) -> bool {
        self.current.contains(TtdMode::DEBUGGER_SUPPRESS_GETTER)
    }
}

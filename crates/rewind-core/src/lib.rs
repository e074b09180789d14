//! Rewind Record/Replay Engine
//!
//! This crate provides the time-travel core of a script runtime:
//! - **Serialization**: Keyed text and binary writers/readers (`serialize` module)
//! - **Snapshots**: Heap value model, extraction and inflation (`snapshot` module)
//! - **Inflate map**: Snapshot ids to live pointers, with reuse (`inflate_map` module)
//! - **Events**: Log entries and JsRT actions (`events` module)
//! - **Event log**: Modes, recording, replay, snapshot timing (`log` module)
//! - **Heap**: The live-heap boundary and a reference heap (`heap` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use rewind_core::{EventLog, ReferenceHeap, TtdConfig};
//!
//! let mut log = EventLog::new(TtdConfig::default())?;
//! log.init_for_record();
//! let mut heap = ReferenceHeap::new();
//! let ctx = heap.create_context(&mut log, "main.js")?;
//! let main = heap.load_script(&mut log, ctx, "main.js", "main")?;
//! heap.call_function(&mut log, ctx, &main, &[])?;
//!
//! // Replay from the first snapshot into a fresh heap
//! log.init_for_replay(false);
//! let mut replay = ReferenceHeap::new();
//! log.do_snapshot_inflate(log.snapshot_times()[0], &mut replay)?;
//! log.replay_to_end(&mut replay)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::large_enum_variant)]

// ============================================================================
// Core Modules
// ============================================================================

/// Error types shared by every module
pub mod error;

/// Recording and replay settings
pub mod config;

/// Stable-key slab backing the event list
pub mod arena;

/// Serialization: writers, readers, streams
pub mod serialize;

/// Snapshot value model, extraction and inflation
pub mod snapshot;

/// Snapshot id to live pointer map
pub mod inflate_map;

/// Live-heap traits and the reference heap
pub mod heap;

/// Event log entries and JsRT actions
pub mod events;

/// The event log driver
pub mod log;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::TtdConfig;
pub use error::{AbortReason, TtdError, TtdResult};
pub use events::{ActionOp, EventKind, EventLogEntry, JsRtAction, LogValue, ResultStatus};
pub use heap::{HeapBuilder, HeapWalker, LivePtr, LiveValue, ReferenceHeap};
pub use inflate_map::InflateMap;
pub use log::{EventLog, LogHeader, ReplayHost, TtdMode};
pub use serialize::{DirectoryStreams, Format, MemoryStreams, StreamProvider};
pub use snapshot::{LogTag, PropertyId, SnapShot, SnapshotExtractor};

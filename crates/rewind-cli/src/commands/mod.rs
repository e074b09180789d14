//! Subcommand implementations

pub mod convert;
pub mod demo;
pub mod dump;
pub mod info;
pub mod verify;

use anyhow::Context;
use rewind_core::{DirectoryStreams, EventLog, LogHeader, TtdConfig};
use std::path::Path;

/// Open a log directory and read its entries; snapshots stay on disk
pub fn open_log(config: &TtdConfig, dir: &Path) -> anyhow::Result<(EventLog, LogHeader, DirectoryStreams)> {
    let streams = DirectoryStreams::new(dir).with_context(|| format!("opening {}", dir.display()))?;
    let mut log = EventLog::new(config.clone())?;
    let header = log
        .parse_log_into(&streams)
        .with_context(|| format!("reading log in {}", dir.display()))?;
    Ok((log, header, streams))
}

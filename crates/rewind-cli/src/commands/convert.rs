//! `rewind convert`: rewrite a log container in another format

use super::open_log;
use anyhow::Context;
use rewind_core::{DirectoryStreams, Format, TtdConfig};
use std::path::Path;

pub fn execute(config: &TtdConfig, input: &Path, output: &Path, to: Format) -> anyhow::Result<()> {
    if input == output {
        anyhow::bail!("input and output must be different directories");
    }
    let target = TtdConfig {
        format: to,
        ..config.clone()
    };
    let (mut log, header, streams) = open_log(&target, input)?;
    let snapshots = log.load_snapshots(&streams)?;

    let out = DirectoryStreams::new(output).with_context(|| format!("creating {}", output.display()))?;
    log.emit_log(&out)
        .with_context(|| format!("writing {}", output.display()))?;

    println!(
        "Converted {} events and {} snapshots: {} -> {}",
        header.event_count, snapshots, header.format, to
    );
    Ok(())
}

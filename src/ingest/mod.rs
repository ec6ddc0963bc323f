//! Two-pass import of a raw frame log into a container.
//!
//! Pass 1 decodes the whole log to find the distinct timestamps and observed
//! variables. Pass 2 re-opens the log, decodes it again and streams every
//! message into a [`ContainerWriter`](crate::ContainerWriter) sized from pass 1.

mod discovery;

pub use discovery::{discover, Discovery};

use std::path::Path;

use crate::catalog::{SchemaCatalog, VariableCatalog};
use crate::decode::{FrameDecoder, FrameLog};
use crate::storage::ContainerStore;
use crate::{Error, Result};

/// Receives the fraction of messages written so far.
pub trait ProgressSink {
    fn report(&mut self, fraction: f64);
}

impl<F: FnMut(f64)> ProgressSink for F {
    fn report(&mut self, fraction: f64) {
        self(fraction)
    }
}

/// Discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _fraction: f64) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub run_id: u64,
    pub rows: usize,
    pub columns: usize,
    pub start: i64,
    pub end: i64,
}

/// Decode `input`, write it as the container for `run_id` and back it up to
/// the data remote.
///
/// A malformed log header fails before any file is created. Any error during
/// pass 2 drops the writer, which removes its temp file.
pub fn import_run(
    store: &ContainerStore,
    input: &Path,
    run_id: u64,
    schema: &SchemaCatalog,
    variables: &VariableCatalog,
    progress: &mut dyn ProgressSink,
) -> Result<ImportSummary> {
    let config = store.config();
    let offset = config.logger_offset()?;
    let decoder = FrameDecoder::new(schema);

    log::info!("discovering variables in {}", input.display());
    let mut messages = decoder.messages(FrameLog::open(input, offset)?.frames());
    let mut discovery = discover(messages.by_ref(), variables);
    discovery.unknown_ids = messages.unknown_ids().clone();
    discovery.log_summary();
    if discovery.rows() == 0 {
        return Err(Error::EmptyRun);
    }

    let mut writer = store.create(run_id, &discovery)?;
    let interval = config.progress_interval.max(1);
    let total = discovery.messages.max(1) as f64;
    let mut processed = 0u64;
    for message in decoder.messages(FrameLog::open(input, offset)?.frames()) {
        writer.write_message(&message)?;
        processed += 1;
        if processed % interval == 0 {
            progress.report(processed as f64 / total);
        }
    }
    let summary = writer.finish()?;
    progress.report(1.0);

    store.backup(run_id);
    log::info!(
        "Imported {} of data ({} rows x {} variables)",
        format_span(summary.end - summary.start),
        summary.rows,
        summary.columns
    );

    Ok(ImportSummary {
        run_id,
        rows: summary.rows,
        columns: summary.columns,
        start: summary.start,
        end: summary.end,
    })
}

fn format_span(millis: i64) -> String {
    let total = millis / 1000;
    format!(
        "{}:{:02}:{:02}.{:03}",
        total / 3600,
        (total / 60) % 60,
        total % 60,
        millis % 1000
    )
}

use std::io::{self, Write};

use serde::Serialize;
use tracing::debug;

use crate::app::{
    DeleteFileResult, ExportResult, ManifestResult, OrderResult, ProgressEvent, ProgressSink,
    SubmitFileResult,
};
use crate::migration::EditOutcome;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_submit(result: &SubmitFileResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_delete(result: &DeleteFileResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_export(result: &ExportResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_order(result: &OrderResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_manifest(result: &ManifestResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_edits(outcomes: &[EditOutcome]) -> io::Result<()> {
        Self::print_json(&outcomes)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Forwards progress events to the tracing subscriber at debug level.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => debug!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => debug!("{}", event.message),
        }
    }
}

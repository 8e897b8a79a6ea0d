use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::config::DEFAULT_CHUNK_SIZE;
use crate::domain::ProjectId;
use crate::error::Gen3Error;
use crate::fs_util::write_atomic;
use crate::response::{EntityOutcome, SubmissionReply, parse_reply};
use crate::sheepdog::SubmissionClient;
use crate::table::{Dataset, SUBMITTER_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOptions {
    pub chunk_size: usize,
    pub row_offset: usize,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            row_offset: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailedEntities {
    pub submitter_ids: Vec<String>,
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnhandledChunk {
    pub chunk: usize,
    pub submitter_ids: Vec<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubmissionResult {
    pub total_rows: usize,
    pub row_offset: usize,
    pub succeeded: Vec<String>,
    pub failed: FailedEntities,
    pub unhandled: Vec<UnhandledChunk>,
    pub other: Vec<Value>,
    pub responses: Vec<String>,
    pub details: Vec<String>,
    pub final_chunk_size: usize,
}

/// Deletion runs the same chunk loop keyed by record ids instead of submitter_ids.
pub type DeletionResult = SubmissionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmissionSummary {
    pub total: usize,
    pub succeeded: usize,
    pub invalid: usize,
    pub unhandled: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureFiles {
    pub invalid: PathBuf,
    pub missing: PathBuf,
}

impl SubmissionResult {
    pub fn summary(&self) -> SubmissionSummary {
        let unhandled = self
            .unhandled
            .iter()
            .map(|chunk| chunk.submitter_ids.len())
            .sum::<usize>();
        let attempted = self.total_rows.saturating_sub(self.row_offset);
        SubmissionSummary {
            total: self.total_rows,
            succeeded: self.succeeded.len(),
            invalid: self.failed.submitter_ids.len(),
            unhandled,
            pending: attempted
                .saturating_sub(self.succeeded.len() + self.failed.submitter_ids.len() + unhandled),
        }
    }

    pub fn write_response_log(&self, path: &Path) -> Result<(), Gen3Error> {
        let mut content = self.details.join("\n\n");
        content.push('\n');
        write_atomic(path, content.as_bytes())
    }

    /// Writes `invalid_{name}.tsv` with rows the endpoint rejected and
    /// `missing_{name}.tsv` with rows that never succeeded nor failed validation.
    pub fn write_failure_tsvs(
        &self,
        dataset: &Dataset,
        dir: &Path,
        name: &str,
    ) -> Result<FailureFiles, Gen3Error> {
        let column = dataset.require_column(SUBMITTER_ID, name)?;
        let invalid_ids = self
            .failed
            .submitter_ids
            .iter()
            .map(String::as_str)
            .collect::<HashSet<_>>();
        let settled = self
            .succeeded
            .iter()
            .map(String::as_str)
            .chain(invalid_ids.iter().copied())
            .collect::<HashSet<_>>();

        let invalid = dataset.filter_rows(|row| invalid_ids.contains(dataset.cell(row, column)));
        let missing = dataset.filter_rows(|row| {
            row >= self.row_offset && !settled.contains(dataset.cell(row, column))
        });

        let files = FailureFiles {
            invalid: dir.join(format!("invalid_{name}.tsv")),
            missing: dir.join(format!("missing_{name}.tsv")),
        };
        invalid.write_tsv(&files.invalid)?;
        missing.write_tsv(&files.missing)?;
        info!(
            "wrote {} invalid rows to {} and {} missing rows to {}",
            invalid.len(),
            files.invalid.display(),
            missing.len(),
            files.missing.display()
        );
        Ok(files)
    }
}

#[derive(Debug, Clone, Copy)]
enum EntityKey {
    SubmitterId,
    Id,
}

impl EntityKey {
    fn extract(self, entity: &EntityOutcome) -> Option<&str> {
        match self {
            EntityKey::SubmitterId => entity.submitter_id.as_deref(),
            EntityKey::Id => entity.id.as_deref(),
        }
    }
}

pub struct Submitter<'a, C: SubmissionClient + ?Sized> {
    client: &'a C,
}

impl<'a, C: SubmissionClient + ?Sized> Submitter<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    pub fn submit(
        &self,
        project: &ProjectId,
        dataset: &Dataset,
        options: SubmitOptions,
        sink: &dyn ProgressSink,
    ) -> Result<SubmissionResult, Gen3Error> {
        if options.chunk_size == 0 {
            return Err(Gen3Error::InvalidChunkSize(0));
        }
        dataset.ensure_unique_submitter_ids()?;
        let keys = dataset
            .submitter_ids()?
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        info!(
            "submitting {} records to {project} (chunk size {}, row offset {})",
            keys.len(),
            options.chunk_size,
            options.row_offset
        );
        self.run_chunks(&keys, options, EntityKey::SubmitterId, sink, |rows| {
            let body = dataset.to_tsv_string(rows)?;
            self.client.submit_tsv(project, &body)
        })
    }

    pub fn delete_records(
        &self,
        project: &ProjectId,
        ids: &[String],
        chunk_size: usize,
        sink: &dyn ProgressSink,
    ) -> Result<DeletionResult, Gen3Error> {
        if chunk_size == 0 {
            return Err(Gen3Error::InvalidChunkSize(0));
        }
        let mut keys = Vec::with_capacity(ids.len());
        let mut seen = HashSet::new();
        for id in ids {
            if !id.is_empty() && seen.insert(id.as_str()) {
                keys.push(id.clone());
            }
        }
        info!("deleting {} records from {project} (chunk size {chunk_size})", keys.len());
        let options = SubmitOptions {
            chunk_size,
            row_offset: 0,
        };
        self.run_chunks(&keys, options, EntityKey::Id, sink, |rows| {
            let batch = rows.iter().map(|row| keys[*row].clone()).collect::<Vec<_>>();
            self.client.delete_entities(project, &batch)
        })
    }

    fn run_chunks<F>(
        &self,
        keys: &[String],
        options: SubmitOptions,
        entity_key: EntityKey,
        sink: &dyn ProgressSink,
        mut send: F,
    ) -> Result<SubmissionResult, Gen3Error>
    where
        F: FnMut(&[usize]) -> Result<String, Gen3Error>,
    {
        let started = Instant::now();
        let total = keys.len();
        let mut result = SubmissionResult {
            total_rows: total,
            row_offset: options.row_offset,
            final_chunk_size: options.chunk_size,
            ..SubmissionResult::default()
        };
        let mut settled = HashSet::<String>::new();
        let mut chunk_size = options.chunk_size;
        let mut start = options.row_offset;
        let mut retry: Option<Vec<usize>> = None;
        let mut attempt = 0usize;

        while start < total {
            let rows = match retry.take() {
                Some(rows) => rows,
                None => (start..(start + chunk_size).min(total))
                    .filter(|row| !settled.contains(&keys[*row]))
                    .collect::<Vec<_>>(),
            };
            if rows.is_empty() {
                start += chunk_size;
                continue;
            }

            attempt += 1;
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Chunk; chunk {attempt} ({} rows from offset {start}, chunk size {chunk_size}, settled {} of {total})",
                    rows.len(),
                    settled.len()
                ),
                elapsed: Some(started.elapsed()),
            });

            let (raw, reply) = match send(&rows) {
                Ok(raw) => {
                    let reply = parse_reply(&raw);
                    (raw, reply)
                }
                Err(Gen3Error::SubmissionHttp(message)) => (
                    format!("('Connection aborted.', {message})"),
                    SubmissionReply::connection_aborted(),
                ),
                Err(err) => return Err(err),
            };
            debug!("chunk {attempt} reply classified as {}", reply.label());
            result.details.push(raw.clone());

            match reply {
                SubmissionReply::Overload { reason } => {
                    result.responses.push(format!(
                        "Chunk {attempt} Reducing Chunk Size: {}",
                        reason.as_str()
                    ));
                    if chunk_size < 2 {
                        result.final_chunk_size = chunk_size;
                        warn!("chunk at offset {start} still failing at chunk size 1");
                        return Err(Gen3Error::SubmissionTimeout {
                            offset: start,
                            partial: Box::new(result),
                        });
                    }
                    chunk_size /= 2;
                    warn!(
                        "{} at offset {start}, retrying with chunk size {chunk_size}",
                        reason.as_str()
                    );
                }
                SubmissionReply::Success { entities } => {
                    let mut echoed = entities
                        .iter()
                        .filter_map(|entity| entity_key.extract(entity))
                        .map(str::to_string)
                        .collect::<Vec<_>>();
                    if echoed.is_empty() {
                        echoed = rows.iter().map(|row| keys[*row].clone()).collect();
                    }
                    let mut count = 0;
                    for key in echoed {
                        if settled.insert(key.clone()) {
                            result.succeeded.push(key);
                            count += 1;
                        }
                    }
                    info!("chunk {attempt} succeeded: {count} entities");
                    result
                        .responses
                        .push(format!("Chunk {attempt} Succeeded: {count} entities."));
                    record_unhandled(
                        &mut result,
                        &mut settled,
                        keys,
                        &rows,
                        attempt,
                        "not reported in success reply".to_string(),
                    );
                    start += chunk_size;
                }
                SubmissionReply::ClientError { code, entities } => {
                    let mut valid_but_failed = HashSet::new();
                    let mut invalid = 0usize;
                    for entity in &entities {
                        let Some(key) = entity_key.extract(entity) else {
                            continue;
                        };
                        if entity.valid {
                            valid_but_failed.insert(key.to_string());
                        } else {
                            invalid += 1;
                            if settled.insert(key.to_string()) {
                                let message = entity.first_error();
                                warn!("invalid record {key}: {message}");
                                result.failed.submitter_ids.push(key.to_string());
                                result.failed.messages.push(message);
                            }
                        }
                    }
                    result.responses.push(format!(
                        "Chunk {attempt} Failed ({code}): {} entities, {invalid} invalid.",
                        entities.len()
                    ));

                    if !valid_but_failed.is_empty() && invalid > 0 {
                        let retry_rows = rows
                            .iter()
                            .copied()
                            .filter(|row| valid_but_failed.contains(&keys[*row]))
                            .collect::<Vec<_>>();
                        if retry_rows.is_empty() || retry_rows.len() >= rows.len() {
                            return Err(Gen3Error::AmbiguousFailure {
                                offset: start,
                                count: valid_but_failed.len(),
                                partial: Box::new(result),
                            });
                        }
                        let unmentioned = rows
                            .iter()
                            .copied()
                            .filter(|row| !valid_but_failed.contains(&keys[*row]))
                            .collect::<Vec<_>>();
                        record_unhandled(
                            &mut result,
                            &mut settled,
                            keys,
                            &unmentioned,
                            attempt,
                            format!("not reported in client error {code} reply"),
                        );
                        info!(
                            "retrying {} valid entities from failed chunk {attempt}",
                            retry_rows.len()
                        );
                        retry = Some(retry_rows);
                    } else if !valid_but_failed.is_empty() {
                        return Err(Gen3Error::AmbiguousFailure {
                            offset: start,
                            count: valid_but_failed.len(),
                            partial: Box::new(result),
                        });
                    } else {
                        let reason = if entities.is_empty() {
                            format!("client error {code} without entities")
                        } else {
                            format!("not reported in client error {code} reply")
                        };
                        record_unhandled(&mut result, &mut settled, keys, &rows, attempt, reason);
                        start += chunk_size;
                    }
                }
                SubmissionReply::ServerError { code } => {
                    warn!("chunk {attempt} hit an internal server error ({code})");
                    result
                        .responses
                        .push(format!("Chunk {attempt} Internal Server Error: {raw}"));
                    record_unhandled(
                        &mut result,
                        &mut settled,
                        keys,
                        &rows,
                        attempt,
                        format!("server error {code}"),
                    );
                    start += chunk_size;
                }
                SubmissionReply::Message {
                    message,
                    transactional_errors,
                } => {
                    warn!("no code in the API response for chunk {attempt}: {message}");
                    result
                        .responses
                        .push(format!("Chunk {attempt} Error: {message}"));
                    result.other.push(
                        transactional_errors.unwrap_or_else(|| Value::String(message.clone())),
                    );
                    record_unhandled(&mut result, &mut settled, keys, &rows, attempt, message);
                    start += chunk_size;
                }
                SubmissionReply::Unrecognized => {
                    warn!("unhandled API response for chunk {attempt}");
                    result
                        .responses
                        .push(format!("Chunk {attempt} Unhandled API response: {raw}"));
                    record_unhandled(
                        &mut result,
                        &mut settled,
                        keys,
                        &rows,
                        attempt,
                        "unrecognized response".to_string(),
                    );
                    start += chunk_size;
                }
            }
        }

        result.final_chunk_size = chunk_size;
        let summary = result.summary();
        info!(
            "finished: {} succeeded, {} invalid, {} unhandled",
            summary.succeeded, summary.invalid, summary.unhandled
        );
        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; {} succeeded, {} invalid, {} unhandled",
                summary.succeeded, summary.invalid, summary.unhandled
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(result)
    }
}

fn record_unhandled(
    result: &mut SubmissionResult,
    settled: &mut HashSet<String>,
    keys: &[String],
    rows: &[usize],
    chunk: usize,
    reason: String,
) {
    let submitter_ids = rows
        .iter()
        .map(|row| keys[*row].clone())
        .filter(|key| settled.insert(key.clone()))
        .collect::<Vec<_>>();
    if !submitter_ids.is_empty() {
        result.unhandled.push(UnhandledChunk {
            chunk,
            submitter_ids,
            reason,
        });
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Local;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::dictionary::DictionaryGraph;
use crate::domain::ProjectId;
use crate::error::Gen3Error;
use crate::fs_util::file_name;
use crate::indexd::{IndexClient, IndexRecord, fetch_all_records, load_records, save_records};
use crate::manifest::{
    ManifestEntry, build_client_manifest, default_manifest_path, parse_dcc_manifest,
    write_client_manifest,
};
use crate::order::{NodeDepth, OrderResolver, discover_nodes};
use crate::sheepdog::SubmissionClient;
use crate::submitter::{
    DeletionResult, FailureFiles, SubmissionResult, SubmissionSummary, SubmitOptions, Submitter,
};
use crate::table::Dataset;

pub const ID_COLUMN: &str = "id";

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitFileResult {
    pub file: String,
    pub project: String,
    pub summary: SubmissionSummary,
    pub response_log: Option<String>,
    pub failure_files: Option<FailureFiles>,
    pub result: SubmissionResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteFileResult {
    pub file: String,
    pub project: String,
    pub summary: SubmissionSummary,
    pub result: DeletionResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportAction {
    Exported,
    Kept,
    RemovedEmpty,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportedFile {
    pub project: String,
    pub path: String,
    pub rows: usize,
    pub action: ExportAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub node: String,
    pub files: Vec<ExportedFile>,
    pub master: Option<String>,
    pub total_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderResult {
    pub dir: String,
    pub nodes: Vec<NodeDepth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestResult {
    pub manifest: String,
    pub output: String,
    pub index_records: usize,
    pub index_file: Option<String>,
    pub entries: Vec<ManifestEntry>,
}

pub enum DictionarySource<'a> {
    File(&'a Path),
    Remote,
}

#[derive(Clone)]
pub struct App<S: SubmissionClient, I: IndexClient> {
    config: SessionConfig,
    submission: S,
    index: I,
}

impl<S: SubmissionClient, I: IndexClient> App<S, I> {
    pub fn new(config: SessionConfig, submission: S, index: I) -> Self {
        Self {
            config,
            submission,
            index,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn submit_file(
        &self,
        path: &Path,
        project: &ProjectId,
        options: SubmitOptions,
        response_log: Option<&Path>,
        failure_dir: Option<&Path>,
        sink: &dyn ProgressSink,
    ) -> Result<SubmitFileResult, Gen3Error> {
        sink.event(ProgressEvent {
            message: format!("phase=Load; reading {}", path.display()),
            elapsed: None,
        });
        let dataset = Dataset::load(path)?;
        info!("{} rows read from {}", dataset.len(), path.display());

        let result = match Submitter::new(&self.submission).submit(project, &dataset, options, sink)
        {
            Ok(result) => result,
            Err(err) => {
                if let Some(partial) = err.partial_result() {
                    let summary = partial.summary();
                    warn!(
                        "submission stopped: {} succeeded, {} invalid, {} unhandled before the failure",
                        summary.succeeded, summary.invalid, summary.unhandled
                    );
                    Self::write_submission_files(path, &dataset, partial, response_log, failure_dir)?;
                }
                return Err(err);
            }
        };
        let (response_log, failure_files) =
            Self::write_submission_files(path, &dataset, &result, response_log, failure_dir)?;

        Ok(SubmitFileResult {
            file: path.display().to_string(),
            project: project.to_string(),
            summary: result.summary(),
            response_log,
            failure_files,
            result,
        })
    }

    fn write_submission_files(
        path: &Path,
        dataset: &Dataset,
        result: &SubmissionResult,
        response_log: Option<&Path>,
        failure_dir: Option<&Path>,
    ) -> Result<(Option<String>, Option<FailureFiles>), Gen3Error> {
        let response_log = match response_log {
            Some(log) => {
                result.write_response_log(log)?;
                info!("response log written to {}", log.display());
                Some(log.display().to_string())
            }
            None => None,
        };
        let failure_files = match failure_dir {
            Some(dir) => {
                let name = file_name(path)?;
                Some(result.write_failure_tsvs(dataset, dir, name)?)
            }
            None => None,
        };
        Ok((response_log, failure_files))
    }

    /// Deletes the records listed in the `id` column of a TSV.
    pub fn delete_file_records(
        &self,
        path: &Path,
        project: &ProjectId,
        chunk_size: usize,
        sink: &dyn ProgressSink,
    ) -> Result<DeleteFileResult, Gen3Error> {
        let dataset = Dataset::load(path)?;
        let table = path.display().to_string();
        let column = dataset.require_column(ID_COLUMN, &table)?;
        let ids = (0..dataset.len())
            .map(|row| dataset.cell(row, column).to_string())
            .collect::<Vec<_>>();
        let result =
            Submitter::new(&self.submission).delete_records(project, &ids, chunk_size, sink)?;
        Ok(DeleteFileResult {
            file: table,
            project: project.to_string(),
            summary: result.summary(),
            result,
        })
    }

    /// Exports `{project}_{node}.tsv` per project into `dir` and merges them
    /// into `master_{node}.tsv`.
    pub fn export_node_tsvs(
        &self,
        node: &str,
        projects: &[ProjectId],
        dir: &Utf8Path,
        overwrite: bool,
        remove_empty: bool,
        sink: &dyn ProgressSink,
    ) -> Result<ExportResult, Gen3Error> {
        let started = Instant::now();
        fs::create_dir_all(dir)
            .map_err(|err| Gen3Error::Filesystem(format!("create {dir}: {err}")))?;

        let mut files = Vec::new();
        let mut tables = Vec::new();
        for project in projects {
            let path = dir.join(format!("{project}_{node}.tsv"));
            sink.event(ProgressEvent {
                message: format!("phase=Export; {node} from {project}"),
                elapsed: Some(started.elapsed()),
            });

            let (dataset, mut action) = if path.exists() && !overwrite {
                info!("{path} previously downloaded");
                (Dataset::load(path.as_std_path())?, ExportAction::Kept)
            } else {
                let body = self.submission.export_node(project, node)?;
                let dataset = Dataset::parse_tsv(&body)?;
                dataset.write_tsv(path.as_std_path())?;
                (dataset, ExportAction::Exported)
            };
            let rows = dataset.len();
            info!("{path} has {rows} records");

            if remove_empty && dataset.is_empty() {
                info!("removing empty file {path}");
                fs::remove_file(&path)
                    .map_err(|err| Gen3Error::Filesystem(format!("remove {path}: {err}")))?;
                action = ExportAction::RemovedEmpty;
            } else {
                tables.push(dataset);
            }
            files.push(ExportedFile {
                project: project.to_string(),
                path: path.to_string(),
                rows,
                action,
            });
        }

        let master = if tables.is_empty() {
            warn!("no {node} records found in any project");
            None
        } else {
            let merged = Dataset::concat(&tables);
            let path: Utf8PathBuf = dir.join(format!("master_{node}.tsv"));
            merged.write_tsv(path.as_std_path())?;
            info!("master {node} TSV with {} records written to {path}", merged.len());
            Some(path.to_string())
        };
        let total_rows = tables.iter().map(Dataset::len).sum();
        Ok(ExportResult {
            node: node.to_string(),
            files,
            master,
            total_rows,
        })
    }

    pub fn submission_order(
        &self,
        dictionary: DictionarySource<'_>,
        dir: &Path,
        prefix: &str,
        project: &str,
        suffix: &str,
    ) -> Result<OrderResult, Gen3Error> {
        let dictionary = match dictionary {
            DictionarySource::File(path) => DictionaryGraph::load(path)?,
            DictionarySource::Remote => self.submission.dictionary()?,
        };
        let nodes = discover_nodes(dir, prefix, project, suffix)?;
        info!("{} node files found in {}", nodes.len(), dir.display());
        let options = self.config.order_options();
        let order = OrderResolver::new(&dictionary, &options).submission_order(&nodes)?;
        Ok(OrderResult {
            dir: dir.display().to_string(),
            nodes: order,
        })
    }

    /// Converts a portal download script into a client manifest. Index records
    /// come from `index_file` when it exists, otherwise they are fetched and
    /// saved for the next run.
    pub fn convert_manifest(
        &self,
        manifest: &Path,
        index_file: Option<&Path>,
        output: Option<&Path>,
        sink: &dyn ProgressSink,
    ) -> Result<ManifestResult, Gen3Error> {
        let text = fs::read_to_string(manifest)
            .map_err(|err| Gen3Error::Filesystem(format!("read {}: {err}", manifest.display())))?;
        let locations = parse_dcc_manifest(&text);
        info!("found {} files in {}", locations.len(), manifest.display());

        let (records, index_file) = match index_file {
            Some(path) if path.exists() => {
                let records = load_records(path)?;
                info!("{} file records found in {}", records.len(), path.display());
                (records, Some(path.to_path_buf()))
            }
            explicit => {
                let records = self.fetch_index(sink)?;
                let path = match explicit {
                    Some(path) => path.to_path_buf(),
                    None => default_index_file(&self.config.endpoint, manifest)?,
                };
                save_records(&path, &records)?;
                info!("index records saved to {}", path.display());
                (records, Some(path))
            }
        };

        let entries = build_client_manifest(&locations, &records)?;
        let output = match output {
            Some(path) => path.to_path_buf(),
            None => default_manifest_path(manifest)?,
        };
        write_client_manifest(&output, &entries)?;
        info!("manifest with {} entries written to {}", entries.len(), output.display());

        Ok(ManifestResult {
            manifest: manifest.display().to_string(),
            output: output.display().to_string(),
            index_records: records.len(),
            index_file: index_file.map(|path| path.display().to_string()),
            entries,
        })
    }

    fn fetch_index(&self, sink: &dyn ProgressSink) -> Result<Vec<IndexRecord>, Gen3Error> {
        match self.index.stats() {
            Ok(stats) => info!(
                "index stats for {}: {} files, {} bytes",
                self.config.endpoint,
                stats.file_count.unwrap_or_default(),
                stats.total_file_size.unwrap_or_default()
            ),
            Err(err) => warn!("unable to read index stats: {err}"),
        }
        fetch_all_records(&self.index, self.config.index_page_limit, 0, sink)
    }
}

/// `{host}_indexd_records.json` next to the manifest.
pub fn default_index_file(endpoint: &str, manifest: &Path) -> Result<PathBuf, Gen3Error> {
    let host = endpoint
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(endpoint)
        .split('/')
        .next()
        .filter(|host| !host.is_empty())
        .unwrap_or("commons");
    let dir = manifest.parent().unwrap_or_else(|| Path::new(""));
    Ok(dir.join(format!("{host}_indexd_records.json")))
}

/// `{stem}_submission_{timestamp}.log` next to the submitted file.
pub fn default_response_log(path: &Path) -> Result<PathBuf, Gen3Error> {
    let name = file_name(path)?;
    let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    Ok(dir.join(format!("{stem}_submission_{stamp}.log")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_file_named_after_host() {
        let path =
            default_index_file("https://data.example.org/", Path::new("/tmp/dcc.sh")).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/data.example.org_indexd_records.json"));
    }

    #[test]
    fn response_log_next_to_input() {
        let path = default_response_log(Path::new("/data/case.tsv")).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("case_submission_"));
        assert!(name.ends_with(".log"));
        assert_eq!(path.parent().unwrap(), Path::new("/data"));
    }
}

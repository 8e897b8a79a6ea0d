use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use gen3_expansion::app::{App, DictionarySource, default_response_log};
use gen3_expansion::config::{ConfigLoader, SessionConfig};
use gen3_expansion::domain::ProjectId;
use gen3_expansion::error::Gen3Error;
use gen3_expansion::indexd::IndexHttpClient;
use gen3_expansion::migration::{EditOutcome, MigrationWorkspace};
use gen3_expansion::output::{JsonOutput, TracingSink};
use gen3_expansion::sheepdog::SheepdogHttpClient;
use gen3_expansion::submitter::SubmitOptions;

#[derive(Parser)]
#[command(name = "gen3x")]
#[command(about = "Submission, ordering, migration and manifest tooling for Gen3 data commons")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Submit a TSV/CSV of records in adaptive chunks")]
    Submit(SubmitArgs),
    #[command(about = "Delete the records listed in the id column of a TSV")]
    Delete(DeleteArgs),
    #[command(about = "Export a node as TSV from one or more projects")]
    Export(ExportArgs),
    #[command(about = "Compute the submission order of node TSVs in a directory")]
    Order(OrderArgs),
    #[command(about = "Convert a DCC download script into a client manifest")]
    Manifest(ManifestArgs),
    #[command(about = "Edit node TSVs on disk for a data model change")]
    Migrate(MigrateArgs),
}

#[derive(Args)]
struct SubmitArgs {
    file: PathBuf,

    #[arg(long)]
    project: String,

    #[arg(long)]
    chunk_size: Option<usize>,

    #[arg(long, default_value_t = 0)]
    row_offset: usize,

    /// Write raw responses to this file, or next to the input when no path is given.
    #[arg(long)]
    log: Option<Option<PathBuf>>,

    /// Write invalid_/missing_ TSVs of unsubmitted rows into this directory.
    #[arg(long)]
    failures: Option<PathBuf>,
}

#[derive(Args)]
struct DeleteArgs {
    file: PathBuf,

    #[arg(long)]
    project: String,

    #[arg(long)]
    chunk_size: Option<usize>,
}

#[derive(Args)]
struct ExportArgs {
    node: String,

    #[arg(long = "project", required = true)]
    projects: Vec<String>,

    #[arg(long)]
    dir: Option<Utf8PathBuf>,

    #[arg(long)]
    overwrite: bool,

    #[arg(long)]
    keep_empty: bool,
}

#[derive(Args)]
struct OrderArgs {
    /// Dictionary JSON file; fetched from the commons when omitted.
    #[arg(long)]
    dictionary: Option<PathBuf>,

    #[arg(long, default_value = ".")]
    dir: PathBuf,

    #[arg(long, default_value = "temp")]
    prefix: String,

    #[arg(long)]
    project: String,

    #[arg(long, default_value = "tsv")]
    suffix: String,
}

#[derive(Args)]
struct ManifestArgs {
    #[arg(long)]
    manifest: PathBuf,

    #[arg(long)]
    index_file: Option<PathBuf>,

    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct MigrateArgs {
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    #[arg(long, default_value = "temp")]
    prefix: String,

    #[arg(long)]
    project: String,

    #[command(subcommand)]
    op: MigrateOp,
}

#[derive(Subcommand)]
enum MigrateOp {
    #[command(about = "Copy {pattern}*{suffix} files to {name}_{file}")]
    MakeTempFiles {
        #[arg(long)]
        pattern: String,
        #[arg(long, default_value = ".tsv")]
        suffix: String,
        #[arg(long, default_value = "temp")]
        name: String,
    },
    MergeNodes {
        #[arg(long = "in", required = true)]
        in_nodes: Vec<String>,
        #[arg(long = "out")]
        out_node: String,
    },
    AddMissingLinks {
        #[arg(long)]
        node: String,
        #[arg(long)]
        link: String,
    },
    CreateMissingLinks {
        #[arg(long)]
        node: String,
        #[arg(long)]
        link: String,
        #[arg(long)]
        old_parent: String,
        /// Fixed property for every created record, as key=value.
        #[arg(long = "property", value_parser = parse_pair)]
        properties: Vec<(String, String)>,
    },
    MoveProperties {
        #[arg(long = "from")]
        from_node: String,
        #[arg(long = "to")]
        to_node: String,
        #[arg(long = "property", required = true)]
        properties: Vec<String>,
        #[arg(long)]
        parent: String,
    },
    ChangePropertyNames {
        #[arg(long)]
        node: String,
        /// Rename as old=new.
        #[arg(long = "rename", required = true, value_parser = parse_pair)]
        renames: Vec<(String, String)>,
    },
    DropProperties {
        #[arg(long)]
        node: String,
        #[arg(long = "property", required = true)]
        properties: Vec<String>,
    },
    DropLinks {
        #[arg(long)]
        node: String,
        #[arg(long = "link", required = true)]
        links: Vec<String>,
    },
    MergeLinks {
        #[arg(long)]
        node: String,
        #[arg(long)]
        link: String,
        #[arg(long = "merge", required = true)]
        links_to_merge: Vec<String>,
    },
}

fn parse_pair(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{value}`"))
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<Gen3Error>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &Gen3Error) -> u8 {
    match error {
        Gen3Error::InvalidProjectId(_)
        | Gen3Error::UnsupportedFormat(_)
        | Gen3Error::DuplicateSubmitterIds(_)
        | Gen3Error::MissingColumn { .. }
        | Gen3Error::TableParse { .. }
        | Gen3Error::InvalidChunkSize(_)
        | Gen3Error::ConfigRead(_)
        | Gen3Error::ConfigParse(_)
        | Gen3Error::DictionaryParse(_)
        | Gen3Error::ManifestParse(_)
        | Gen3Error::OrderResolution { .. }
        | Gen3Error::MissingIndexRecord(_) => 2,
        Gen3Error::SubmissionHttp(_)
        | Gen3Error::SubmissionStatus { .. }
        | Gen3Error::IndexHttp(_)
        | Gen3Error::IndexStatus { .. } => 3,
        Gen3Error::SubmissionTimeout { .. } | Gen3Error::AmbiguousFailure { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint.trim_end_matches('/').to_string();
    }

    let app = build_app(config)?;
    run_command(cli.command, &app)
}

fn build_app(config: SessionConfig) -> miette::Result<App<SheepdogHttpClient, IndexHttpClient>> {
    let submission = SheepdogHttpClient::new(&config)?;
    let index = IndexHttpClient::new(&config)?;
    Ok(App::new(config, submission, index))
}

fn run_command(
    command: Commands,
    app: &App<SheepdogHttpClient, IndexHttpClient>,
) -> miette::Result<()> {
    match command {
        Commands::Submit(args) => {
            let project = args.project.parse::<ProjectId>()?;
            let options = SubmitOptions {
                chunk_size: args.chunk_size.unwrap_or(app.config().chunk_size),
                row_offset: args.row_offset,
            };
            let log = match args.log {
                Some(Some(path)) => Some(path),
                Some(None) => Some(default_response_log(&args.file)?),
                None => None,
            };
            let result = app.submit_file(
                &args.file,
                &project,
                options,
                log.as_deref(),
                args.failures.as_deref(),
                &TracingSink,
            )?;
            JsonOutput::print_submit(&result).into_diagnostic()
        }
        Commands::Delete(args) => {
            let project = args.project.parse::<ProjectId>()?;
            let chunk_size = args.chunk_size.unwrap_or(app.config().chunk_size);
            let result = app.delete_file_records(&args.file, &project, chunk_size, &TracingSink)?;
            JsonOutput::print_delete(&result).into_diagnostic()
        }
        Commands::Export(args) => {
            let projects = args
                .projects
                .iter()
                .map(|project| project.parse::<ProjectId>())
                .collect::<Result<Vec<_>, _>>()?;
            let dir = args
                .dir
                .unwrap_or_else(|| Utf8PathBuf::from(format!("{}_tsvs", args.node)));
            let result = app.export_node_tsvs(
                &args.node,
                &projects,
                &dir,
                args.overwrite,
                !args.keep_empty,
                &TracingSink,
            )?;
            JsonOutput::print_export(&result).into_diagnostic()
        }
        Commands::Order(args) => {
            let source = match args.dictionary.as_deref() {
                Some(path) => DictionarySource::File(path),
                None => DictionarySource::Remote,
            };
            let result =
                app.submission_order(source, &args.dir, &args.prefix, &args.project, &args.suffix)?;
            JsonOutput::print_order(&result).into_diagnostic()
        }
        Commands::Manifest(args) => {
            let result = app.convert_manifest(
                &args.manifest,
                args.index_file.as_deref(),
                args.output.as_deref(),
                &TracingSink,
            )?;
            JsonOutput::print_manifest(&result).into_diagnostic()
        }
        Commands::Migrate(args) => run_migrate(args),
    }
}

fn run_migrate(args: MigrateArgs) -> miette::Result<()> {
    let workspace = MigrationWorkspace::new(&args.dir, &args.prefix, &args.project);
    let outcomes = match args.op {
        MigrateOp::MakeTempFiles {
            pattern,
            suffix,
            name,
        } => copied_outcomes(&args.dir, &pattern, &suffix, &name)?,
        MigrateOp::MergeNodes { in_nodes, out_node } => {
            vec![workspace.merge_nodes(&in_nodes, &out_node)?]
        }
        MigrateOp::AddMissingLinks { node, link } => {
            vec![workspace.add_missing_links(&node, &link)?]
        }
        MigrateOp::CreateMissingLinks {
            node,
            link,
            old_parent,
            properties,
        } => {
            let properties = properties.into_iter().collect::<BTreeMap<_, _>>();
            vec![workspace.create_missing_links(&node, &link, &old_parent, &properties)?]
        }
        MigrateOp::MoveProperties {
            from_node,
            to_node,
            properties,
            parent,
        } => vec![workspace.move_properties(&from_node, &to_node, &properties, &parent)?],
        MigrateOp::ChangePropertyNames { node, renames } => {
            let renames = renames.into_iter().collect::<BTreeMap<_, _>>();
            vec![workspace.change_property_names(&node, &renames)?]
        }
        MigrateOp::DropProperties { node, properties } => {
            vec![workspace.drop_properties(&node, &properties)?]
        }
        MigrateOp::DropLinks { node, links } => vec![workspace.drop_links(&node, &links)?],
        MigrateOp::MergeLinks {
            node,
            link,
            links_to_merge,
        } => vec![workspace.merge_links(&node, &link, &links_to_merge)?],
    };
    JsonOutput::print_edits(&outcomes).into_diagnostic()
}

fn copied_outcomes(
    dir: &Path,
    pattern: &str,
    suffix: &str,
    name: &str,
) -> Result<Vec<EditOutcome>, Gen3Error> {
    let copies = MigrationWorkspace::make_temp_files(dir, pattern, suffix, name)?;
    Ok(copies
        .into_iter()
        .map(|file| EditOutcome {
            file,
            rows: 0,
            changed: 0,
            written: true,
        })
        .collect())
}

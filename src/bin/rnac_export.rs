use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use rnacentral_export::config::{ConfigLoader, ExportConfig};
use rnacentral_export::database::PostgresRecordStore;
use rnacentral_export::domain::{ExportFormat, JobId};
use rnacentral_export::enrich::{EnrichedRecord, RecordStore};
use rnacentral_export::error::{ExportError, FailureKind};
use rnacentral_export::jobs::JobRegistry;
use rnacentral_export::output::{JsonOutput, LogSink};
use rnacentral_export::pipeline::ExportPipeline;
use rnacentral_export::progress::JobState;
use rnacentral_export::search::SearchHttpClient;
use rnacentral_export::sequence::{EslSfetchExtractor, SequenceExtractor};

#[derive(Parser)]
#[command(name = "rnac-export")]
#[command(about = "Export RNAcentral search results as txt, json or fasta archives")]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run one export job in the foreground")]
    Export(ExportArgs),
    #[command(about = "Print the resolved configuration")]
    Config,
}

#[derive(Args)]
struct ExportArgs {
    /// Search service URL, e.g. https://www.ebi.ac.uk/ebisearch/ws/rest/rnacentral?query=...&format=json
    url: String,

    #[arg(long, value_enum, default_value = "txt")]
    format: ExportFormat,

    #[arg(long)]
    results_dir: Option<Utf8PathBuf>,

    #[arg(long)]
    job_id: Option<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<ExportError>() {
                return ExitCode::from(map_exit_code(err.kind()));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(kind: FailureKind) -> u8 {
    match kind {
        FailureKind::InvalidRequest => 2,
        FailureKind::FetchFailure
        | FailureKind::MalformedResponse
        | FailureKind::EnrichmentFailure
        | FailureKind::ExtractionFailure => 3,
        FailureKind::Cancelled | FailureKind::Filesystem | FailureKind::Internal => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Export(args) => run_export(args, config),
        Commands::Config => {
            let json = serde_json::to_string_pretty(&config).into_diagnostic()?;
            let mut stdout = std::io::stdout();
            stdout.write_all(json.as_bytes()).into_diagnostic()?;
            stdout.write_all(b"\n").into_diagnostic()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_export(args: ExportArgs, mut config: ExportConfig) -> miette::Result<ExitCode> {
    if let Some(dir) = args.results_dir {
        config.results_dir = dir;
    }
    let job_id = match args.job_id {
        Some(value) => value.parse::<JobId>()?,
        None => JobId::generate(),
    };

    let store: Box<dyn RecordStore> = match (&config.database_url, args.format) {
        (Some(url), ExportFormat::Structured) => Box::new(PostgresRecordStore::connect_lazy(url)?),
        (None, ExportFormat::Structured) => {
            return Err(ExportError::InvalidRequest(
                "json export needs database_url (or RNAC_EXPORT_DATABASE_URL)".to_string(),
            )
            .into());
        }
        _ => Box::new(Unavailable),
    };
    let extractor: Box<dyn SequenceExtractor> = match args.format {
        ExportFormat::Sequence => Box::new(EslSfetchExtractor::from_config(&config.sequence)?),
        _ => Box::new(Unavailable),
    };
    let search = SearchHttpClient::new(&config.search)?;

    let pipeline = ExportPipeline::new(search, store, extractor, config);
    let registry = JobRegistry::new(pipeline).with_observer(Arc::new(LogSink::default()));
    let job_id = registry.submit_with_id(job_id, &args.url, args.format)?;
    let status = registry.wait(&job_id)?;

    JsonOutput::print_status(&status).into_diagnostic()?;
    match (&status.state, &status.error) {
        (JobState::Completed, _) => Ok(ExitCode::SUCCESS),
        (_, Some(error)) => Ok(ExitCode::from(map_exit_code(error.kind))),
        _ => Ok(ExitCode::from(1)),
    }
}

struct Unavailable;

impl RecordStore for Unavailable {
    fn fetch_records(&self, _ids: &[String]) -> Result<Vec<EnrichedRecord>, ExportError> {
        Err(ExportError::EnrichmentFailure(
            "no backing store configured".to_string(),
        ))
    }
}

impl SequenceExtractor for Unavailable {
    fn extract(&self, _id_list: &Path, _out: &mut dyn Write) -> Result<(), ExportError> {
        Err(ExportError::ExtractionFailure(
            "no sequence extractor configured".to_string(),
        ))
    }
}

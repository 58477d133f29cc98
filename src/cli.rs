//! Command-line front end: config loading, tracing setup, progress and summary rendering.

// crates.io
use clap::Parser;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
// self
use crate::{
	_prelude::*,
	batch::{BatchRun, BatchRunner, BatchSummary},
	config::BatchConfig,
	dispatch::{RenewalPolicy, TaskOutcome, TaskReport},
	error::{BoxError, ConfigError, TaskError},
	http::ReqwestHttpClient,
	operation::SoapSigningOperation,
	provider::TokenEndpointProvider,
};

const DEFAULT_LOG_FILTER: &str = "info";

/// Submits a batch of document-signing tasks with bounded concurrency.
#[derive(Debug, Parser)]
#[command(name = "signing-batch", version, about, long_about = None)]
pub struct Cli {
	/// Path to the batch configuration file.
	#[arg(short, long, default_value = "batch.toml")]
	pub config: PathBuf,
	/// Overrides `batch.task_count`.
	#[arg(long)]
	pub tasks: Option<usize>,
	/// Overrides `batch.concurrency_limit`.
	#[arg(long)]
	pub concurrency: Option<usize>,
	/// Coalesces concurrent credential renewals into one provider call.
	#[arg(long)]
	pub single_flight: bool,
	/// Tracing filter directive; falls back to `RUST_LOG`, then `info`.
	#[arg(long)]
	pub log_filter: Option<String>,
	/// Prints the final summary as JSON.
	#[arg(long)]
	pub json: bool,
}
impl Cli {
	/// Applies command-line overrides on top of the loaded configuration.
	pub fn apply_overrides(&self, config: &mut BatchConfig) -> Result<(), ConfigError> {
		if let Some(tasks) = self.tasks {
			config.batch.task_count = tasks;
		}
		if let Some(concurrency) = self.concurrency {
			config.batch.concurrency_limit = concurrency;
		}
		if self.single_flight {
			config.batch.renewal = RenewalPolicy::SingleFlight;
		}

		config.validate()
	}
}

/// Failures that stop the CLI before or after the batch runs.
#[derive(Debug, ThisError)]
pub enum CliError {
	/// Configuration could not be loaded or is invalid.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// The batch could not start.
	#[error(transparent)]
	Batch(#[from] Error),
	/// The `--log-filter` directive is invalid.
	#[error("Log filter is invalid.")]
	LogFilter(#[from] tracing_subscriber::filter::ParseError),
	/// A global tracing subscriber is already installed.
	#[error("Tracing subscriber could not be installed.")]
	Subscriber(#[source] BoxError),
	/// The summary could not be serialized.
	#[error("Summary could not be rendered as JSON.")]
	Render(#[from] serde_json::Error),
}

/// Installs a stderr `fmt` subscriber filtered by `filter`, `RUST_LOG` or `info`.
pub fn init_tracing(filter: Option<&str>) -> Result<(), CliError> {
	let filter = match filter {
		Some(directive) => EnvFilter::try_new(directive)?,
		None => EnvFilter::try_from_default_env()
			.unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
	};

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.try_init()
		.map_err(CliError::Subscriber)
}

/// Cancels `token` on the first Ctrl-C so tasks still waiting for a permit stop early.
pub fn cancel_on_ctrl_c(token: CancellationToken) -> JoinHandle<()> {
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			tracing::warn!("interrupt received; cancelling tasks that have not started");

			token.cancel();
		}
	})
}

/// Loads the configuration, builds the HTTP-backed provider and operation, and runs the batch.
pub async fn execute<P>(
	cli: &Cli,
	cancellation: CancellationToken,
	progress: P,
) -> Result<BatchRun, CliError>
where
	P: FnMut(&TaskReport),
{
	let mut config = BatchConfig::from_file(&cli.config)?;

	cli.apply_overrides(&mut config)?;

	let http_client = ReqwestHttpClient::with_timeout(config.timeout())?;
	let provider = TokenEndpointProvider::new(config.token_endpoint()?)?
		.with_http_client(http_client.clone());
	let operation = Arc::new(
		SoapSigningOperation::new(config.service_descriptor()?, &config.signing_request()?)
			.with_http_client(http_client),
	);
	let runner = BatchRunner::new(Arc::new(provider), config.principal(), config.concurrency()?)
		.with_renewal_policy(config.batch.renewal)
		.with_cancellation(cancellation);

	tracing::info!(
		config = %cli.config.display(),
		tasks = config.batch.task_count,
		concurrency = config.batch.concurrency_limit,
		renewal = ?config.batch.renewal,
		"loaded batch configuration"
	);

	let run = runner
		.run_with_progress(config.batch.task_count, |_| operation.clone(), progress)
		.await?;

	Ok(run)
}

/// Writes one `completed/total` progress line to stderr.
pub fn print_progress(report: &TaskReport) {
	eprintln!("{}", render_progress(report));
}

/// Formats one progress line.
pub fn render_progress(report: &TaskReport) -> String {
	let status = match &report.outcome {
		TaskOutcome::Succeeded(_) => "succeeded",
		TaskOutcome::Failed(_) => "failed",
	};

	format!("[{}/{}] task {} {status}", report.completed, report.total, report.task)
}

/// Renders the final summary, with each failure's error chain, as text or JSON.
///
/// Failures that went through a renewal also carry the unauthorized first attempt, which the
/// error chain alone does not reach.
pub fn render_summary(run: &BatchRun, json: bool) -> Result<String, CliError> {
	let failures = run
		.result
		.failures()
		.map(|(task, err)| FailedTask {
			task: task.get(),
			error: error_chain(err),
			first_cause: renewed_first_cause(err).map(error_chain),
		})
		.collect::<Vec<_>>();

	if json {
		return Ok(serde_json::to_string_pretty(&SummaryReport { summary: &run.summary, failures })?);
	}

	let BatchSummary {
		total,
		succeeded,
		failed,
		cancelled,
		renewals,
		coalesced_renewals,
		invocations,
		peak_in_flight,
	} = &run.summary;
	let mut out = format!(
		"total={total} succeeded={succeeded} failed={failed} cancelled={cancelled} \
		renewals={renewals} coalesced_renewals={coalesced_renewals} invocations={invocations} \
		peak_in_flight={peak_in_flight}"
	);

	for failure in failures {
		out.push_str(&format!("\ntask #{}: {}", failure.task, failure.error));

		if let Some(first_cause) = failure.first_cause {
			out.push_str(&format!(" (first attempt: {first_cause})"));
		}
	}

	Ok(out)
}

/// Joins an error and all of its sources with `: `.
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
	let mut out = err.to_string();
	let mut source = err.source();

	while let Some(cause) = source {
		out.push_str(": ");
		out.push_str(&cause.to_string());

		source = cause.source();
	}

	out
}

// For `Operation` failures the first cause is already the error source.
fn renewed_first_cause(err: &TaskError) -> Option<&(dyn StdError + 'static)> {
	match err {
		TaskError::RenewalFailed { unauthorized, .. }
		| TaskError::RenewalExhausted { unauthorized, .. } => Some(unauthorized),
		TaskError::Operation { .. } | TaskError::Cancelled => None,
	}
}

#[derive(Serialize)]
struct SummaryReport<'a> {
	#[serde(flatten)]
	summary: &'a BatchSummary,
	failures: Vec<FailedTask>,
}

#[derive(Serialize)]
struct FailedTask {
	task: usize,
	error: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	first_cause: Option<String>,
}

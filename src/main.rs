//! `signing-batch` binary: runs one configured batch and prints its summary.

// crates.io
use clap::Parser;
// self
use signing_batch::{
	CancellationToken,
	cli::{self, Cli},
};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let cli = Cli::parse();

	cli::init_tracing(cli.log_filter.as_deref())?;

	let cancellation = CancellationToken::new();
	let _interrupt = cli::cancel_on_ctrl_c(cancellation.clone());
	let run = cli::execute(&cli, cancellation, cli::print_progress).await?;

	println!("{}", cli::render_summary(&run, cli.json)?);

	Ok(())
}

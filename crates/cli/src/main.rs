use clap::Parser;
use sbx_cli::cli::Cli;
use sbx_cli::{commands, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	commands::dispatch(cli).await?;
	Ok(())
}

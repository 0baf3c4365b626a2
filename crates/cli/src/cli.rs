use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use sbx_protocol::SandboxId;

use crate::styles::cli_styles;


#[derive(Parser, Debug)]
#[command(name = "sbx")]
#[command(about = "Session-resilient connections to remote sandboxes")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Config file (default: $XDG_CONFIG_HOME/sbx/config.json)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Platform API base URL (overrides SBX_API_URL)
	#[arg(long, global = true, value_name = "URL")]
	pub api_url: Option<String>,

	/// API token (overrides SBX_API_TOKEN)
	#[arg(long, global = true, value_name = "TOKEN")]
	pub token: Option<String>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// List sandboxes as JSON lines
	#[command(alias = "ls")]
	List(ListArgs),

	/// Connect to a sandbox and keep the live client alive
	Connect(ConnectArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
	/// Page to fetch (1-based)
	#[arg(long, default_value_t = 1)]
	pub page: u32,

	/// Sandboxes per page
	#[arg(long, default_value_t = 50)]
	pub page_size: u32,
}

#[derive(Args, Debug)]
pub struct ConnectArgs {
	/// Sandbox id
	pub id: SandboxId,

	/// Title to attach when the listing has none
	#[arg(long)]
	pub title: Option<String>,

	/// Tags to attach (repeatable)
	#[arg(long = "tag", value_name = "TAG")]
	pub tags: Vec<String>,

	/// Send one RPC request, print the response and disconnect
	#[arg(long, value_name = "METHOD")]
	pub request: Option<String>,

	/// JSON params for --request
	#[arg(long, value_name = "JSON", requires = "request")]
	pub params: Option<String>,
}

mod connect;
mod list;

use sbx_runtime::HttpSandboxApi;
use tracing::debug;

use crate::cli::{Cli, Commands};
use crate::config::{self, Config, Overrides, Settings};
use crate::error::Result;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let config_path = cli.config.unwrap_or_else(config::default_config_path);
	let config = Config::load(&config_path)?;
	let settings = Settings::resolve(
		config,
		Overrides {
			api_url: cli.api_url,
			api_token: cli.token,
		},
		|key| std::env::var(key).ok(),
	);
	debug!(
		target: "sbx.cli",
		config = %config_path.display(),
		api_url = %settings.api_url,
		authenticated = settings.api_token.is_some(),
		"resolved settings"
	);

	let api = build_api(&settings)?;
	match cli.command {
		Commands::List(args) => list::execute(&api, args).await,
		Commands::Connect(args) => connect::execute(std::sync::Arc::new(api), &settings, args).await,
	}
}

fn build_api(settings: &Settings) -> Result<HttpSandboxApi> {
	let mut builder = HttpSandboxApi::builder(settings.api_url.as_str());
	if let Some(token) = &settings.api_token {
		builder = builder.token(token.as_str());
	}
	Ok(builder.build()?)
}

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

pub fn init_logging(verbosity: u8) {
	// 0 = warnings only (reconnect failures still surface)
	// 1 (-v) = connection progress from sbx targets
	// 2+ (-vv) = debug for everything, including frames and HTTP calls
	let filter = match verbosity {
		0 => "warn",
		1 => "warn,sbx=info,sbx_cli=info",
		_ => "debug,hyper=info,rustls=info",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}

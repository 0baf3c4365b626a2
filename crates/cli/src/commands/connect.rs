use std::io::Write;
use std::sync::Arc;

use sbx_protocol::{RpcNotification, SandboxId, SandboxMetadata};
use sbx_runtime::{ConnectOptions, Connection, ConnectionManager, ConnectionState, ListOptions, SandboxApi, WebSocketTransport};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::cli::ConnectArgs;
use crate::config::Settings;
use crate::error::{CliError, Result};
use crate::visibility::TerminalVisibility;

pub async fn execute(api: Arc<dyn SandboxApi>, settings: &Settings, args: ConnectArgs) -> Result<()> {
	let params = args
		.params
		.as_deref()
		.map(serde_json::from_str::<Value>)
		.transpose()
		.map_err(CliError::InvalidParams)?
		.unwrap_or(Value::Null);

	let listing = lookup_metadata(api.as_ref(), &args.id).await;
	let metadata = caller_metadata(listing, args.title, args.tags);

	let terminal = TerminalVisibility::install()?;
	let transport = WebSocketTransport::new()
		.with_reconnect_policy(settings.reconnect)
		.with_health_check_timeout(settings.health_check_timeout);
	let manager = ConnectionManager::new(api, Arc::new(transport), terminal.source());

	let options = ConnectOptions::default()
		.with_metadata(metadata)
		.on_init_progress(|progress| info!(target: "sbx.cli", %progress, "connecting"));
	let connection = manager.connect(&args.id, options).await?;

	let sandbox = connection.sandbox();
	info!(
		target: "sbx.cli",
		sandbox = %sandbox.id,
		title = sandbox.title().unwrap_or("-"),
		"connected"
	);

	match args.request {
		Some(method) => {
			let result = connection.request(&method, params).await;
			manager.disconnect(&connection).await;
			let value = result?;
			println!("{}", serde_json::to_string_pretty(&value)?);
			Ok(())
		}
		None => watch_until_interrupted(&connection).await,
	}
}

/// Listing metadata for `id`, if the first page of sandboxes has it.
async fn lookup_metadata(api: &dyn SandboxApi, id: &SandboxId) -> Option<SandboxMetadata> {
	match api.list_sandboxes(ListOptions::default()).await {
		Ok(page) => page.find(id).map(|summary| summary.metadata()),
		Err(err) => {
			warn!(target: "sbx.cli", sandbox = %id, error = %err, "sandbox lookup failed; continuing without listing metadata");
			None
		}
	}
}

/// Listing metadata with `--title`/`--tag` taking precedence.
fn caller_metadata(listing: Option<SandboxMetadata>, title: Option<String>, tags: Vec<String>) -> SandboxMetadata {
	let mut metadata = listing.unwrap_or_default();
	if title.is_some() {
		metadata.title = title;
	}
	if !tags.is_empty() {
		metadata.tags = tags;
	}
	metadata
}

/// Prints state changes and notifications as JSON lines until Ctrl-C or
/// until the connection is lost for good.
async fn watch_until_interrupted(connection: &Connection) -> Result<()> {
	let outcome = follow(
		connection.watch_state(),
		connection.notifications(),
		tokio::signal::ctrl_c(),
		&mut std::io::stdout(),
	)
	.await;
	connection.disconnect().await;
	outcome
}

/// Writes one JSON line per state change or notification.
///
/// Returns `Ok` when interrupted or when either stream closes, and
/// [`CliError::ConnectionLost`] once the state reaches `Error`: the
/// transport has given up and nothing will bring the connection back.
async fn follow<W: Write>(
	mut state: watch::Receiver<ConnectionState>,
	mut notifications: broadcast::Receiver<RpcNotification>,
	interrupt: impl Future<Output = std::io::Result<()>>,
	out: &mut W,
) -> Result<()> {
	tokio::pin!(interrupt);

	let initial = *state.borrow_and_update();
	writeln!(out, "{}", json!({"state": initial.to_string()}))?;
	if let ConnectionState::Error(kind) = initial {
		return Err(CliError::ConnectionLost(kind));
	}

	loop {
		tokio::select! {
			changed = state.changed() => {
				if changed.is_err() {
					return Ok(());
				}
				let current = *state.borrow_and_update();
				writeln!(out, "{}", json!({"state": current.to_string()}))?;
				if let ConnectionState::Error(kind) = current {
					warn!(target: "sbx.cli", %kind, "connection lost");
					return Err(CliError::ConnectionLost(kind));
				}
			}
			notification = notifications.recv() => match notification {
				Ok(notification) => writeln!(out, "{}", json!({"notification": notification}))?,
				Err(RecvError::Lagged(skipped)) => warn!(target: "sbx.cli", skipped, "notification stream lagged"),
				Err(RecvError::Closed) => return Ok(()),
			},
			interrupted = &mut interrupt => {
				info!(target: "sbx.cli", "interrupted; disconnecting");
				return interrupted.map_err(CliError::from);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use sbx_runtime::ErrorKind;

	use super::*;

	#[test]
	fn flags_override_listing_metadata() {
		let listing = SandboxMetadata::default().with_title("From listing").with_tags(["listed"]);

		let metadata = caller_metadata(Some(listing.clone()), Some("Mine".into()), Vec::new());
		assert_eq!(metadata.title.as_deref(), Some("Mine"));
		assert_eq!(metadata.tags, vec!["listed"]);

		let metadata = caller_metadata(Some(listing), None, vec!["x".into(), "y".into()]);
		assert_eq!(metadata.title.as_deref(), Some("From listing"));
		assert_eq!(metadata.tags, vec!["x", "y"]);
	}

	#[test]
	fn missing_listing_is_tolerated() {
		let metadata = caller_metadata(None, None, Vec::new());
		assert!(metadata.is_empty());

		let metadata = caller_metadata(None, Some("Demo".into()), Vec::new());
		assert_eq!(metadata.title.as_deref(), Some("Demo"));
	}

	#[tokio::test]
	async fn lost_connection_ends_the_watch_with_its_kind() {
		let (state_tx, state) = watch::channel(ConnectionState::Connected);
		let (_notify_tx, notifications) = broadcast::channel(4);
		let mut out = Vec::new();

		let watching = async {
			state_tx.send_replace(ConnectionState::Reconnecting);
			tokio::task::yield_now().await;
			state_tx.send_replace(ConnectionState::Error(ErrorKind::Transport));
		};
		let (outcome, ()) = tokio::join!(follow(state, notifications, std::future::pending(), &mut out), watching);

		assert!(matches!(outcome, Err(CliError::ConnectionLost(ErrorKind::Transport))));
		let lines = String::from_utf8(out).unwrap();
		assert_eq!(lines.lines().next(), Some(r#"{"state":"connected"}"#));
		assert_eq!(lines.lines().last(), Some(r#"{"state":"error(transport)"}"#));
	}

	#[tokio::test]
	async fn interrupt_ends_the_watch_cleanly() {
		let (_state_tx, state) = watch::channel(ConnectionState::Connected);
		let (_notify_tx, notifications) = broadcast::channel(4);
		let mut out = Vec::new();

		follow(state, notifications, std::future::ready(Ok(())), &mut out).await.unwrap();

		assert_eq!(String::from_utf8(out).unwrap(), "{\"state\":\"connected\"}\n");
	}
}

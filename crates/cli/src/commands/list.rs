use std::io::Write;

use sbx_runtime::{ListOptions, SandboxApi, SandboxPage};
use tracing::info;

use crate::cli::ListArgs;
use crate::error::Result;

pub async fn execute(api: &dyn SandboxApi, args: ListArgs) -> Result<()> {
	let page = api
		.list_sandboxes(ListOptions {
			page: args.page,
			page_size: args.page_size,
		})
		.await?;

	let stdout = std::io::stdout();
	write_page(&mut stdout.lock(), &page)?;

	if let Some(next) = page.pagination.next_page {
		info!(target: "sbx.cli", next_page = next, total = page.pagination.total_records, "more sandboxes available");
	}
	Ok(())
}

/// One JSON object per line.
fn write_page(out: &mut impl Write, page: &SandboxPage) -> Result<()> {
	for sandbox in &page.sandboxes {
		serde_json::to_writer(&mut *out, sandbox)?;
		writeln!(out)?;
	}
	out.flush()?;
	Ok(())
}

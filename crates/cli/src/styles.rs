//! Help output colors, in cargo's palette.

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;

/// Headers and usage in bold green; literals, placeholders and valid values in cyan.
pub fn cli_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Green.on_default().bold())
		.usage(AnsiColor::Green.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
		.valid(AnsiColor::Cyan.on_default())
}

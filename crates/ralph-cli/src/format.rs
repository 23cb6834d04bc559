//! Output-format selection for commands that can render as human-readable
//! text or machine-readable JSON (`status`, `inspect`, `doctor`).

use std::fmt;

use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Render `value` under the requested format, falling through to `render`
/// for text mode so each command controls its own human-readable layout.
///
/// # Panics
/// Panics if `value` cannot be serialized to JSON, which only happens for
/// programmer error (e.g. a map with non-string keys).
pub fn emit<T: Serialize>(format: OutputFormat, value: &T, render: impl FnOnce(&T) -> String) {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value).expect("report value must serialize");
            println!("{json}");
        }
        OutputFormat::Text => println!("{}", render(value)),
    }
}

//! Tracing subscriber setup

use std::fs::OpenOptions;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use crate::error::CliError;

/// Install the global subscriber. `RUST_LOG` wins over `default_filter`;
/// `output` is a file path or `-` for stderr.
pub fn init_tracing(default_filter: &str, output: &str, json: bool) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| CliError::Logging(e.to_string()))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = if output == "-" {
        if json {
            builder.json().with_writer(std::io::stderr).try_init()
        } else {
            builder.with_writer(std::io::stderr).try_init()
        }
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(Path::new(output))?;
        if json {
            builder.json().with_writer(file).try_init()
        } else {
            builder.with_ansi(false).with_writer(file).try_init()
        }
    };
    result.map_err(|e| CliError::Logging(e.to_string()))
}

/// Tracing subscriber setup for the CLI

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over the verbosity flag.
pub fn init(verbosity: u8) {
    let default_level = match verbosity {
        0 => "upkeep_cli=warn",
        1 => "upkeep_cli=info",
        2 => "upkeep_cli=debug",
        _ => "upkeep_cli=trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

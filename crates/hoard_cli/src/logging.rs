//! Tracing subscriber setup.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Environment variable overriding the log filter.
pub const LOG_ENV: &str = "HOARD_LOG";

static INIT_ONCE: Once = Once::new();

/// How much the CLI logs when `HOARD_LOG` is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Progress and summaries.
    Normal,
    /// Per-file detail.
    Verbose,
}

impl Verbosity {
    /// Maps the global `--quiet` / `--verbose` flags. Quiet wins.
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Normal
        }
    }

    fn default_filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "hoard_cache=info,hoard_cli=info,warn",
            Verbosity::Verbose => "hoard_cache=debug,hoard_cli=debug,hoard_config=debug,info",
        }
    }
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init(verbosity: Verbosity) {
    INIT_ONCE.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new(verbosity.default_filter()));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}

use clap::{Args, ValueEnum};
use derive_more::Display;
use tracing_subscriber::EnvFilter;

/// Output format of log lines.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    #[display("full")]
    Full,
    #[display("compact")]
    Compact,
    #[display("json")]
    Json,
}

/// Logging configuration, meant to be flattened into a binary's options.
///
/// Verbosity is controlled with the usual `RUST_LOG` directives and defaults to `info`.
#[derive(Clone, Debug, Default, Args)]
pub struct Config {
    /// Format of log output.
    #[clap(long = "log-format", env = "RUST_LOG_FORMAT", default_value = "full")]
    pub format: LogFormat,
}

impl Config {
    /// Install a global subscriber.
    ///
    /// Does nothing if a subscriber is already installed, so this can be called repeatedly
    /// from tests.
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let builder = tracing_subscriber::fmt().with_env_filter(filter);
        let res = match self.format {
            LogFormat::Full => builder.try_init(),
            LogFormat::Compact => builder.compact().try_init(),
            LogFormat::Json => builder.json().try_init(),
        };
        if let Err(err) = res {
            tracing::debug!("logging already initialized: {err}");
        }
    }
}

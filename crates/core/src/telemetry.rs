//! Process-wide tracing subscriber setup.

/// Log output format selected by the `LOG_FORMAT` environment variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "" => Ok(LogFormat::Pretty),
            other => Err(anyhow::anyhow!("unknown log format: {other}")),
        }
    }
}

/// Initialize the global `tracing` subscriber once. Safe to call more than
/// once; subsequent calls are no-ops so tests can invoke it freely.
pub fn init(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let result = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).try_init(),
    };
    if let Err(err) = result {
        tracing::debug!(%err, "tracing subscriber already initialized");
    }
}

use tracing_subscriber::EnvFilter;

pub const DEFAULT_DIRECTIVE: &str = "nekebot=info";

/// Filter from a `RUST_LOG` value, falling back to [`DEFAULT_DIRECTIVE`]
/// when it is unset, blank or unparsable.
pub fn env_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

// logs go to stderr, the chat owns stdout
pub fn init() {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter(rust_log.as_deref()))
        .init();
}

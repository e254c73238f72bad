use tracing_subscriber::EnvFilter;

/// Install the global subscriber
///
/// `LOG_LEVEL` (default `info`) and `LOG_FORMAT` (`json` or `pretty`) take
/// precedence over the given defaults; `RUST_LOG` directives win over both.
pub fn init(default_level: &str, default_format: &str) {
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| default_level.to_string());
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| default_format.to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    if format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.json().init();
    }
}

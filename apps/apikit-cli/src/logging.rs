use tracing_subscriber::EnvFilter;

/// Install the global subscriber on stderr; `RUST_LOG` wins over `-v`.
pub fn init(verbose: u8, json: bool, log_statements: bool) {
    let level = match verbose {
        0 if !log_statements => "warn",
        0 | 1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},sqlx=warn")));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

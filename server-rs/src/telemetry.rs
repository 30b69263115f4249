use tracing_subscriber::EnvFilter;

/// `RUST_LOG` sets the filter; `LOG_FORMAT=json` switches to structured
/// output for log shippers.
pub fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info,sqlx=warn"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match log_format {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
}

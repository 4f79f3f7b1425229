use env_logger::Env;

/// Initialize logging using env_logger.
/// Reads the RUST_LOG environment variable for filtering and falls back to
/// `info`, e.g. `RUST_LOG=broker_core=debug dbbroker check ...`
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber for tests. Controlled by `RUST_LOG`, silent by default.
pub fn setup() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"));

    // We swallow the result here because another test might have already installed the
    // subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

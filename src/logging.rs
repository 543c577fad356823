use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install a console subscriber filtered by `RUST_LOG`, `info` for this crate
/// by default.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("nrrd_volume=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

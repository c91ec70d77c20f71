//! Logging setup for the da-slam binaries, benchmarks and tests.
//!
//! The library itself only emits `tracing` events; a subscriber is installed by
//! whoever drives the pipeline.

use tracing::Level;

/// Install the standard subscriber at INFO level.
///
/// The level can be overridden through `RUST_LOG`:
/// ```bash
/// RUST_LOG=debug cargo run --bin slam_g2o -- data/toy.g2o
/// RUST_LOG=da_slam::association=trace cargo run --bin slam_g2o -- data/toy.g2o
/// ```
///
/// # Example
/// ```no_run
/// use da_slam::init_logger;
///
/// init_logger();
/// tracing::info!("pipeline started");
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Install the standard subscriber with a custom default level.
///
/// Format: `timestamp LEVEL target: message`. Calling it a second time is a
/// no-op, so tests may call it freely.
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
}

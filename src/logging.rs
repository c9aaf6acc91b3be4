//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise `[logging].level` from the config.
//! Logs go to stderr so command output on stdout stays parseable.

use tracing_subscriber::EnvFilter;

pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

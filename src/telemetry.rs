//! Logging setup: journald when running under systemd, stderr otherwise.

use std::io::IsTerminal as _;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter,
};

/// Initializes the global tracing subscriber. Call once, at startup.
///
/// Checking for a terminal helps detect if we are running under systemd.
pub fn init(syslog_identifier: &str) {
    let journald_layer = if !std::io::stderr().is_terminal() {
        tracing_journald::layer()
            .inspect_err(|err| {
                eprintln!(
                    "failed connecting to journald socket. \
                     will write to stderr: {err}"
                );
            })
            .map(|layer| layer.with_syslog_identifier(syslog_identifier.to_owned()))
            .ok()
    } else {
        None
    };
    let stderr_layer = journald_layer
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(journald_layer)
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();
}

//! Logging initialization.
//!
//! Diagnostics go to stderr so stdout carries nothing but trace blocks.

use std::io;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Pick the filter directive: `RUST_LOG` wins over the configured fallback.
fn filter_directive(rust_log: Option<String>, fallback: &str) -> String {
    match rust_log {
        Some(directive) if !directive.trim().is_empty() => directive,
        _ => fallback.to_string(),
    }
}

fn build_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
pub fn init(fallback: &str) -> anyhow::Result<()> {
    let directive = filter_directive(std::env::var("RUST_LOG").ok(), fallback);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_writer(io::stderr)
        .with_filter(build_filter(&directive));

    tracing_subscriber::registry().with(stderr_layer).try_init()?;

    Ok(())
}

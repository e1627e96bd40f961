//! Diagnostic tracing for debugging scheduling and tool invocations.
//!
//! Tracing is separate from the console report printed by [`crate::report`]:
//! round lines, failure details, timing and coverage messages are always
//! printed, whatever `RUST_LOG` says. Spans cover the session, each lane,
//! each round, each unit run and the aggregation stage.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber: `RUST_LOG` filter (default `warn`),
/// compact lines on stderr.
///
/// ```bash
/// RUST_LOG=covrun::schedule=debug covrun run --jobs 4
/// ```
pub fn init() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_thread_names(true)
                .compact(),
        )
        .init();
}

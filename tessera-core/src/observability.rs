//! Logging setup and spans
//!
//! Everything logs through `tracing`. Binaries call [`init_tracing`] once;
//! libraries embedding the crate bring their own subscriber. Log lines go to
//! stderr so they never mix with configuration printed on stdout.

use tracing::{Span, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "tessera=info,tessera_core=info";

/// Initialize tracing from `RUST_LOG`, falling back to [`DEFAULT_LOG_FILTER`]
pub fn init_tracing() {
    let _ = try_init_tracing(None);
}

/// Like [`init_tracing`] with an explicit filter; fails if a global
/// subscriber is already installed
pub fn try_init_tracing(filter: Option<&str>) -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter = match filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };

    subscriber(env_filter, std::io::stderr).try_init()
}

fn subscriber<W>(filter: EnvFilter, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_writer(writer);

    Registry::default().with(filter).with(fmt_layer)
}

/// Span around one merge cycle
#[inline]
pub fn merge_span(trigger: &str) -> Span {
    tracing::debug_span!(
        "merge",
        trigger = %trigger,
        events = tracing::field::Empty,
    )
}

/// Span around a source operation (pull, watch, cleanup)
#[inline]
pub fn source_span(operation: &str, source: &str) -> Span {
    tracing::debug_span!("source", operation = %operation, source = %source)
}

use tracing_subscriber::filter::Directive;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initializes the global `tracing` subscriber from `logging.level`/
/// `logging.pretty` (§6.2): pretty human-readable output for local
/// development, structured JSON lines otherwise. Ground truth:
/// `capture-logs::main::setup_tracing`'s `EnvFilter` + `.json()` layer, with
/// the pretty/json choice made explicit rather than hardcoded.
pub fn init_tracing(level: &str, pretty: bool) {
    let default_directive: Directive = level
        .parse()
        .unwrap_or_else(|_| tracing::Level::INFO.into());
    let filter = EnvFilter::builder()
        .with_default_directive(default_directive)
        .from_env_lossy();

    if pretty {
        let layer = tracing_subscriber::fmt::layer().with_filter(filter);
        tracing_subscriber::registry().with(layer).init();
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_list(false)
            .with_filter(filter);
        tracing_subscriber::registry().with(layer).init();
    }
}

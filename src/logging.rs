use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub const DEFAULT_FILTER: &str = "kbo_reconcile=info";

/// Install the global subscriber. `RUST_LOG` overrides the default filter;
/// `verbose` lowers the crate to debug. Safe to call more than once.
pub fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "kbo_reconcile=debug"
    } else {
        DEFAULT_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}

use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_LOG_FILTER: &str = "info,feed_tail=debug,feed_engine=info";

/// Installs the global subscriber once; later calls are ignored.
pub fn init_tracing(filter: &str) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|err| {
        eprintln!("invalid log filter {filter:?} ({err}); falling back to defaults");
        EnvFilter::new(DEFAULT_LOG_FILTER)
    });
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_names(true);
    let _ = Registry::default().with(env_filter).with(fmt_layer).try_init();
}

use {
    std::sync::Once,
    tracing_subscriber::{EnvFilter, fmt::format::FmtSpan},
};

/// Initializes tracing setup that is shared between the binaries.
/// `env_filter` has the same format as the `RUST_LOG` environment variable,
/// which also takes precedence when set.
///
/// May be called multiple times, only the first call initializes.
pub fn initialize(env_filter: &str) {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        set_tracing_subscriber(env_filter);
        // Forward panic messages into the log so they carry the
        // surrounding span context.
        std::panic::set_hook(Box::new(tracing_panic_hook));
    });
}

fn set_tracing_subscriber(env_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(env_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::NONE)
        .with_ansi(false)
        .init();
}

fn tracing_panic_hook(panic: &std::panic::PanicHookInfo) {
    tracing::error!("thread panicked: {panic}");
}

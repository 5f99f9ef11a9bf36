//! Observability glue shared between the binaries: tracing initialization
//! and the global metrics registry.

pub mod metrics;

use {
    std::{io::IsTerminal, sync::Once},
    tracing_subscriber::{fmt, prelude::*, EnvFilter},
};

/// Initializes the global tracing subscriber and installs a panic hook that
/// routes panics through tracing so that adapter panics leave a stack trace
/// in the logs.
///
/// `env_filter` has the usual `tracing_subscriber::EnvFilter` syntax, e.g.
/// `"info,exchange=debug"`.
pub fn initialize(env_filter: &str) {
    set_tracing_subscriber(env_filter);
    std::panic::set_hook(Box::new(tracing_panic_hook));
}

/// Like [`initialize`], but can be called multiple times in a row. Later
/// calls are ignored.
///
/// Useful for tests.
pub fn initialize_reentrant(env_filter: &str) {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        set_tracing_subscriber(env_filter);
        std::panic::set_hook(Box::new(tracing_panic_hook));
    });
}

fn set_tracing_subscriber(env_filter: &str) {
    let fmt_layer = fmt::layer()
        .with_ansi(std::io::stdout().is_terminal())
        .with_filter(EnvFilter::new(env_filter));
    tracing_subscriber::registry().with(fmt_layer).init();
}

/// Panic hook that logs the panic with a captured backtrace instead of
/// printing to stderr, keeping multi-line traces inside one log record.
fn tracing_panic_hook(panic: &std::panic::PanicHookInfo) {
    let backtrace = std::backtrace::Backtrace::force_capture();
    tracing::error!("thread panicked: {panic}\n{backtrace}");
}

//! Structured logging (SPEC_FULL §4 ambient "N"): `tracing` +
//! `tracing-subscriber`, compact formatter on a TTY, JSON when
//! `LOG_FORMAT=json`, matching the teacher's own `init_tracing`.

/// Initializes the global `tracing` subscriber and panic hook. Safe to
/// call once at process start; a second call is a no-op error that is
/// swallowed since tests may init a subscriber of their own.
pub fn init() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    let result = if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .try_init()
    };
    if result.is_err() {
        return;
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

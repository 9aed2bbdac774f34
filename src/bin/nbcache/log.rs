use color_eyre::Result;
use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt as _;

/// Build (but don't install) the subscriber used by the `nbcache` binary:
/// a pretty `fmt` layer filtered by `NBCACHE_LOG`, plus `tracing-error`'s
/// `ErrorLayer` so `color-eyre` reports can capture spans.
pub fn make_logger() -> Result<impl tracing::Subscriber> {
    let logger = tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(true)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_writer(std::io::stderr)
                .pretty()
                .with_filter(
                    tracing_subscriber::EnvFilter::builder()
                        .with_env_var("NBCACHE_LOG")
                        .from_env_lossy(),
                ),
        );
    Ok(logger)
}

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for the coordination core.
///
/// Respects `RUST_LOG`; defaults to `info` for our own crate and `warn` for
/// everything else. Safe to call more than once (subsequent calls are no-ops).
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,polymerge=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();

    tracing::debug!("Tracing initialized");
    Ok(())
}

//! Logging initialization
//!
//! Installs the tracing subscriber once per process. Logs go to stderr so
//! stdout carries only the run summary.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT_ONCE: Once = Once::new();

/// Initialize logging. `RUST_LOG` wins when set; otherwise `verbose`
/// selects debug instead of info for this crate.
pub fn init(verbose: bool) {
    INIT_ONCE.call_once(|| {
        let fallback = if verbose {
            "catalog_sync=debug"
        } else {
            "catalog_sync=info"
        };

        let _ = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
            )
            .try_init();
    });
}

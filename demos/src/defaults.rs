use load_framework_env::rust_log;
use tracing_subscriber::{EnvFilter, fmt};

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// Installs the fmt subscriber, honoring `RUST_LOG` and defaulting to `info`.
pub fn init_tracing() {
    let filter = rust_log()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}

use std::{
    num::{NonZeroU64, NonZeroUsize},
    process,
    time::Duration,
};

use anyhow::{Context as _, Result};
use load_demos::{defaults, read_env_any};
use load_framework_core::Url;
use load_framework_env::{loadgen_no_live_stats, loadgen_private_key, loadgen_rpc_url, loadgen_seed};
use load_framework_workflows::{
    LoadConfig, RunSummary,
    config::{DEFAULT_DURATION, DEFAULT_POOL_SIZE, DEFAULT_TARGET_TPS},
    load_main_account, run_load_test,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    defaults::init_tracing();

    let tps = read_env_any(&["LOADGEN_TPS", "TPS"], DEFAULT_TARGET_TPS);
    let duration_secs = read_env_any(
        &["LOADGEN_DURATION_SECS", "DURATION"],
        DEFAULT_DURATION.as_secs(),
    );
    let pool_size = read_env_any(&["LOADGEN_POOL_SIZE"], DEFAULT_POOL_SIZE);

    info!(tps, duration_secs, pool_size, "starting load runner");

    match run(tps, duration_secs, pool_size).await {
        Ok(summary) => print!("{summary}"),
        Err(err) => {
            warn!("load test failed: {err:#}");
            process::exit(1);
        }
    }
}

async fn run(tps: u64, duration_secs: u64, pool_size: usize) -> Result<RunSummary> {
    let target_tps = NonZeroU64::new(tps).context("LOADGEN_TPS must be positive")?;
    let pool_size = NonZeroUsize::new(pool_size).context("LOADGEN_POOL_SIZE must be positive")?;
    if duration_secs == 0 {
        anyhow::bail!("LOADGEN_DURATION_SECS must be positive");
    }

    let endpoint = loadgen_rpc_url().unwrap_or_else(|| defaults::DEFAULT_RPC_URL.to_owned());
    let endpoint = Url::parse(&endpoint).with_context(|| format!("invalid rpc url {endpoint}"))?;
    let main = load_main_account(loadgen_private_key().as_deref())
        .context("LOADGEN_PRIVATE_KEY must hold the funding account's key")?;

    let config = LoadConfig::default()
        .with_target_tps(target_tps)
        .with_duration(Duration::from_secs(duration_secs))
        .with_pool_size(pool_size)
        .with_live_render(!loadgen_no_live_stats())
        .with_seed(loadgen_seed());

    info!(%endpoint, main = %main.address(), "running load test");
    run_load_test(config, main, endpoint)
        .await
        .context("load test aborted")
}

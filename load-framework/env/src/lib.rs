use std::env;

#[must_use]
pub fn slow_test_env() -> bool {
    env::var("SLOW_TEST_ENV").is_ok_and(|s| s == "true")
}

#[must_use]
pub fn loadgen_rpc_url() -> Option<String> {
    env::var("LOADGEN_RPC_URL").ok()
}

/// Hex private key of the account that funds the pool. Never logged.
#[must_use]
pub fn loadgen_private_key() -> Option<String> {
    env::var("LOADGEN_PRIVATE_KEY")
        .ok()
        .filter(|key| !key.trim().is_empty())
}

#[must_use]
pub fn loadgen_seed() -> Option<u64> {
    env::var("LOADGEN_SEED")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
}

/// Disables the in-place stats block, e.g. when stderr is captured to a file.
#[must_use]
pub fn loadgen_no_live_stats() -> bool {
    env::var("LOADGEN_NO_LIVE_STATS").is_ok_and(|val| val.eq_ignore_ascii_case("true"))
}

#[must_use]
pub fn rust_log() -> Option<String> {
    env::var("RUST_LOG").ok()
}

pub mod accounts;
pub mod rpc;
#[cfg(feature = "testing")]
pub mod testing;

use std::{sync::LazyLock, time::Duration};

pub use accounts::{Account, AccountError};
pub use rpc::{ChainRpc, JsonRpcClient, RpcError, TransactionRecord, Url};

/// Wei in one unit of the native currency.
pub const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

static IS_SLOW_TEST_ENV: LazyLock<bool> = LazyLock::new(load_framework_env::slow_test_env);

/// Doubles `d` on slow CI machines.
#[must_use]
pub fn adjust_timeout(d: Duration) -> Duration {
    if *IS_SLOW_TEST_ENV { d * 2 } else { d }
}

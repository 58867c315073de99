use alloy_primitives::Address;
use load_framework_core::{AccountError, RpcError};
use thiserror::Error;

use crate::nonce::UnknownAccount;

/// Errors that abort a load test run.
#[derive(Debug, Error)]
pub enum LoadTestError {
    #[error("main account unavailable: {0}")]
    MainAccount(#[from] AccountError),
    #[error("rpc endpoint unusable: {0}")]
    Endpoint(#[source] RpcError),
    #[error("{field} must be non-zero")]
    ZeroValue { field: &'static str },
    #[error("batch of {batch_size} slots exceeds the limit of {max}")]
    BatchTooLarge { batch_size: u64, max: u64 },
    #[error("failed to read the starting nonce of {account}: {source}")]
    SequenceInit {
        account: Address,
        #[source]
        source: RpcError,
    },
    #[error("no pool account could be funded from the main account")]
    NoFundedAccounts,
    #[error(transparent)]
    UnknownAccount(#[from] UnknownAccount),
}

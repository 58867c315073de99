mod client;
mod transfer;

use alloy_primitives::{Address, B256, U256, U64};
use async_trait::async_trait;
pub use client::JsonRpcClient;
pub use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
pub use transfer::{SignedTransfer, TRANSFER_GAS_LIMIT, sign_transfer, transfer_gas_cost};

use crate::accounts::Account;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("node rejected {method}: [{code}] {message}")]
    Node {
        method: &'static str,
        code: i64,
        message: String,
    },
    #[error("malformed {method} response: {reason}")]
    MalformedResponse {
        method: &'static str,
        reason: String,
    },
    #[error("chain id not fetched yet")]
    ChainIdUnknown,
    #[error("failed to sign transfer: {0}")]
    Signing(#[from] alloy_signer::Error),
}

/// Subset of an `eth_getTransactionByHash` result the load engine inspects.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub hash: B256,
    pub from: Address,
    pub nonce: U64,
    #[serde(default)]
    pub block_number: Option<U64>,
}

impl TransactionRecord {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.block_number.is_none()
    }
}

/// Blockchain node capabilities consumed by the load engine.
///
/// Every call is fallible and may suspend on network I/O. Implementations
/// must be cheap to share across tasks.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn chain_id(&self) -> Result<u64, RpcError>;

    /// Next nonce for `address`, counting transactions still in the mempool.
    async fn transaction_count(&self, address: Address) -> Result<u64, RpcError>;

    async fn balance(&self, address: Address) -> Result<U256, RpcError>;

    async fn gas_price(&self) -> Result<u128, RpcError>;

    /// Signs a plain value transfer with `from`'s key at `gas_price` and
    /// broadcasts it. Returns the transaction hash.
    ///
    /// Implementations must not issue further reads before the broadcast:
    /// callers allocate `nonce` first, and any failure after that leaves a
    /// gap in the sender's nonce sequence.
    async fn send_transfer(
        &self,
        from: &Account,
        to: Address,
        value: U256,
        nonce: u64,
        gas_price: u128,
    ) -> Result<B256, RpcError>;

    async fn transaction_by_hash(&self, hash: B256)
    -> Result<Option<TransactionRecord>, RpcError>;

    async fn block_number(&self) -> Result<u64, RpcError>;
}

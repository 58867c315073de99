use std::collections::HashMap;

use alloy_primitives::Address;
use futures::future::try_join_all;
use load_framework_core::ChainRpc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::LoadTestError;

/// The allocator was asked about an account it was not initialized with.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("no nonce state for account {0}")]
pub struct UnknownAccount(pub Address);

/// Hands out gap-free, strictly increasing nonces per account.
///
/// Each account owns its own lock, so callers for different accounts never
/// wait on each other. The set of accounts is fixed at construction.
#[derive(Debug)]
pub struct NonceAllocator {
    slots: HashMap<Address, Mutex<u64>>,
}

impl NonceAllocator {
    /// Reads the pending transaction count of every account. Fails on the
    /// first query error: allocation needs a trustworthy baseline.
    pub async fn initialize(
        rpc: &dyn ChainRpc,
        accounts: &[Address],
    ) -> Result<Self, LoadTestError> {
        let bases = try_join_all(accounts.iter().map(|&account| async move {
            rpc.transaction_count(account)
                .await
                .map(|nonce| (account, nonce))
                .map_err(|source| LoadTestError::SequenceInit { account, source })
        }))
        .await?;

        for (account, nonce) in &bases {
            debug!(%account, nonce, "nonce baseline");
        }
        info!(accounts = bases.len(), "nonce state initialized");

        Ok(Self::from_bases(bases))
    }

    #[must_use]
    pub fn from_bases(bases: impl IntoIterator<Item = (Address, u64)>) -> Self {
        Self {
            slots: bases
                .into_iter()
                .map(|(account, nonce)| (account, Mutex::new(nonce)))
                .collect(),
        }
    }

    /// Locks `account`'s counter. Other callers for the same account wait
    /// until the reservation is taken or dropped.
    pub async fn reserve(&self, account: Address) -> Result<NonceReservation<'_>, UnknownAccount> {
        let slot = self.slots.get(&account).ok_or(UnknownAccount(account))?;
        Ok(NonceReservation {
            guard: slot.lock().await,
        })
    }

    /// Returns the next nonce for `account` and advances it.
    pub async fn allocate(&self, account: Address) -> Result<u64, UnknownAccount> {
        Ok(self.reserve(account).await?.take())
    }

    /// Next nonce that would be issued, without consuming it.
    pub async fn peek(&self, account: Address) -> Result<u64, UnknownAccount> {
        Ok(self.reserve(account).await?.value())
    }
}

/// Exclusive hold on one account's nonce counter.
#[derive(Debug)]
pub struct NonceReservation<'a> {
    guard: MutexGuard<'a, u64>,
}

impl NonceReservation<'_> {
    #[must_use]
    pub fn value(&self) -> u64 {
        *self.guard
    }

    /// Consumes the reservation, returning the held nonce.
    pub fn take(mut self) -> u64 {
        let nonce = *self.guard;
        *self.guard += 1;
        nonce
    }
}

use std::{num::NonZeroUsize, time::Duration};

use alloy_primitives::{Address, U256};
use load_framework_core::{Account, ChainRpc, RpcError, rpc::transfer_gas_cost};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::nonce::NonceAllocator;

/// Ephemeral signing accounts used for one run.
#[derive(Clone, Debug)]
pub struct AccountPool {
    accounts: Vec<Account>,
}

/// Outcome of returning pool balances to the main account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub swept: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Wei sent back, excluding gas.
    pub returned: U256,
}

impl AccountPool {
    /// Generates `size` fresh identities. No network interaction.
    #[must_use]
    pub fn create(size: NonZeroUsize) -> Self {
        let accounts = (0..size.get()).map(|_| Account::generate()).collect();
        Self { accounts }
    }

    #[must_use]
    pub fn addresses(&self) -> Vec<Address> {
        self.accounts.iter().map(Account::address).collect()
    }

    #[must_use]
    pub fn account(&self, address: Address) -> Option<&Account> {
        self.accounts
            .iter()
            .find(|account| account.address() == address)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Sends `amount` from `main` to every pool account, one at a time,
    /// pausing `settle` after each accepted transfer so the next main-account
    /// nonce is read after the node has seen the previous one.
    ///
    /// Returns the accounts that were funded; failures are logged and the
    /// account is left out.
    pub async fn fund(
        self,
        rpc: &dyn ChainRpc,
        main: &Account,
        amount: U256,
        gas_price: u128,
        settle: Duration,
    ) -> Self {
        let requested = self.accounts.len();
        let mut funded = Vec::with_capacity(requested);

        for account in self.accounts {
            match fund_one(rpc, main, account.address(), amount, gas_price).await {
                Ok(()) => {
                    funded.push(account);
                    if !settle.is_zero() {
                        sleep(settle).await;
                    }
                }
                Err(err) => {
                    warn!(
                        account = %account.address(),
                        error = %err,
                        "funding failed; skipping account"
                    );
                }
            }
        }

        info!(requested, funded = funded.len(), %amount, "pool funding finished");
        Self { accounts: funded }
    }

    /// Returns what is left on each pool account to `main`, minus the fee of
    /// the returning transfer. Accounts whose balance does not cover the fee
    /// are skipped; failures are logged and do not stop the sweep.
    ///
    /// Each sweep transfer uses the chain's pending count as its nonce. A
    /// failed traffic submission leaves the allocator ahead of the chain, and
    /// a transfer above that gap would never execute. `issued`, when given,
    /// is only compared against the chain to report such gaps.
    pub async fn sweep(
        &self,
        rpc: &dyn ChainRpc,
        issued: Option<&NonceAllocator>,
        main: Address,
    ) -> SweepReport {
        let mut report = SweepReport::default();

        for account in &self.accounts {
            match sweep_one(rpc, issued, account, main).await {
                Ok(Some(amount)) => {
                    report.swept += 1;
                    report.returned += amount;
                }
                Ok(None) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(account = %account.address(), error = %err, "sweep failed");
                }
            }
        }

        info!(
            swept = report.swept,
            skipped = report.skipped,
            failed = report.failed,
            returned = %report.returned,
            "pool sweep finished"
        );
        report
    }
}

async fn fund_one(
    rpc: &dyn ChainRpc,
    main: &Account,
    target: Address,
    amount: U256,
    gas_price: u128,
) -> Result<(), RpcError> {
    let nonce = rpc.transaction_count(main.address()).await?;
    let hash = rpc
        .send_transfer(main, target, amount, nonce, gas_price)
        .await?;
    debug!(%target, nonce, %hash, "funding transfer submitted");
    Ok(())
}

async fn sweep_one(
    rpc: &dyn ChainRpc,
    issued: Option<&NonceAllocator>,
    account: &Account,
    main: Address,
) -> Result<Option<U256>, RpcError> {
    let address = account.address();
    let balance = rpc.balance(address).await?;
    if balance.is_zero() {
        return Ok(None);
    }

    // The fee is computed and signed with the same quote.
    let gas_price = rpc.gas_price().await?;
    let gas_cost = transfer_gas_cost(gas_price);
    let Some(amount) = balance.checked_sub(gas_cost).filter(|amount| !amount.is_zero()) else {
        debug!(%address, %balance, %gas_cost, "balance does not cover the sweep fee");
        return Ok(None);
    };

    let nonce = rpc.transaction_count(address).await?;
    let next_issued = match issued {
        Some(nonces) => nonces.peek(address).await.ok(),
        None => None,
    };
    if let Some(next_issued) = next_issued.filter(|next| *next > nonce) {
        warn!(
            %address,
            chain_nonce = nonce,
            next_issued,
            "nonces above the chain's count were never accepted; sweeping below them"
        );
    }

    let hash = rpc
        .send_transfer(account, main, amount, nonce, gas_price)
        .await?;
    debug!(%address, nonce, %amount, %hash, "sweep transfer submitted");
    Ok(Some(amount))
}

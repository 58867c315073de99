//! In-memory chain used by tests in place of a live node.
//!
//! `ScriptedRpc` keeps balances and next nonces per address. A transfer at the
//! account's next nonce executes immediately; one above it waits in a queue
//! until the gap closes, as it would in a node's mempool. Selected calls can
//! be failed via a fault predicate installed at any point during a run.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use alloy_primitives::{Address, B256, U64, U256};
use async_trait::async_trait;
use tokio::time::sleep;

use crate::{
    accounts::Account,
    rpc::{ChainRpc, RpcError, TransactionRecord, sign_transfer, transfer_gas_cost},
};

const SYNTHETIC_FAILURE_CODE: i64 = -32603;

/// One collaborator call as seen by the fault predicate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptedCall {
    ChainId,
    TransactionCount(Address),
    Balance(Address),
    GasPrice,
    SendTransfer {
        from: Address,
        to: Address,
        nonce: u64,
    },
    TransactionByHash(B256),
    BlockNumber,
}

/// A transfer executed by the scripted chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedTransfer {
    pub hash: B256,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub nonce: u64,
    pub gas_price: u128,
}

type Fault = dyn Fn(&ScriptedCall, u64) -> bool + Send + Sync;

#[derive(Default)]
struct ChainState {
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, u64>,
    queued: HashMap<Address, BTreeMap<u64, RecordedTransfer>>,
    transactions: HashMap<B256, TransactionRecord>,
    transfers: Vec<RecordedTransfer>,
    block_number: u64,
}

impl ChainState {
    fn next_nonce(&self, address: Address) -> u64 {
        self.nonces.get(&address).copied().unwrap_or_default()
    }

    fn execute(&mut self, transfer: RecordedTransfer) -> Result<(), String> {
        let cost = transfer.value + transfer_gas_cost(transfer.gas_price);
        let balance = self
            .balances
            .get(&transfer.from)
            .copied()
            .unwrap_or_default();
        if balance < cost {
            return Err(format!(
                "insufficient funds: balance {balance}, cost {cost}"
            ));
        }

        self.balances.insert(transfer.from, balance - cost);
        *self.balances.entry(transfer.to).or_default() += transfer.value;
        self.nonces.insert(transfer.from, transfer.nonce + 1);
        self.block_number += 1;
        self.transactions.insert(
            transfer.hash,
            record(&transfer, Some(self.block_number)),
        );
        self.transfers.push(transfer);
        Ok(())
    }

    /// Executes queued transfers of `sender` while they follow on from its
    /// next nonce. An unfundable one is evicted and leaves the rest waiting.
    fn promote(&mut self, sender: Address) {
        loop {
            let next = self.next_nonce(sender);
            let Some(transfer) = self
                .queued
                .get_mut(&sender)
                .and_then(|queue| queue.remove(&next))
            else {
                return;
            };
            let hash = transfer.hash;
            if self.execute(transfer).is_err() {
                self.transactions.remove(&hash);
                return;
            }
        }
    }
}

fn record(transfer: &RecordedTransfer, block_number: Option<u64>) -> TransactionRecord {
    TransactionRecord {
        hash: transfer.hash,
        from: transfer.from,
        nonce: U64::from(transfer.nonce),
        block_number: block_number.map(U64::from),
    }
}

pub struct ScriptedRpc {
    chain_id: u64,
    gas_price: u128,
    latency: Duration,
    calls: AtomicU64,
    fault: RwLock<Option<Arc<Fault>>>,
    state: Mutex<ChainState>,
}

impl Default for ScriptedRpc {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRpc {
    #[must_use]
    pub fn new() -> Self {
        Self {
            chain_id: 1337,
            gas_price: 1_000_000_000,
            latency: Duration::ZERO,
            calls: AtomicU64::new(0),
            fault: RwLock::new(None),
            state: Mutex::new(ChainState::default()),
        }
    }

    /// Price reported by `gas_price`. Transfers are charged at the price
    /// they were signed with.
    #[must_use]
    pub const fn with_gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = gas_price;
        self
    }

    /// Every call sleeps for `latency` before touching chain state.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    #[must_use]
    pub fn with_balance(self, address: Address, balance: U256) -> Self {
        self.set_balance(address, balance);
        self
    }

    #[must_use]
    pub fn with_nonce(self, address: Address, nonce: u64) -> Self {
        self.lock_state().nonces.insert(address, nonce);
        self
    }

    #[must_use]
    pub fn with_fault(
        self,
        fault: impl Fn(&ScriptedCall, u64) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.set_fault(fault);
        self
    }

    /// Installs a predicate deciding which calls fail. It receives the call
    /// and its zero-based sequence number across all calls.
    pub fn set_fault(&self, fault: impl Fn(&ScriptedCall, u64) -> bool + Send + Sync + 'static) {
        *self.fault.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(fault));
    }

    pub fn clear_fault(&self) {
        *self.fault.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.lock_state().balances.insert(address, balance);
    }

    #[must_use]
    pub fn balance_of(&self, address: Address) -> U256 {
        self.lock_state()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default()
    }

    /// Next executable nonce, i.e. the pending transaction count.
    #[must_use]
    pub fn nonce_of(&self, address: Address) -> u64 {
        self.lock_state().next_nonce(address)
    }

    /// Nonces of `address`'s transfers still waiting behind a gap.
    #[must_use]
    pub fn queued_nonces(&self, address: Address) -> Vec<u64> {
        self.lock_state()
            .queued
            .get(&address)
            .map(|queue| queue.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Executed transfers, in execution order.
    #[must_use]
    pub fn transfers(&self) -> Vec<RecordedTransfer> {
        self.lock_state().transfers.clone()
    }

    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, call: ScriptedCall) -> Result<(), RpcError> {
        let seq = self.calls.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        let fault = self
            .fault
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match fault {
            Some(fault) if fault(&call, seq) => Err(RpcError::Node {
                method: method_name(&call),
                code: SYNTHETIC_FAILURE_CODE,
                message: format!("synthetic failure for call #{seq}"),
            }),
            _ => Ok(()),
        }
    }
}

const fn method_name(call: &ScriptedCall) -> &'static str {
    match call {
        ScriptedCall::ChainId => "eth_chainId",
        ScriptedCall::TransactionCount(_) => "eth_getTransactionCount",
        ScriptedCall::Balance(_) => "eth_getBalance",
        ScriptedCall::GasPrice => "eth_gasPrice",
        ScriptedCall::SendTransfer { .. } => "eth_sendRawTransaction",
        ScriptedCall::TransactionByHash(_) => "eth_getTransactionByHash",
        ScriptedCall::BlockNumber => "eth_blockNumber",
    }
}

fn rejected(message: impl Into<String>) -> RpcError {
    RpcError::Node {
        method: "eth_sendRawTransaction",
        code: -32000,
        message: message.into(),
    }
}

#[async_trait]
impl ChainRpc for ScriptedRpc {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        self.enter(ScriptedCall::ChainId).await?;
        Ok(self.chain_id)
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, RpcError> {
        self.enter(ScriptedCall::TransactionCount(address)).await?;
        Ok(self.nonce_of(address))
    }

    async fn balance(&self, address: Address) -> Result<U256, RpcError> {
        self.enter(ScriptedCall::Balance(address)).await?;
        Ok(self.balance_of(address))
    }

    async fn gas_price(&self) -> Result<u128, RpcError> {
        self.enter(ScriptedCall::GasPrice).await?;
        Ok(self.gas_price)
    }

    async fn send_transfer(
        &self,
        from: &Account,
        to: Address,
        value: U256,
        nonce: u64,
        gas_price: u128,
    ) -> Result<B256, RpcError> {
        let sender = from.address();
        self.enter(ScriptedCall::SendTransfer {
            from: sender,
            to,
            nonce,
        })
        .await?;

        let signed = sign_transfer(from, to, value, nonce, gas_price, self.chain_id)?;
        let transfer = RecordedTransfer {
            hash: signed.hash,
            from: sender,
            to,
            value,
            nonce,
            gas_price,
        };

        let mut state = self.lock_state();
        let next = state.next_nonce(sender);
        if nonce < next {
            return Err(rejected(format!(
                "nonce too low: next nonce {next}, tx nonce {nonce}"
            )));
        }
        if state
            .queued
            .get(&sender)
            .is_some_and(|queue| queue.contains_key(&nonce))
        {
            return Err(rejected(format!("already known: nonce {nonce}")));
        }

        if nonce > next {
            state
                .transactions
                .insert(signed.hash, record(&transfer, None));
            state
                .queued
                .entry(sender)
                .or_default()
                .insert(nonce, transfer);
            return Ok(signed.hash);
        }

        state.execute(transfer).map_err(rejected)?;
        state.promote(sender);
        Ok(signed.hash)
    }

    async fn transaction_by_hash(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionRecord>, RpcError> {
        self.enter(ScriptedCall::TransactionByHash(hash)).await?;
        Ok(self.lock_state().transactions.get(&hash).cloned())
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        self.enter(ScriptedCall::BlockNumber).await?;
        Ok(self.lock_state().block_number)
    }
}

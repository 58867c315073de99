use std::{any::Any, fmt, io, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use alloy_primitives::{Address, B256, U256};
use futures::FutureExt as _;
use load_framework_core::{Account, AccountError, ChainRpc, JsonRpcClient, RpcError, Url};
use rand::{SeedableRng as _, rngs::StdRng};
use thiserror::Error;
use tokio::{
    sync::{oneshot, watch},
    task::{JoinHandle, JoinSet},
    time::{Instant, MissedTickBehavior, interval, sleep},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::{LoadConfig, RunPlan},
    error::LoadTestError,
    mix::{Operation, generate_batch},
    nonce::{NonceAllocator, UnknownAccount},
    pool::{AccountPool, SweepReport},
    stats::{StatsRenderer, StatsSnapshot, StatsTable},
};

/// Lifecycle of a run. Phases are entered strictly in declaration order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunPhase {
    #[default]
    Idle,
    Initializing,
    Running,
    Draining,
    Done,
}

impl RunPhase {
    #[must_use]
    pub const fn successor(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Initializing),
            Self::Initializing => Some(Self::Running),
            Self::Running => Some(Self::Draining),
            Self::Draining => Some(Self::Done),
            Self::Done => None,
        }
    }
}

/// What a completed run reports back to its caller.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub stats: StatsSnapshot,
    /// `None` when the final balance query failed.
    pub main_balance: Option<U256>,
    pub funded_accounts: usize,
    pub batches: u64,
    pub operations: u64,
    /// Length of the Running phase.
    pub elapsed: Duration,
    pub sweep: SweepReport,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stats)?;
        writeln!(
            f,
            "{} operations in {} batches over {:.1}s using {} accounts",
            self.operations,
            self.batches,
            self.elapsed.as_secs_f64(),
            self.funded_accounts
        )?;
        match self.main_balance {
            Some(balance) => writeln!(f, "main account balance: {balance} wei"),
            None => writeln!(f, "main account balance: unavailable"),
        }
    }
}

/// Drives one load test against a [`ChainRpc`].
pub struct LoadRunner {
    config: LoadConfig,
    main: Account,
    rpc: Arc<dyn ChainRpc>,
    stats: Arc<StatsTable>,
    phase: watch::Sender<RunPhase>,
}

impl LoadRunner {
    #[must_use]
    pub fn new(config: LoadConfig, main: Account, rpc: Arc<dyn ChainRpc>) -> Self {
        let (phase, _) = watch::channel(RunPhase::Idle);
        Self {
            config,
            main,
            rpc,
            stats: Arc::new(StatsTable::new()),
            phase,
        }
    }

    /// Live counters; readable while the run is in progress.
    #[must_use]
    pub fn stats(&self) -> Arc<StatsTable> {
        Arc::clone(&self.stats)
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    /// Funds the pool, runs paced traffic for the configured duration and
    /// sweeps the pool back into the main account.
    ///
    /// Errors returned before Running mean no traffic was generated.
    pub async fn run(self) -> Result<RunSummary, LoadTestError> {
        let plan = self.config.plan()?;
        info!(
            target_tps = self.config.target_tps.get(),
            pool_size = plan.pool_size.get(),
            batch_size = plan.batch_size,
            duration_secs = plan.duration.as_secs_f64(),
            main = %self.main.address(),
            "starting load test"
        );

        self.advance(RunPhase::Initializing);
        let (context, gas_price) = self.initialize().await?;
        let context = Arc::new(context);

        self.advance(RunPhase::Running);
        let traffic = self.drive(&context, &plan, gas_price).await;

        self.advance(RunPhase::Draining);
        let sweep = context
            .pool
            .sweep(
                self.rpc.as_ref(),
                Some(&context.nonces),
                self.main.address(),
            )
            .await;
        let main_balance = match self.rpc.balance(self.main.address()).await {
            Ok(balance) => Some(balance),
            Err(err) => {
                warn!(error = %err, "failed to read the main account's ending balance");
                None
            }
        };

        self.advance(RunPhase::Done);
        if let Some(unknown) = traffic.fatal {
            return Err(unknown.into());
        }

        let summary = RunSummary {
            stats: self.stats.snapshot(),
            main_balance,
            funded_accounts: context.pool.len(),
            batches: traffic.batches,
            operations: traffic.operations,
            elapsed: traffic.elapsed,
            sweep,
        };
        info!(
            operations = summary.operations,
            batches = summary.batches,
            errors = summary.stats.errors(),
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "load test finished"
        );
        Ok(summary)
    }

    fn advance(&self, next: RunPhase) {
        let previous = self.phase.send_replace(next);
        debug_assert_eq!(previous.successor(), Some(next), "phase skipped");
        info!(from = ?previous, to = ?next, "run phase changed");
    }

    /// Reads the chain parameters, funds the pool and seeds the allocator.
    /// Returns the context shared by operations and the initial gas quote.
    async fn initialize(&self) -> Result<(OperationContext, u128), LoadTestError> {
        let rpc = self.rpc.as_ref();
        // Transfers sign without further reads once their nonce is taken.
        let chain_id = rpc.chain_id().await.map_err(LoadTestError::Endpoint)?;
        let gas_price = rpc.gas_price().await.map_err(LoadTestError::Endpoint)?;
        info!(chain_id, gas_price, "chain parameters read");

        let pool = AccountPool::create(self.config.pool_size)
            .fund(
                rpc,
                &self.main,
                self.config.fund_amount,
                gas_price,
                self.config.funding_settle_delay,
            )
            .await;
        if pool.is_empty() {
            return Err(LoadTestError::NoFundedAccounts);
        }

        let nonces = match NonceAllocator::initialize(rpc, &pool.addresses()).await {
            Ok(nonces) => nonces,
            Err(err) => {
                // Funds already left the main account; try to get them back
                // using the chain's own counts before giving up.
                warn!(error = %err, "nonce initialization failed; returning pool funds");
                pool.sweep(rpc, None, self.main.address()).await;
                return Err(err);
            }
        };

        let context = OperationContext {
            rpc: Arc::clone(&self.rpc),
            pool,
            nonces,
            transfer_value: self.config.transfer_value,
        };
        Ok((context, gas_price))
    }

    async fn drive(
        &self,
        context: &Arc<OperationContext>,
        plan: &RunPlan,
        mut gas_price: u128,
    ) -> Traffic {
        let mut rng = self
            .config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        let senders = context.pool.addresses();
        let renderer = self.spawn_renderer();

        let started = Instant::now();
        let deadline = started + plan.duration;
        let mut traffic = Traffic::default();

        while Instant::now() < deadline {
            gas_price = self.refresh_gas_price(gas_price).await;
            let batch = generate_batch(&senders, plan.batch_size, &mut rng);
            traffic.batches += 1;
            traffic.operations += batch.len() as u64;

            if let Some(unknown) = self.dispatch(context, batch, gas_price).await {
                error!(account = %unknown.0, "operation referenced an account outside the pool");
                traffic.fatal = Some(unknown);
                break;
            }
            debug!(batch = traffic.batches, "batch settled");

            sleep(plan.batch_delay).await;
        }
        traffic.elapsed = started.elapsed();

        match renderer {
            Some(renderer) => renderer.stop().await,
            None => log_snapshot(&self.stats.snapshot()),
        }
        traffic
    }

    /// Gas quote for the next batch. A failed read keeps the previous one.
    async fn refresh_gas_price(&self, current: u128) -> u128 {
        match self.rpc.gas_price().await {
            Ok(price) => price,
            Err(err) => {
                debug!(error = %err, current, "gas price refresh failed; keeping previous quote");
                current
            }
        }
    }

    /// Runs every operation of the batch concurrently and waits for all of
    /// them. Each task records its own outcome, panics included.
    async fn dispatch(
        &self,
        context: &Arc<OperationContext>,
        batch: Vec<Operation>,
        gas_price: u128,
    ) -> Option<UnknownAccount> {
        let mut tasks = JoinSet::new();
        for operation in batch {
            let context = Arc::clone(context);
            let stats = Arc::clone(&self.stats);
            tasks.spawn(async move {
                let kind = operation.kind();
                let result = AssertUnwindSafe(context.execute(operation, gas_price))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(OperationError::Panicked(panic_message(panic))));

                stats.record_result(kind, &result);
                match result {
                    Ok(()) => None,
                    Err(err) => {
                        debug!(kind = %kind, error = %err, "operation failed");
                        match err {
                            OperationError::UnknownAccount(unknown) => Some(unknown),
                            _ => None,
                        }
                    }
                }
            });
        }

        let mut fatal = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(unknown) => fatal = fatal.or(unknown),
                Err(err) => warn!(error = %err, "operation task did not complete"),
            }
        }
        fatal
    }

    fn spawn_renderer(&self) -> Option<RenderTask> {
        if !self.config.live_render {
            return None;
        }
        Some(RenderTask::spawn(
            Arc::clone(&self.stats),
            self.config.render_interval,
        ))
    }
}

#[derive(Debug, Default)]
struct Traffic {
    batches: u64,
    operations: u64,
    elapsed: Duration,
    fatal: Option<UnknownAccount>,
}

#[derive(Debug, Error)]
enum OperationError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    UnknownAccount(#[from] UnknownAccount),
    #[error("transaction {0} not known to the node after submission")]
    TransferNotFound(B256),
    #[error("operation panicked: {0}")]
    Panicked(String),
}

/// Everything an operation task needs, shared across one run.
struct OperationContext {
    rpc: Arc<dyn ChainRpc>,
    pool: AccountPool,
    nonces: NonceAllocator,
    transfer_value: U256,
}

impl OperationContext {
    async fn execute(&self, operation: Operation, gas_price: u128) -> Result<(), OperationError> {
        match operation {
            Operation::Transfer { sender, target } => {
                self.transfer(sender, target, gas_price).await?;
            }
            Operation::TransactionCount { account } => {
                self.rpc.transaction_count(account).await?;
            }
            Operation::Balance { account } => {
                self.rpc.balance(account).await?;
            }
            Operation::BlockNumber => {
                self.rpc.block_number().await?;
            }
            Operation::TransferLookup { sender, target } => {
                let hash = self.transfer(sender, target, gas_price).await?;
                self.rpc
                    .transaction_by_hash(hash)
                    .await?
                    .ok_or(OperationError::TransferNotFound(hash))?;
            }
        }
        Ok(())
    }

    async fn transfer(
        &self,
        sender: Address,
        target: Address,
        gas_price: u128,
    ) -> Result<B256, OperationError> {
        let account = self.pool.account(sender).ok_or(UnknownAccount(sender))?;
        // Issuance order picks the nonce; submissions may still race. Nothing
        // between allocation and broadcast may fail on its own.
        let nonce = self.nonces.allocate(sender).await?;
        let hash = self
            .rpc
            .send_transfer(account, target, self.transfer_value, nonce, gas_price)
            .await?;
        debug!(%sender, %target, nonce, %hash, "transfer submitted");
        Ok(hash)
    }
}

/// Background repaint of the stats block on stderr.
struct RenderTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl RenderTask {
    fn spawn(stats: Arc<StatsTable>, every: Duration) -> Self {
        let (stop, mut stopped) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut renderer = StatsRenderer::new(io::stderr());
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = &mut stopped => break,
                }
                if let Err(err) = renderer.render(&stats.snapshot()) {
                    warn!(error = %err, "stats render failed; live display disabled");
                    return;
                }
            }

            if let Err(err) = renderer.render(&stats.snapshot()) {
                warn!(error = %err, "final stats render failed");
            }
        });

        Self { stop, handle }
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(err) = self.handle.await {
            warn!(error = %err, "stats renderer task failed");
        }
    }
}

fn log_snapshot(snapshot: &StatsSnapshot) {
    for row in snapshot.rows() {
        info!(
            kind = row.kind.label(),
            success = row.success,
            error = row.error,
            "operation stats"
        );
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic.downcast::<String>().map_or_else(
        |panic| {
            panic.downcast::<&'static str>().map_or_else(
                |_| "unknown panic".to_owned(),
                |message| (*message).to_owned(),
            )
        },
        |message| *message,
    )
}

/// Loads the main account from its configured secret. A missing secret is
/// fatal before any network interaction.
pub fn load_main_account(secret: Option<&str>) -> Result<Account, LoadTestError> {
    let secret = secret.ok_or(AccountError::MissingKey)?;
    Ok(Account::from_secret(secret)?)
}

/// Runs one load test against the JSON-RPC node at `endpoint`.
pub async fn run_load_test(
    config: LoadConfig,
    main: Account,
    endpoint: Url,
) -> Result<RunSummary, LoadTestError> {
    let client = JsonRpcClient::new(endpoint).map_err(LoadTestError::Endpoint)?;
    LoadRunner::new(config, main, Arc::new(client)).run().await
}

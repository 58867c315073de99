use std::{
    num::{NonZeroU64, NonZeroUsize},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use alloy_primitives::U256;
use load_framework_core::{
    Account, ChainRpc, WEI_PER_ETHER, adjust_timeout,
    testing::{ScriptedCall, ScriptedRpc},
};
use load_framework_workflows::{
    LoadConfig, LoadRunner, LoadTestError, OperationKind, RunPhase, RunSummary, StatsTable,
    config::DEFAULT_BATCH_DELAY,
};
use rand::{Rng as _, SeedableRng as _, rngs::StdRng};
use tokio::{sync::watch, task::JoinHandle};

const RUN_DURATION: Duration = Duration::from_secs(2);
const CALL_LATENCY: Duration = Duration::from_millis(20);
const FAILURE_RATE: f64 = 0.1;

fn ether(n: u64) -> U256 {
    U256::from(n) * U256::from(WEI_PER_ETHER)
}

fn scenario_config() -> LoadConfig {
    LoadConfig::default()
        .with_target_tps(NonZeroU64::new(20).unwrap())
        .with_pool_size(NonZeroUsize::new(4).unwrap())
        .with_duration(RUN_DURATION)
        .with_funding_settle_delay(Duration::from_millis(10))
        .with_live_render(false)
        .with_seed(Some(2024))
}

/// Fails each call independently with probability `rate`, but only while
/// traffic runs: funding and the sweep stay clean.
fn fail_randomly_while_running(rpc: &ScriptedRpc, runner: &LoadRunner, rate: f64, seed: u64) {
    let phase = runner.subscribe();
    let rng = Mutex::new(StdRng::seed_from_u64(seed));
    rpc.set_fault(move |_, _| {
        *phase.borrow() == RunPhase::Running && rng.lock().unwrap().gen_bool(rate)
    });
}

/// Samples the live counters until the run is done, asserting that no
/// counter ever goes backwards. Returns the number of samples taken.
fn watch_counters(
    stats: Arc<StatsTable>,
    mut phase: watch::Receiver<RunPhase>,
    every: Duration,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut previous = stats.snapshot();
        let mut samples = 0;
        loop {
            let done = *phase.borrow_and_update() == RunPhase::Done;
            let current = stats.snapshot();
            for (before, after) in previous.rows().iter().zip(current.rows()) {
                assert!(
                    after.success >= before.success && after.error >= before.error,
                    "{} went backwards: {before:?} -> {after:?}",
                    after.kind
                );
            }
            previous = current;
            samples += 1;
            if done {
                return samples;
            }
            tokio::time::sleep(every).await;
        }
    })
}

fn error_share(summary: &RunSummary, kind: OperationKind) -> f64 {
    let row = summary.stats.get(kind);
    row.error as f64 / row.total() as f64
}

fn assert_pool_swept(rpc: &ScriptedRpc, main: &Account) {
    for account in rpc
        .transfers()
        .iter()
        .filter(|transfer| transfer.to == main.address())
        .map(|transfer| transfer.from)
    {
        assert_eq!(rpc.balance_of(account), U256::ZERO, "{account} not swept");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_second_run_with_ten_percent_failures() {
    let main = Account::generate();
    let rpc = Arc::new(
        ScriptedRpc::new()
            .with_latency(CALL_LATENCY)
            .with_balance(main.address(), ether(10)),
    );
    let runner = LoadRunner::new(
        scenario_config(),
        main.clone(),
        Arc::clone(&rpc) as Arc<dyn ChainRpc>,
    );
    let stats = runner.stats();
    fail_randomly_while_running(&rpc, &runner, FAILURE_RATE, 7);
    let sampler = watch_counters(
        Arc::clone(&stats),
        runner.subscribe(),
        Duration::from_millis(50),
    );

    let started = Instant::now();
    let summary = runner.run().await.expect("run completes");
    let elapsed = started.elapsed();

    assert!(sampler.await.unwrap() > 10);
    assert_eq!(summary.funded_accounts, 4);
    // 20 tps over 4 accounts: 5 slots of two operations each.
    assert_eq!(summary.operations, summary.batches * 10);
    assert_eq!(summary.stats.total(), summary.operations);
    assert_eq!(stats.snapshot(), summary.stats);

    // Around a hundred operations: only a loose band is stable here. The
    // per-kind rates are checked on a longer run below.
    let share = summary.stats.errors() as f64 / summary.stats.total() as f64;
    assert!((0.01..=0.3).contains(&share), "aggregate error share {share:.3}");
    for row in summary.stats.rows() {
        assert!(row.total() > 0, "{} never ran", row.kind);
    }

    // The traffic phase overshoots by at most one batch and the trailing
    // inter-batch delay. A batch is a gas quote, then at worst a lookup's
    // two sequential calls.
    let traffic_bound = RUN_DURATION + CALL_LATENCY * 3 + DEFAULT_BATCH_DELAY;
    assert!(
        summary.elapsed <= adjust_timeout(traffic_bound + Duration::from_millis(150)),
        "running phase took {:?}",
        summary.elapsed
    );
    assert!(elapsed >= RUN_DURATION);

    assert_eq!(summary.main_balance, Some(rpc.balance_of(main.address())));
    assert_eq!(summary.sweep.swept, 4);
    assert_pool_swept(&rpc, &main);
}

#[tokio::test(start_paused = true)]
async fn per_kind_error_rates_follow_the_call_failure_rate() {
    let main = Account::generate();
    let rpc = Arc::new(
        ScriptedRpc::new()
            .with_gas_price(1)
            .with_latency(Duration::from_millis(5))
            .with_balance(main.address(), ether(10)),
    );
    let config = scenario_config()
        .with_target_tps(NonZeroU64::new(40).unwrap())
        .with_duration(Duration::from_secs(20))
        .with_batch_delay(Duration::from_millis(10))
        .with_transfer_value(U256::from(1u64));
    let runner = LoadRunner::new(config, main.clone(), Arc::clone(&rpc) as Arc<dyn ChainRpc>);
    fail_randomly_while_running(&rpc, &runner, FAILURE_RATE, 99);
    let sampler = watch_counters(runner.stats(), runner.subscribe(), Duration::from_millis(100));

    let summary = runner.run().await.expect("run completes");

    assert!(sampler.await.unwrap() > 100);
    assert_eq!(summary.stats.total(), summary.operations);
    assert!(
        summary.stats.get(OperationKind::BlockNumber).total() > 1_000,
        "run too short for rate bounds: {summary}"
    );

    // Single-call kinds fail at the per-call rate.
    for kind in [
        OperationKind::Transfer,
        OperationKind::TransactionCount,
        OperationKind::Balance,
        OperationKind::BlockNumber,
    ] {
        let share = error_share(&summary, kind);
        assert!((0.06..=0.14).contains(&share), "{kind}: error share {share:.3}");
    }
    // A lookup is a transfer and a hash query: 1 - 0.9^2.
    let lookups = error_share(&summary, OperationKind::TransferLookup);
    assert!((0.14..=0.24).contains(&lookups), "lookup error share {lookups:.3}");

    assert_eq!(summary.sweep.swept, 4);
    assert_pool_swept(&rpc, &main);
}

#[tokio::test(start_paused = true)]
async fn run_proceeds_with_partially_funded_pool() {
    let main = Account::generate();
    let rpc = Arc::new(ScriptedRpc::new().with_balance(main.address(), ether(10)));
    let main_address = main.address();
    // The second funding transfer is rejected.
    let funding_calls = AtomicU32::new(0);
    rpc.set_fault(move |call, _| match call {
        ScriptedCall::SendTransfer { from, .. } if *from == main_address => {
            funding_calls.fetch_add(1, Ordering::SeqCst) == 1
        }
        _ => false,
    });
    let runner = LoadRunner::new(
        scenario_config().with_duration(Duration::from_secs(1)),
        main,
        Arc::clone(&rpc) as Arc<dyn ChainRpc>,
    );

    let summary = runner.run().await.expect("run completes");

    assert_eq!(summary.funded_accounts, 3);
    assert_eq!(summary.stats.total(), summary.operations);
    assert_eq!(summary.stats.errors(), 0);
    assert_eq!(summary.sweep.swept, 3);
}

#[tokio::test(start_paused = true)]
async fn failed_sequence_baseline_stops_before_traffic() {
    let main = Account::generate();
    let main_address = main.address();
    let rpc = Arc::new(
        ScriptedRpc::new()
            .with_balance(main_address, ether(10))
            .with_fault(move |call, _| {
                matches!(call, ScriptedCall::TransactionCount(account) if *account != main_address)
            }),
    );
    let runner = LoadRunner::new(
        scenario_config(),
        main,
        Arc::clone(&rpc) as Arc<dyn ChainRpc>,
    );
    let stats = runner.stats();
    let phase = runner.subscribe();

    let err = runner.run().await.expect_err("baseline failure is fatal");

    assert!(matches!(err, LoadTestError::SequenceInit { .. }), "{err}");
    assert_eq!(*phase.borrow(), RunPhase::Initializing);
    assert_eq!(stats.snapshot().total(), 0);
    assert!(
        !rpc.transfers()
            .iter()
            .any(|transfer| transfer.from != main_address && transfer.to != main_address),
        "no pool-to-pool traffic may be sent"
    );
    assert!(
        OperationKind::ALL
            .iter()
            .all(|kind| stats.snapshot().get(*kind).total() == 0)
    );
}

//! Property: concurrent allocation per account yields exactly
//! `base..base + n`, whatever the base, the number of callers, or how
//! callers for several accounts interleave.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use alloy_primitives::Address;
use load_framework_workflows::NonceAllocator;
use proptest::prelude::*;
use tokio::{runtime::Builder, task::JoinSet};

fn allocate_concurrently(
    bases: &[(Address, u64)],
    callers: &[(Address, usize)],
    workers: usize,
) -> HashMap<Address, Vec<u64>> {
    let runtime = Builder::new_multi_thread()
        .worker_threads(workers)
        .build()
        .unwrap();
    let nonces = Arc::new(NonceAllocator::from_bases(bases.iter().copied()));

    runtime.block_on(async {
        let mut tasks = JoinSet::new();
        for &(account, count) in callers {
            for _ in 0..count {
                let nonces = Arc::clone(&nonces);
                tasks.spawn(async move {
                    tokio::task::yield_now().await;
                    (account, nonces.allocate(account).await.unwrap())
                });
            }
        }

        let mut issued: HashMap<Address, Vec<u64>> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (account, nonce) = joined.unwrap();
            issued.entry(account).or_default().push(nonce);
        }
        issued
    })
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 48, .. ProptestConfig::default() })]

    #[test]
    fn single_account_allocations_are_gap_free(
        base in 0u64..u64::MAX / 2,
        count in 1usize..200,
        workers in 1usize..8,
    ) {
        let account = Address::repeat_byte(0x11);
        let issued = allocate_concurrently(&[(account, base)], &[(account, count)], workers);

        let nonces = &issued[&account];
        let unique: BTreeSet<u64> = nonces.iter().copied().collect();
        prop_assert_eq!(unique.len(), nonces.len(), "duplicate nonce issued");
        let expected: BTreeSet<u64> = (base..base + count as u64).collect();
        prop_assert_eq!(unique, expected);
    }

    #[test]
    fn interleaved_accounts_stay_independent(
        bases in prop::collection::vec(0u64..1_000_000, 1..6),
        counts in prop::collection::vec(1usize..64, 1..6),
        workers in 1usize..8,
    ) {
        let accounts: Vec<(Address, u64)> = bases
            .iter()
            .enumerate()
            .map(|(i, base)| (Address::repeat_byte(i as u8 + 1), *base))
            .collect();
        let callers: Vec<(Address, usize)> = accounts
            .iter()
            .zip(counts.iter().cycle())
            .map(|((account, _), count)| (*account, *count))
            .collect();

        let issued = allocate_concurrently(&accounts, &callers, workers);

        for ((account, base), (_, count)) in accounts.iter().zip(&callers) {
            let mut nonces = issued[account].clone();
            nonces.sort_unstable();
            let expected: Vec<u64> = (*base..*base + *count as u64).collect();
            prop_assert_eq!(nonces, expected);
        }
    }
}

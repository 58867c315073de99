use std::fmt;

use alloy_primitives::Address;
use rand::{Rng, seq::SliceRandom as _};

/// Upper bound on what a batch reserves up front; larger batches grow as
/// they are filled.
pub const MAX_PREALLOCATED_OPERATIONS: usize = 1 << 16;

/// Stats bucket of a generated operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    Transfer,
    TransactionCount,
    Balance,
    BlockNumber,
    TransferLookup,
}

impl OperationKind {
    pub const COUNT: usize = 5;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Transfer,
        Self::TransactionCount,
        Self::Balance,
        Self::BlockNumber,
        Self::TransferLookup,
    ];

    /// Kinds drawn for the second operation of every slot.
    pub const READS: [Self; 4] = [
        Self::TransactionCount,
        Self::Balance,
        Self::BlockNumber,
        Self::TransferLookup,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Transfer => "sendTransaction",
            Self::TransactionCount => "getTransactionCount",
            Self::Balance => "getBalance",
            Self::BlockNumber => "getBlockNumber",
            Self::TransferLookup => "getTransaction",
        }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Transfer => 0,
            Self::TransactionCount => 1,
            Self::Balance => 2,
            Self::BlockNumber => 3,
            Self::TransferLookup => 4,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One request to run against the node. Transfers get their nonce when they
/// execute, not when they are generated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Transfer { sender: Address, target: Address },
    TransactionCount { account: Address },
    Balance { account: Address },
    BlockNumber,
    /// A second transfer followed by a lookup of its hash.
    TransferLookup { sender: Address, target: Address },
}

impl Operation {
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Transfer { .. } => OperationKind::Transfer,
            Self::TransactionCount { .. } => OperationKind::TransactionCount,
            Self::Balance { .. } => OperationKind::Balance,
            Self::BlockNumber => OperationKind::BlockNumber,
            Self::TransferLookup { .. } => OperationKind::TransferLookup,
        }
    }
}

/// Builds one tick's operations: for every slot, a transfer between two
/// uniformly chosen pool accounts (possibly the same one) followed by one
/// uniformly chosen read.
///
/// Returns an empty batch for an empty pool.
pub fn generate_batch<R>(pool: &[Address], slots: usize, rng: &mut R) -> Vec<Operation>
where
    R: Rng + ?Sized,
{
    if pool.is_empty() {
        return Vec::new();
    }

    let mut batch = Vec::with_capacity(batch_capacity(slots));
    for _ in 0..slots {
        batch.push(Operation::Transfer {
            sender: pick(pool, rng),
            target: pick(pool, rng),
        });
        batch.push(read_operation(pool, rng));
    }
    batch
}

/// Operations reserved for a batch of `slots`: two per slot, capped.
#[must_use]
pub const fn batch_capacity(slots: usize) -> usize {
    let wanted = slots.saturating_mul(2);
    if wanted < MAX_PREALLOCATED_OPERATIONS {
        wanted
    } else {
        MAX_PREALLOCATED_OPERATIONS
    }
}

fn read_operation<R>(pool: &[Address], rng: &mut R) -> Operation
where
    R: Rng + ?Sized,
{
    let kind = OperationKind::READS
        .choose(rng)
        .copied()
        .unwrap_or(OperationKind::BlockNumber);

    match kind {
        OperationKind::TransactionCount => Operation::TransactionCount {
            account: pick(pool, rng),
        },
        OperationKind::Balance => Operation::Balance {
            account: pick(pool, rng),
        },
        OperationKind::TransferLookup => Operation::TransferLookup {
            sender: pick(pool, rng),
            target: pick(pool, rng),
        },
        OperationKind::BlockNumber | OperationKind::Transfer => Operation::BlockNumber,
    }
}

fn pick<R>(pool: &[Address], rng: &mut R) -> Address
where
    R: Rng + ?Sized,
{
    pool[rng.gen_range(0..pool.len())]
}

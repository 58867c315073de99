pub mod config;
pub mod error;
pub mod mix;
pub mod nonce;
pub mod pool;
pub mod runner;
pub mod stats;

pub use config::{LoadConfig, RunPlan};
pub use error::LoadTestError;
pub use mix::{Operation, OperationKind, generate_batch};
pub use nonce::{NonceAllocator, NonceReservation, UnknownAccount};
pub use pool::{AccountPool, SweepReport};
pub use runner::{LoadRunner, RunPhase, RunSummary, load_main_account, run_load_test};
pub use stats::{KindStats, Outcome, StatsRenderer, StatsSnapshot, StatsTable};

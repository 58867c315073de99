use std::{
    num::{NonZeroU64, NonZeroUsize},
    time::Duration,
};

use alloy_primitives::U256;
use load_framework_core::WEI_PER_ETHER;

use crate::error::LoadTestError;

pub const DEFAULT_TARGET_TPS: u64 = 20;
pub const DEFAULT_DURATION: Duration = Duration::from_secs(30);
pub const DEFAULT_POOL_SIZE: usize = 4;
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(250);
pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_FUNDING_SETTLE_DELAY: Duration = Duration::from_secs(1);
/// Most slots one batch may hold; each slot spawns two tasks.
pub const MAX_BATCH_SIZE: u64 = 100_000;

/// Configuration for one load test run.
#[derive(Clone, Debug)]
pub struct LoadConfig {
    /// Target transactions per second.
    pub target_tps: NonZeroU64,
    /// Wall-clock length of the traffic phase.
    pub duration: Duration,
    /// Number of ephemeral accounts generated for the run.
    pub pool_size: NonZeroUsize,
    /// Wei sent from the main account to each pool account.
    pub fund_amount: U256,
    /// Wei moved by every generated transfer.
    pub transfer_value: U256,
    /// Pause after each batch settles.
    pub batch_delay: Duration,
    /// Cadence of the live stats repaint.
    pub render_interval: Duration,
    /// Pause after each funding transfer.
    pub funding_settle_delay: Duration,
    /// Repaint the stats block on stderr while running.
    pub live_render: bool,
    /// Seed for the request mix; entropy when unset.
    pub seed: Option<u64>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            target_tps: NonZeroU64::new(DEFAULT_TARGET_TPS).unwrap_or(NonZeroU64::MIN),
            duration: DEFAULT_DURATION,
            pool_size: NonZeroUsize::new(DEFAULT_POOL_SIZE).unwrap_or(NonZeroUsize::MIN),
            fund_amount: U256::from(WEI_PER_ETHER / 100),
            transfer_value: U256::from(WEI_PER_ETHER / 10_000),
            batch_delay: DEFAULT_BATCH_DELAY,
            render_interval: DEFAULT_RENDER_INTERVAL,
            funding_settle_delay: DEFAULT_FUNDING_SETTLE_DELAY,
            live_render: true,
            seed: None,
        }
    }
}

impl LoadConfig {
    /// Creates a config for `target_tps` over `duration_secs`, rejecting
    /// zero for either.
    pub fn new(target_tps: u64, duration_secs: u64) -> Result<Self, LoadTestError> {
        let target_tps =
            NonZeroU64::new(target_tps).ok_or(LoadTestError::ZeroValue { field: "target_tps" })?;
        if duration_secs == 0 {
            return Err(LoadTestError::ZeroValue {
                field: "duration_secs",
            });
        }

        Ok(Self {
            target_tps,
            duration: Duration::from_secs(duration_secs),
            ..Self::default()
        })
    }

    #[must_use]
    pub const fn with_target_tps(mut self, tps: NonZeroU64) -> Self {
        self.target_tps = tps;
        self
    }

    #[must_use]
    pub const fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    #[must_use]
    pub const fn with_pool_size(mut self, size: NonZeroUsize) -> Self {
        self.pool_size = size;
        self
    }

    #[must_use]
    pub const fn with_fund_amount(mut self, wei: U256) -> Self {
        self.fund_amount = wei;
        self
    }

    #[must_use]
    pub const fn with_transfer_value(mut self, wei: U256) -> Self {
        self.transfer_value = wei;
        self
    }

    #[must_use]
    pub const fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_render_interval(mut self, interval: Duration) -> Self {
        self.render_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_funding_settle_delay(mut self, delay: Duration) -> Self {
        self.funding_settle_delay = delay;
        self
    }

    #[must_use]
    pub const fn with_live_render(mut self, enabled: bool) -> Self {
        self.live_render = enabled;
        self
    }

    #[must_use]
    pub const fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Derives the immutable run plan.
    pub fn plan(&self) -> Result<RunPlan, LoadTestError> {
        if self.duration.is_zero() {
            return Err(LoadTestError::ZeroValue { field: "duration" });
        }
        if self.render_interval.is_zero() {
            return Err(LoadTestError::ZeroValue {
                field: "render_interval",
            });
        }

        let slots = self.target_tps.get().div_ceil(self.pool_size.get() as u64);
        if slots > MAX_BATCH_SIZE {
            return Err(LoadTestError::BatchTooLarge {
                batch_size: slots,
                max: MAX_BATCH_SIZE,
            });
        }

        Ok(RunPlan {
            batch_size: batch_size(self.target_tps, self.pool_size),
            pool_size: self.pool_size,
            duration: self.duration,
            batch_delay: self.batch_delay,
        })
    }
}

/// Values computed once at run start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunPlan {
    /// Slots per batch; each slot yields one transfer and one read.
    pub batch_size: usize,
    pub pool_size: NonZeroUsize,
    pub duration: Duration,
    pub batch_delay: Duration,
}

/// `ceil(target_tps / pool_size)`.
#[must_use]
pub fn batch_size(target_tps: NonZeroU64, pool_size: NonZeroUsize) -> usize {
    let slots = target_tps.get().div_ceil(pool_size.get() as u64);
    usize::try_from(slots).unwrap_or(usize::MAX)
}

//! Replica sizing from expected load.
//!
//! Requests per second come from peak concurrent users; each
//! request is budgeted 8 millicores and each web replica 800. One
//! processor is added per 2000 users and one worker per 3000
//! users.

use crate::error::{DeployError, DeployResult};

pub const DEFAULT_REQUESTS_PER_MINUTE: u64 = 6;

pub const MILLICORES_PER_REQUEST: u64 = 8;
pub const MILLICORES_PER_WEB_REPLICA: u64 = 800;
pub const USERS_PER_PROCESSOR: u64 = 2000;
pub const USERS_PER_WORKER: u64 = 3000;

pub const MIN_WEB_REPLICAS: u64 = 2;
pub const MIN_PROCESSOR_REPLICAS: u64 = 1;
pub const MIN_WORKER_REPLICAS: u64 = 1;

/// Expected load supplied by the operator at install or scale
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityInput {
    pub peak_concurrent_users: u64,
    pub requests_per_minute_per_user: u64,
}

impl CapacityInput {
    /// Both figures must be positive.
    pub fn new(
        peak_concurrent_users: u64,
        requests_per_minute_per_user: u64,
    ) -> DeployResult<Self> {
        if peak_concurrent_users == 0 {
            return Err(DeployError::InvalidInput(
                "peak concurrent users must be at least 1".into(),
            ));
        }
        if requests_per_minute_per_user == 0 {
            return Err(DeployError::InvalidInput(
                "requests per minute per user must be at least 1".into(),
            ));
        }
        Ok(Self {
            peak_concurrent_users,
            requests_per_minute_per_user,
        })
    }

    /// Input with the default request rate of 6 per minute.
    pub fn with_default_rate(peak_concurrent_users: u64) -> DeployResult<Self> {
        Self::new(peak_concurrent_users, DEFAULT_REQUESTS_PER_MINUTE)
    }

    #[must_use]
    pub fn estimate(&self) -> ReplicaPlan {
        estimate(self.peak_concurrent_users, self.requests_per_minute_per_user)
    }
}

/// Replica counts for the horizontally scalable services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaPlan {
    pub web: u64,
    pub processor: u64,
    pub worker: u64,
}

impl ReplicaPlan {
    /// Build a plan from explicit counts, rejecting any count
    /// below its floor.
    pub fn new(web: u64, processor: u64, worker: u64) -> DeployResult<Self> {
        check_floor("web replicas", web, MIN_WEB_REPLICAS)?;
        check_floor("processor replicas", processor, MIN_PROCESSOR_REPLICAS)?;
        check_floor("worker replicas", worker, MIN_WORKER_REPLICAS)?;
        Ok(Self {
            web,
            processor,
            worker,
        })
    }

    /// Replace computed counts with operator overrides where
    /// given.
    pub fn with_overrides(
        self,
        web: Option<u64>,
        processor: Option<u64>,
        worker: Option<u64>,
    ) -> DeployResult<Self> {
        Self::new(
            web.unwrap_or(self.web),
            processor.unwrap_or(self.processor),
            worker.unwrap_or(self.worker),
        )
    }
}

fn check_floor(name: &str, value: u64, floor: u64) -> DeployResult<()> {
    if value < floor {
        return Err(DeployError::InvalidInput(format!(
            "{name} must be at least {floor}, got {value}"
        )));
    }
    Ok(())
}

/// Derive a [`ReplicaPlan`] from peak concurrent users and the
/// per-user request rate.
///
/// Integer arithmetic throughout; there is no upper clamp, very
/// large inputs saturate at `u64::MAX` instead of overflowing.
///
/// ```
/// use stackpilot::capacity::estimate;
///
/// let plan = estimate(10_000, 6);
/// assert_eq!((plan.web, plan.processor, plan.worker), (10, 6, 4));
/// ```
#[must_use]
pub fn estimate(peak_concurrent_users: u64, requests_per_minute_per_user: u64) -> ReplicaPlan {
    let users = u128::from(peak_concurrent_users);
    let requests_per_second = users * u128::from(requests_per_minute_per_user) / 60;
    let millicores = requests_per_second * u128::from(MILLICORES_PER_REQUEST);
    let web = millicores.div_ceil(u128::from(MILLICORES_PER_WEB_REPLICA));

    ReplicaPlan {
        web: saturate(web).max(MIN_WEB_REPLICAS),
        processor: (peak_concurrent_users / USERS_PER_PROCESSOR).saturating_add(1),
        worker: (peak_concurrent_users / USERS_PER_WORKER).saturating_add(1),
    }
}

fn saturate(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

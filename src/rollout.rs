//! Applying a topology and restarting services one replica at a
//! time.
//!
//! Waiting goes through [`Sleeper`] so the settle delay and the
//! health poll interval can be observed in tests without a real
//! container runtime.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{DeployError, DeployResult};
use crate::runtime::ContainerRuntime;
use crate::topology::HealthTarget;

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

/// Blocks the current thread.
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Timing of restarts and health polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutSettings {
    /// Pause between restarting consecutive replicas.
    pub settle_delay: Duration,
    pub health_interval: Duration,
    pub health_attempts: u32,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            health_interval: Duration::from_secs(5),
            health_attempts: 30,
        }
    }
}

/// Result of polling a health target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    Healthy { attempts: u32 },
    TimedOut { attempts: u32 },
}

pub struct RolloutDriver<'a> {
    runtime: &'a dyn ContainerRuntime,
    sleeper: &'a dyn Sleeper,
    settings: RolloutSettings,
}

impl<'a> RolloutDriver<'a> {
    #[must_use]
    pub fn new(
        runtime: &'a dyn ContainerRuntime,
        sleeper: &'a dyn Sleeper,
        settings: RolloutSettings,
    ) -> Self {
        Self {
            runtime,
            sleeper,
            settings,
        }
    }

    /// Pull (optionally) and converge. Any failure aborts before
    /// health verification.
    pub fn apply(&self, pull: bool) -> DeployResult<()> {
        if pull {
            info!("pulling images");
            self.runtime.pull()?;
        }
        info!("converging containers");
        self.runtime.up()
    }

    /// Poll `target` until every instance is up or the attempt
    /// budget runs out. Never fails: a timeout is logged and
    /// reported, and the deployment carries on.
    pub fn wait_healthy(&self, target: &HealthTarget) -> HealthOutcome {
        let attempts = self.settings.health_attempts.max(1);

        for attempt in 1..=attempts {
            match self.runtime.health(&target.service) {
                Ok(statuses) if is_up(&statuses, target.has_probe) => {
                    info!(service = %target.service, attempt, "service is healthy");
                    return HealthOutcome::Healthy { attempts: attempt };
                }
                Ok(statuses) => {
                    debug!(
                        service = %target.service,
                        attempt,
                        max = attempts,
                        statuses = ?statuses,
                        "waiting for service"
                    );
                }
                Err(e) => {
                    debug!(service = %target.service, attempt, error = %e, "health query failed");
                }
            }

            if attempt < attempts {
                self.sleeper.sleep(self.settings.health_interval);
            }
        }

        let timeout = DeployError::HealthcheckTimeout(target.service.clone(), attempts);
        warn!("{timeout}; continuing");
        HealthOutcome::TimedOut { attempts }
    }

    /// Restart the running replicas of `service` one at a time,
    /// pausing `settle_delay` between consecutive restarts.
    ///
    /// Returns how many replicas were restarted. No running
    /// replicas is a warning, not an error.
    pub fn gentle_restart(&self, service: &str) -> DeployResult<usize> {
        let instances = self.runtime.instances(service)?;

        if instances.is_empty() {
            warn!(service, "no running instances to restart");
            return Ok(0);
        }

        let total = instances.len();
        for (index, id) in instances.iter().enumerate() {
            info!(service, instance = %id, n = index + 1, total, "restarting");
            self.runtime.restart_instance(id)?;

            if index + 1 < total {
                self.sleeper.sleep(self.settings.settle_delay);
            }
        }

        info!(service, total, "gentle restart complete");
        Ok(total)
    }
}

/// All instances report up. Without a probe, `running` counts.
fn is_up(statuses: &[String], has_probe: bool) -> bool {
    !statuses.is_empty()
        && statuses
            .iter()
            .all(|s| s == "healthy" || (!has_probe && s == "running"))
}

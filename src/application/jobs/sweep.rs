//! Cron job running the cache eviction sweep on a schedule.
//!
//! Shares its implementation with the manual `POST /cleanup` trigger; the
//! cron worker is just a second entry point into the same sweep.

use std::str::FromStr;
use std::sync::Arc;

use apalis::prelude::*;
use apalis_cron::Schedule;

use crate::application::cache::ObjectCache;
use crate::application::error::AppError;

/// Marker struct for the cron-triggered sweep.
/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron
/// compatibility.
#[derive(Default, Debug, Clone)]
pub struct SweepJob;

impl From<chrono::DateTime<chrono::Utc>> for SweepJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

/// Context for the sweep worker.
#[derive(Clone)]
pub struct SweepContext {
    pub cache: Arc<ObjectCache>,
}

/// Process one scheduled sweep: delete every cached object past retention.
pub async fn process_sweep_job(
    _job: SweepJob,
    ctx: Data<SweepContext>,
) -> Result<(), apalis::prelude::Error> {
    let retention = ctx.cache.retention();
    match ctx.cache.sweep_expired(retention).await {
        Ok(evicted) if evicted > 0 => {
            tracing::info!(evicted, "Eviction sweep removed expired objects");
        }
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(error = %err, "Eviction sweep failed");
        }
    }
    Ok(())
}

/// Parse the configured cron expression for the sweep worker.
pub fn sweep_schedule(expression: &str) -> Result<Schedule, AppError> {
    Schedule::from_str(expression).map_err(|err| {
        AppError::unexpected(format!(
            "invalid cache sweep schedule `{expression}`: {err}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_parses() {
        let schedule = sweep_schedule("0 0 3 * * *").expect("schedule");
        let upcoming: Vec<_> = schedule.upcoming(chrono::Utc).take(2).collect();
        assert_eq!(upcoming.len(), 2);
    }

    #[test]
    fn garbage_schedule_is_rejected() {
        assert!(sweep_schedule("not a cron line").is_err());
    }
}

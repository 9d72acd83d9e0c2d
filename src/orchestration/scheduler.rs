//! Daily trigger for reconciliation runs

use crate::core::error::MirrorError;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info};

/// Time of day (UTC) at which a run starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    hour: u32,
    minute: u32,
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self {
            hour: crate::core::config::DEFAULT_SCHEDULE_HOUR,
            minute: 0,
        }
    }
}

impl DailySchedule {
    pub fn new(hour: u32, minute: u32) -> Result<Self, MirrorError> {
        if hour > 23 || minute > 59 {
            return Err(MirrorError::ConfigError(format!(
                "invalid schedule time {:02}:{:02}",
                hour, minute
            )));
        }
        Ok(Self { hour, minute })
    }

    fn time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }

    /// First trigger strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.time()).and_utc();
        if today > now {
            today
        } else {
            today + ChronoDuration::days(1)
        }
    }

    /// How long to sleep from `now` until the next trigger
    pub fn until_next(&self, now: DateTime<Utc>) -> Duration {
        (self.next_after(now) - now).to_std().unwrap_or_default()
    }
}

impl std::fmt::Display for DailySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02} UTC", self.hour, self.minute)
    }
}

/// Runs a job at every trigger until interrupted
pub struct Scheduler {
    schedule: DailySchedule,
    run_on_startup: bool,
}

impl Scheduler {
    pub fn new(schedule: DailySchedule, run_on_startup: bool) -> Self {
        Self {
            schedule,
            run_on_startup,
        }
    }

    /// Loop forever; each job is awaited before the next sleep so runs never
    /// overlap. Job errors are logged and the loop continues. Returns on Ctrl-C.
    pub async fn run<F, Fut>(&self, mut job: F) -> Result<(), MirrorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), MirrorError>>,
    {
        if self.run_on_startup {
            info!("running on startup");
            Self::run_job(&mut job).await;
        }

        loop {
            let now = Utc::now();
            let next = self.schedule.next_after(now);
            info!(next = %next.to_rfc3339(), schedule = %self.schedule, "waiting for next run");

            tokio::select! {
                _ = tokio::time::sleep(self.schedule.until_next(now)) => {
                    Self::run_job(&mut job).await;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    return Ok(());
                }
            }
        }
    }

    async fn run_job<F, Fut>(job: &mut F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), MirrorError>>,
    {
        if let Err(e) = job().await {
            error!(code = e.code(), error = %e, "scheduled run failed");
        }
    }
}

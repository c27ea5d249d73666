use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info};

/// Work the scheduler fires once per elapsed interval.
#[async_trait]
pub trait ScheduledJob: Send {
    async fn fire(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Firing,
}

#[derive(Debug)]
pub struct Scheduler {
    last_fired: DateTime<Utc>,
    interval: Duration,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(interval: Duration, started_at: DateTime<Utc>) -> Self {
        Scheduler {
            last_fired: started_at,
            interval,
            state: SchedulerState::Idle,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == SchedulerState::Idle && now - self.last_fired >= self.interval
    }

    pub fn begin(&mut self) {
        self.state = SchedulerState::Firing;
    }

    /// Back to idle. The clock resets whether or not the job succeeded.
    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.last_fired = now;
        self.state = SchedulerState::Idle;
    }

    /// Wakes every `tick` and fires `job` when due, until `shutdown` flips to true.
    pub async fn run<J: ScheduledJob>(
        mut self,
        tick: std::time::Duration,
        mut shutdown: watch::Receiver<bool>,
        mut job: J,
    ) {
        info!("Scheduler started (interval: {} minutes)", self.interval.num_minutes());
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = sleep(tick) => {}
            }

            let now = Utc::now();
            if !self.is_due(now) {
                debug!("Next post in {} seconds", (self.interval - (now - self.last_fired)).num_seconds());
                continue;
            }

            self.begin();
            info!("Scheduled post is due (last run at {})", self.last_fired);
            tokio::select! {
                _ = job.fire() => {}
                _ = shutdown.changed() => {
                    info!("Shutdown requested during scheduled post");
                    break;
                }
            }
            self.finish(Utc::now());
        }
        info!("Scheduler stopped");
    }
}

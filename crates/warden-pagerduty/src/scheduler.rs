//! Periodic background tasks with a single-flight guard.
//!
//! Each tick spawns the task detached so the timer keeps its cadence. A tick
//! that finds the previous run still in flight is skipped.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicSchedule {
    pub first_delay: Duration,
    pub period: Duration,
}

impl PeriodicSchedule {
    pub const fn from_secs(first_delay_secs: u64, period_secs: u64) -> Self {
        Self {
            first_delay: Duration::from_secs(first_delay_secs),
            period: Duration::from_secs(period_secs),
        }
    }
}

#[derive(Debug, Default)]
pub struct SingleFlight {
    in_flight: AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claims the flight; `None` while another run holds it.
    pub fn try_begin(self: &Arc<Self>) -> Option<FlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                flight: Arc::clone(self),
            })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Releases the flight on drop, including when the run panics.
#[derive(Debug)]
pub struct FlightGuard {
    flight: Arc<SingleFlight>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.flight.in_flight.store(false, Ordering::Release);
    }
}

/// Runs `task` on `schedule` until the returned handle is aborted.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    schedule: PeriodicSchedule,
    flight: Arc<SingleFlight>,
    task: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let period = schedule.period.max(Duration::from_secs(1));
        let mut timer = interval_at(Instant::now() + schedule.first_delay, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            timer.tick().await;
            let Some(guard) = flight.try_begin() else {
                debug!(task = name, "previous run still in flight; skipping tick");
                continue;
            };
            let run = task();
            tokio::spawn(async move {
                let _guard = guard;
                run.await;
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn single_flight_rejects_second_claim_until_release() {
        let flight = SingleFlight::new();
        let guard = flight.try_begin().expect("first claim");
        assert!(flight.is_in_flight());
        assert!(flight.try_begin().is_none());
        drop(guard);
        assert!(!flight.is_in_flight());
        assert!(flight.try_begin().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn functional_slow_runs_never_overlap() {
        let started = Arc::new(AtomicUsize::new(0));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));
        let flight = SingleFlight::new();

        let handle = {
            let started = Arc::clone(&started);
            let concurrent = Arc::clone(&concurrent);
            let max_concurrent = Arc::clone(&max_concurrent);
            spawn_periodic(
                "test",
                PeriodicSchedule::from_secs(1, 1),
                flight,
                move || {
                    let started = Arc::clone(&started);
                    let concurrent = Arc::clone(&concurrent);
                    let max_concurrent = Arc::clone(&max_concurrent);
                    async move {
                        started.fetch_add(1, Ordering::SeqCst);
                        let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                        max_concurrent.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(3_500)).await;
                        concurrent.fetch_sub(1, Ordering::SeqCst);
                    }
                },
            )
        };

        tokio::time::sleep(Duration::from_secs(10)).await;
        handle.abort();
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
        let runs = started.load(Ordering::SeqCst);
        assert!((2..=3).contains(&runs), "runs={runs}");
    }
}

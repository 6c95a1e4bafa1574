//! Periodic measurement scheduling
//!
//! Runs a [`Measurement`] once right away, then on a fixed interval until a
//! shutdown signal arrives. Measurements run inline in the scheduler task, so
//! at most one is ever in flight; ticks missed during a long run are dropped.
//!
//! Shutdown is cooperative: the signal is only observed while waiting for the
//! next tick, and a measurement that is already running (including its child
//! process) is allowed to finish.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::runner::Measurement;

/// Farthest first deadline used when `now + interval` does not fit the clock
const CLOCK_CEILING: Duration = Duration::from_secs(30 * 365 * 24 * 3600);

/// Lifecycle of the scheduler loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// Not started yet
    Idle,
    /// A measurement is in flight
    Running,
    /// Waiting for the next tick
    Waiting,
    /// Stopped after a shutdown signal (terminal)
    Cancelled,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Drives a measurement on a fixed cadence
pub struct Scheduler<M> {
    measurement: Arc<M>,
    interval: Duration,
    state: watch::Sender<SchedulerState>,
}

impl<M: Measurement + 'static> Scheduler<M> {
    /// Create a scheduler in the `Idle` state
    ///
    /// # Panics
    ///
    /// Panics if `interval` is zero; `Config::validate()` rejects that earlier.
    pub fn new(measurement: Arc<M>, interval: Duration) -> Self {
        assert!(!interval.is_zero(), "scheduler interval must be non-zero");
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            measurement,
            interval,
            state,
        }
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Run until `shutdown` turns true (or its sender is dropped)
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval = ?self.interval,
            "Statistics will be collected and processed every {:?}",
            self.interval
        );

        // One run at startup so metrics exist before the first interval elapses
        self.measure_once().await;

        let first_tick = Instant::now()
            .checked_add(self.interval)
            .unwrap_or_else(|| {
                tracing::warn!(
                    interval = ?self.interval,
                    "Interval overflows the clock, next run capped to {:?} from now",
                    CLOCK_CEILING
                );
                Instant::now() + CLOCK_CEILING
            });
        let mut ticker = tokio::time::interval_at(first_tick, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            self.state.send_replace(SchedulerState::Waiting);

            tokio::select! {
                biased;

                dropped = async { shutdown.wait_for(|stop| *stop).await.is_err() } => {
                    if dropped {
                        tracing::debug!("Shutdown sender dropped, stopping scheduler");
                    }
                    break;
                }
                _ = ticker.tick() => {
                    tracing::debug!("Running scheduled speed test");
                    self.measure_once().await;
                }
            }
        }

        self.state.send_replace(SchedulerState::Cancelled);
        tracing::info!("Measurement schedule stopped");
    }

    /// Spawn the loop on the runtime, with a watchdog that logs if it dies
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let handle = tokio::spawn(self.run(shutdown));

        tokio::spawn(async move {
            if let Err(e) = handle.await {
                tracing::error!(
                    error = %e,
                    "Measurement scheduler task panicked. No further measurements \
                    will run; metrics keep their last values until restart."
                );
            }
        })
    }

    async fn measure_once(&self) {
        self.state.send_replace(SchedulerState::Running);

        if let Err(e) = self.measurement.run().await {
            tracing::warn!(
                error = %e,
                kind = e.kind(),
                "cannot execute speed test"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MeasurementError;
    use crate::result::MissingField;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts runs and tracks how many overlap
    #[derive(Default)]
    struct FakeMeasurement {
        runs: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        run_for: Duration,
        fail: bool,
    }

    #[async_trait]
    impl Measurement for FakeMeasurement {
        async fn run(&self) -> Result<(), MeasurementError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.run_for).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                Err(MissingField::Ping.into())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_immediately_then_on_interval() {
        let fake = Arc::new(FakeMeasurement::default());
        let scheduler = Scheduler::new(Arc::clone(&fake), Duration::from_secs(60));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(stop_rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fake.runs.load(Ordering::SeqCst), 1, "startup run");

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fake.runs.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fake.runs.load(Ordering::SeqCst), 4);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_schedule() {
        let fake = Arc::new(FakeMeasurement {
            fail: true,
            ..Default::default()
        });
        let scheduler = Scheduler::new(Arc::clone(&fake), Duration::from_secs(10));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(stop_rx));

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(fake.runs.load(Ordering::SeqCst), 4);

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_measurements_never_overlap() {
        let fake = Arc::new(FakeMeasurement {
            run_for: Duration::from_secs(25),
            ..Default::default()
        });
        let scheduler = Scheduler::new(Arc::clone(&fake), Duration::from_secs(10));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(stop_rx));

        tokio::time::sleep(Duration::from_secs(200)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(fake.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(fake.runs.load(Ordering::SeqCst) < 20, "missed ticks must be dropped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_measurement() {
        let fake = Arc::new(FakeMeasurement {
            run_for: Duration::from_secs(30),
            ..Default::default()
        });
        let scheduler = Scheduler::new(Arc::clone(&fake), Duration::from_secs(60));
        let mut state = scheduler.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(stop_rx));

        state
            .wait_for(|s| *s == SchedulerState::Running)
            .await
            .unwrap();
        stop_tx.send(true).unwrap();

        let started = Instant::now();
        handle.await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(29));
        assert_eq!(fake.in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(fake.runs.load(Ordering::SeqCst), 1);
        assert_eq!(*state.borrow(), SchedulerState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_transitions() {
        let fake = Arc::new(FakeMeasurement::default());
        let scheduler = Scheduler::new(Arc::clone(&fake), Duration::from_secs(60));
        let mut state = scheduler.subscribe();
        assert_eq!(*state.borrow(), SchedulerState::Idle);

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(stop_rx));

        state
            .wait_for(|s| *s == SchedulerState::Waiting)
            .await
            .unwrap();
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(*state.borrow(), SchedulerState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_shutdown_sender_stops_loop() {
        let fake = Arc::new(FakeMeasurement::default());
        let scheduler = Scheduler::new(fake, Duration::from_secs(60));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(stop_rx));

        drop(stop_tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler should stop")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_spawn_on_multi_thread_runtime() {
        let fake = Arc::new(FakeMeasurement::default());
        let scheduler = Scheduler::new(Arc::clone(&fake), Duration::from_secs(3600));
        let mut state = scheduler.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = scheduler.spawn(stop_rx);

        state
            .wait_for(|s| *s == SchedulerState::Waiting)
            .await
            .unwrap();
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(fake.runs.load(Ordering::SeqCst), 1);
        assert_eq!(*state.borrow(), SchedulerState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_longest_configurable_interval_keeps_loop_alive() {
        let fake = Arc::new(FakeMeasurement::default());
        let scheduler = Scheduler::new(Arc::clone(&fake), crate::config::MAX_INTERVAL);
        let mut state = scheduler.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(stop_rx));

        state
            .wait_for(|s| *s == SchedulerState::Waiting)
            .await
            .unwrap();
        stop_tx.send(true).unwrap();

        handle.await.expect("scheduler must not panic on a long interval");
        assert!(fake.runs.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    #[should_panic(expected = "non-zero")]
    fn test_zero_interval_panics() {
        let _ = Scheduler::new(Arc::new(FakeMeasurement::default()), Duration::ZERO);
    }
}

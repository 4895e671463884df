use crate::host::HostError;
use crate::metrics::METRICS;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const SCHEDULED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Zero periods are not supported by tokio intervals.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Shared timer service. Cloning yields another handle to the same service.
///
/// Callbacks run on the runtime the service was created for, not on the scheduling caller.
#[derive(Debug, Clone)]
pub struct TimerService {
    handle: Handle,
    stopped: CancellationToken,
}

impl TimerService {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            stopped: CancellationToken::new(),
        }
    }

    /// Timer service on the runtime of the calling context.
    pub fn current() -> Result<Self, HostError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| HostError::NoRuntime)
    }

    pub fn schedule_once<F>(&self, delay: Duration, action: F) -> Cancellable
    where
        F: FnOnce() + Send + 'static,
    {
        let cancellable = Cancellable::new(self.stopped.child_token());
        let timer = cancellable.clone();
        METRICS.scheduled_callbacks.inc();

        self.handle.spawn(async move {
            tokio::select! {
                biased;
                _ = timer.token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if timer.try_fire() {
                        action();
                    }
                }
            }
        });
        cancellable
    }

    /// Runs `action` after `initial_delay` and then every `interval` (at least 1ms) until
    /// cancelled. Ticks missed while the action runs are delayed, not bunched.
    pub fn schedule_repeatedly<F>(
        &self,
        initial_delay: Duration,
        interval: Duration,
        mut action: F,
    ) -> Cancellable
    where
        F: FnMut() + Send + 'static,
    {
        let cancellable = Cancellable::new(self.stopped.child_token());
        let timer = cancellable.clone();
        METRICS.scheduled_callbacks.inc();

        self.handle.spawn(async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + initial_delay, interval.max(MIN_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = timer.token.cancelled() => break,
                    _ = ticker.tick() => {
                        if timer.is_cancelled() {
                            break;
                        }
                        if std::panic::catch_unwind(AssertUnwindSafe(&mut action)).is_err() {
                            tracing::error!("repeated timer callback panicked, stopping it");
                            break;
                        }
                    }
                }
            }
        });
        cancellable
    }

    /// Cancels every pending timer created through this service.
    pub fn shutdown(&self) {
        self.stopped.cancel();
    }
}

/// Handle to a scheduled callback.
#[derive(Debug, Clone)]
pub struct Cancellable {
    token: CancellationToken,
    state: Arc<AtomicU8>,
}

impl Cancellable {
    fn new(token: CancellationToken) -> Self {
        Self {
            token,
            state: Arc::new(AtomicU8::new(SCHEDULED)),
        }
    }

    /// Cancels the callback. Returns `true` if this call moved it out of the scheduled state;
    /// after a one-shot callback has fired this is a no-op returning `false`.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(SCHEDULED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        self.token.cancel();
        cancelled
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED || self.token.is_cancelled()
    }

    fn try_fire(&self) -> bool {
        self.state
            .compare_exchange(SCHEDULED, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[tokio::test(start_paused = true)]
    async fn once_fires_after_delay() {
        let timer = TimerService::current().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let cancellable = timer.schedule_once(Duration::from_millis(100), move || {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(fired.load(Ordering::SeqCst));

        // cancelling after firing is a no-op
        assert!(!cancellable.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_firing_prevents_run() {
        let timer = TimerService::current().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let cancellable = timer.schedule_once(Duration::from_millis(50), move || {
            flag.store(true, Ordering::SeqCst);
        });

        assert!(cancellable.cancel());
        assert!(cancellable.is_cancelled());
        assert!(!cancellable.cancel());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_runs_until_cancelled() {
        let timer = TimerService::current().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let cancellable = timer.schedule_repeatedly(
            Duration::from_millis(10),
            Duration::from_millis(10),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );

        tokio::time::sleep(Duration::from_millis(35)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        assert!(cancellable.cancel());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn service_shutdown_cancels_pending_timers() {
        let timer = TimerService::current().unwrap();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let cancellable = timer.schedule_once(Duration::from_millis(10), move || {
            flag.store(true, Ordering::SeqCst);
        });

        timer.shutdown();
        assert!(cancellable.is_cancelled());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}

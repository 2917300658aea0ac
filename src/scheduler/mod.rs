//! Admission control for outbound calls.
//!
//! Every request moves through `RECEIVED → QUEUED → RUNNING → EXECUTING →
//! DONE`:
//!
//! - a token bucket ([`rate`]) behind a fair async mutex governs
//!   `QUEUED → RUNNING`, so queued requests leave in submission order;
//! - a fair semaphore sized to the concurrency limit governs
//!   `RUNNING → EXECUTING`.
//!
//! A request whose deadline passes while it is still `QUEUED` fails with
//! [`ApiError::SchedulerTimeout`] without ever taking a concurrency slot.
//! Counters and slots are owned by a per-request guard, so a request that is
//! dropped mid-flight (caller cancelled, task aborted, panic) still lands in
//! `DONE` and gives its slot back.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::error::{ApiError, ApiResult};
use crate::http::ApiRequest;

mod rate;

use rate::RateGate;

/// Lifecycle of a submitted request. `Done` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Received,
    Queued,
    Running,
    Executing,
    Done,
}

/// Per-state counts.
///
/// `received` through `executing` are live gauges; `done` counts every
/// request settled since the scheduler was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SchedulerStats {
    pub received: u64,
    pub queued: u64,
    pub running: u64,
    pub executing: u64,
    pub done: u64,
}

impl SchedulerStats {
    fn slot(&mut self, state: RequestState) -> &mut u64 {
        match state {
            RequestState::Received => &mut self.received,
            RequestState::Queued => &mut self.queued,
            RequestState::Running => &mut self.running,
            RequestState::Executing => &mut self.executing,
            RequestState::Done => &mut self.done,
        }
    }

    /// Requests submitted but not yet settled.
    pub fn in_flight(&self) -> u64 {
        self.received + self.queued + self.running + self.executing
    }
}

/// Rate- and concurrency-limited gate in front of the transport.
#[derive(Debug)]
pub struct RequestScheduler {
    gate: Option<tokio::sync::Mutex<RateGate>>,
    slots: Semaphore,
    concurrency_limit: usize,
    queue_timeout: Option<std::time::Duration>,
    counts: Mutex<SchedulerStats>,
    next_id: AtomicU64,
}

impl RequestScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        let concurrency_limit = config.concurrency_limit.max(1);
        Self {
            gate: config
                .requests_per_window
                .map(|n| tokio::sync::Mutex::new(RateGate::new(n, config.window))),
            slots: Semaphore::new(concurrency_limit),
            concurrency_limit,
            queue_timeout: config.queue_timeout,
            counts: Mutex::new(SchedulerStats::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn stats(&self) -> SchedulerStats {
        *self.counts.lock()
    }

    /// Waits for admission, then runs `work` while holding a concurrency slot.
    ///
    /// `request` describes the call for deadlines, logging and errors; `work`
    /// performs it.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::SchedulerTimeout`] if the request's deadline (or the
    /// configured queue timeout) passes while it is queued; otherwise whatever
    /// `work` returns.
    pub async fn submit<T, F, Fut>(&self, request: &ApiRequest, work: F) -> ApiResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut pending = PendingRequest::new(self, request);
        let deadline = request
            .deadline
            .or_else(|| self.queue_timeout.map(|t| pending.submitted_at + t));

        pending.advance(RequestState::Queued);
        let admitted = match deadline {
            Some(deadline) => timeout_at(deadline, self.pass_gate()).await.is_ok(),
            None => {
                self.pass_gate().await;
                true
            }
        };
        if !admitted {
            let waited = pending.submitted_at.elapsed();
            warn!(
                id = pending.id,
                endpoint = %pending.endpoint,
                waited_ms = waited.as_millis() as u64,
                "request deadline elapsed while queued"
            );
            pending.advance(RequestState::Done);
            return Err(ApiError::SchedulerTimeout {
                endpoint: pending.endpoint.clone(),
                waited,
            });
        }

        pending.advance(RequestState::Running);
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| ApiError::Config("request scheduler is closed".into()))?;
        pending.hold(permit);
        pending.advance(RequestState::Executing);
        debug!(
            id = pending.id,
            endpoint = %pending.endpoint,
            waited_ms = pending.submitted_at.elapsed().as_millis() as u64,
            "request admitted"
        );

        let result = work().await;
        pending.settle();
        result
    }

    async fn pass_gate(&self) {
        let Some(gate) = &self.gate else {
            return;
        };
        // The lock is held across the sleep so later arrivals queue behind us.
        let mut gate = gate.lock().await;
        while let Err(wait) = gate.try_take(Instant::now()) {
            sleep(wait).await;
        }
    }

    fn transition(&self, from: Option<RequestState>, to: RequestState) {
        let mut counts = self.counts.lock();
        if let Some(from) = from {
            let slot = counts.slot(from);
            *slot = slot.saturating_sub(1);
        }
        *counts.slot(to) += 1;
    }
}

/// Scheduler-side record of one submission.
///
/// Owns the request's place in the counters and, once executing, its
/// concurrency slot.
struct PendingRequest<'a> {
    scheduler: &'a RequestScheduler,
    id: u64,
    endpoint: String,
    submitted_at: Instant,
    state: RequestState,
    slot: Option<SemaphorePermit<'a>>,
}

impl<'a> PendingRequest<'a> {
    fn new(scheduler: &'a RequestScheduler, request: &ApiRequest) -> Self {
        scheduler.transition(None, RequestState::Received);
        Self {
            scheduler,
            id: scheduler.next_id.fetch_add(1, Ordering::Relaxed),
            endpoint: request.endpoint(),
            submitted_at: Instant::now(),
            state: RequestState::Received,
            slot: None,
        }
    }

    fn advance(&mut self, to: RequestState) {
        if self.state == RequestState::Done {
            return;
        }
        self.scheduler.transition(Some(self.state), to);
        self.state = to;
    }

    fn hold(&mut self, permit: SemaphorePermit<'a>) {
        self.slot = Some(permit);
    }

    /// Moves to `DONE`, then frees the slot. The counter must leave
    /// `EXECUTING` before the next request can enter it.
    fn settle(&mut self) {
        if self.state != RequestState::Done {
            debug!(
                id = self.id,
                endpoint = %self.endpoint,
                elapsed_ms = self.submitted_at.elapsed().as_millis() as u64,
                "request settled"
            );
        }
        self.advance(RequestState::Done);
        drop(self.slot.take());
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.settle();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use futures::future::join_all;

    use super::*;
    use crate::http::Method;

    fn request(path: &str) -> ApiRequest {
        ApiRequest::new(Method::Get, path)
    }

    #[tokio::test(start_paused = true)]
    async fn caps_concurrency_and_batches_wall_time() {
        let scheduler = RequestScheduler::new(&SchedulerConfig::unthrottled(3));
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let peak_sampled = AtomicU64::new(0);
        let start = Instant::now();

        let calls = (0..10).map(|i| {
            let req = request(&format!("/v1/deals/{i}"));
            let scheduler = &scheduler;
            let (active, peak, peak_sampled) = (&active, &peak, &peak_sampled);
            async move {
                scheduler
                    .submit(&req, || async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        peak_sampled.fetch_max(scheduler.stats().executing, Ordering::SeqCst);
                        sleep(Duration::from_millis(100)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(i)
                    })
                    .await
            }
        });
        let results = join_all(calls).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert!(peak_sampled.load(Ordering::SeqCst) <= 3);
        // ceil(10 / 3) rounds of 100ms.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(400), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(450), "{elapsed:?}");

        let stats = scheduler.stats();
        assert_eq!(stats.done, 10);
        assert_eq!(stats.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn serves_queued_requests_in_submission_order() {
        let scheduler = RequestScheduler::new(&SchedulerConfig::unthrottled(1));
        let order = Mutex::new(Vec::new());

        let calls = (0..6).map(|i| {
            let req = request("/v1/activities");
            let (scheduler, order) = (&scheduler, &order);
            async move {
                scheduler
                    .submit(&req, || async move {
                        order.lock().push(i);
                        sleep(Duration::from_millis(10)).await;
                        Ok(())
                    })
                    .await
            }
        });
        join_all(calls).await;

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_gate_spaces_admissions() {
        let config = SchedulerConfig {
            requests_per_window: Some(2),
            window: Duration::from_secs(1),
            ..SchedulerConfig::unthrottled(10)
        };
        let scheduler = RequestScheduler::new(&config);
        let start = Instant::now();

        let calls = (0..4).map(|_| {
            let req = request("/v1/persons");
            let scheduler = &scheduler;
            async move { scheduler.submit(&req, || async { Ok(Instant::now()) }).await }
        });
        let admitted: Vec<_> = join_all(calls)
            .await
            .into_iter()
            .map(|r| r.unwrap() - start)
            .collect();

        assert!(admitted[0] < Duration::from_millis(1));
        assert!(admitted[1] < Duration::from_millis(1));
        assert!(admitted[2] >= Duration::from_millis(500));
        assert!(admitted[3] >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_while_queued_is_a_scheduler_timeout() {
        let config = SchedulerConfig {
            requests_per_window: Some(1),
            window: Duration::from_secs(10),
            ..SchedulerConfig::unthrottled(5)
        };
        let scheduler = RequestScheduler::new(&config);
        let ran = AtomicUsize::new(0);

        scheduler
            .submit(&request("/v1/deals"), || async { Ok(()) })
            .await
            .unwrap();

        let late = request("/v1/deals").with_deadline(Instant::now() + Duration::from_millis(100));
        let ran_ref = &ran;
        let err = scheduler
            .submit(&late, || async move {
                ran_ref.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::SchedulerTimeout { .. }), "{err:?}");
        assert_eq!(err.attempts(), 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        let stats = scheduler.stats();
        assert_eq!(stats.done, 2);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn configured_queue_timeout_applies_without_explicit_deadline() {
        let config = SchedulerConfig {
            requests_per_window: Some(1),
            window: Duration::from_secs(10),
            queue_timeout: Some(Duration::from_millis(50)),
            ..SchedulerConfig::unthrottled(5)
        };
        let scheduler = RequestScheduler::new(&config);

        scheduler.submit(&request("/a"), || async { Ok(()) }).await.unwrap();
        let err = scheduler
            .submit(&request("/b"), || async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::SchedulerTimeout { endpoint, .. } if endpoint == "GET /b"));
    }

    #[tokio::test(start_paused = true)]
    async fn aborted_request_releases_its_slot() {
        let scheduler = Arc::new(RequestScheduler::new(&SchedulerConfig::unthrottled(1)));

        let holder = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                scheduler
                    .submit(&request("/v1/files"), || std::future::pending::<ApiResult<()>>())
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(scheduler.stats().executing, 1);

        holder.abort();
        let _ = holder.await;
        assert_eq!(scheduler.stats().executing, 0);

        let value = scheduler
            .submit(&request("/v1/files"), || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(scheduler.stats().done, 2);
    }

    #[tokio::test]
    async fn failed_work_still_settles() {
        let scheduler = RequestScheduler::new(&SchedulerConfig::unthrottled(2));
        let err = scheduler
            .submit(&request("/v1/deals"), || async {
                Err::<(), _>(ApiError::Decode {
                    endpoint: "GET /v1/deals".into(),
                    message: "not json".into(),
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Decode { .. }));
        assert_eq!(scheduler.stats(), SchedulerStats { done: 1, ..Default::default() });
    }
}

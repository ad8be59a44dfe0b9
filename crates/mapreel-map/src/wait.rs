//! Waiting on the map renderer: a predicate raced against an event stream,
//! an optional polling backoff and a hard timeout.

use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::host::{MapEvent, MapEventKind};

/// Doubling poll interval with an upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    fn next(&self, current: Duration) -> Duration {
        (current * 2).min(self.max)
    }
}

/// What to wait for and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSpec {
    /// Event that completes the wait.
    pub event: MapEventKind,
    pub timeout: Duration,
    /// Treat a renderer error event as failure of the wait.
    pub fail_on_error: bool,
    /// Re-check the predicate on this schedule as well as on every event.
    pub poll: Option<Backoff>,
}

impl WaitSpec {
    pub fn new(event: MapEventKind, timeout: Duration) -> Self {
        Self {
            event,
            timeout,
            fail_on_error: false,
            poll: None,
        }
    }

    pub fn fail_on_error(mut self) -> Self {
        self.fail_on_error = true;
        self
    }

    pub fn with_poll(mut self, backoff: Backoff) -> Self {
        self.poll = Some(backoff);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The predicate already held; nothing was awaited.
    AlreadySatisfied,
    /// The awaited event arrived or the predicate became true.
    Observed,
    /// The timeout elapsed first.
    TimedOut,
    /// The renderer reported an error.
    Failed(String),
    /// The event stream closed (map disposed).
    Closed,
}

impl WaitOutcome {
    /// Whether the caller may proceed as if the condition held.
    pub fn is_ready(&self) -> bool {
        matches!(self, WaitOutcome::AlreadySatisfied | WaitOutcome::Observed)
    }
}

async fn sleep_or_pending(interval: Option<Duration>) {
    match interval {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}

/// Wait until `predicate` holds or `spec.event` is observed, bounded by
/// `spec.timeout`.
///
/// `events` must have been subscribed before the caller last changed the
/// renderer state, otherwise the completing event may already be gone.
pub async fn await_condition<P>(
    predicate: P,
    events: &mut broadcast::Receiver<MapEvent>,
    spec: WaitSpec,
) -> WaitOutcome
where
    P: Fn() -> bool,
{
    if predicate() {
        return WaitOutcome::AlreadySatisfied;
    }

    let wait = async {
        let mut interval = spec.poll.map(|b| b.initial);
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) if event.kind() == spec.event => return WaitOutcome::Observed,
                    Ok(MapEvent::Error(message)) if spec.fail_on_error => {
                        return WaitOutcome::Failed(message)
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        if predicate() {
                            return WaitOutcome::Observed;
                        }
                    }
                    Err(RecvError::Closed) => return WaitOutcome::Closed,
                },
                _ = sleep_or_pending(interval) => {
                    if predicate() {
                        return WaitOutcome::Observed;
                    }
                    if let (Some(backoff), Some(current)) = (spec.poll, interval) {
                        interval = Some(backoff.next(current));
                    }
                }
            }
        }
    };

    match tokio::time::timeout(spec.timeout, wait).await {
        Ok(outcome) => outcome,
        Err(_) => {
            if predicate() {
                WaitOutcome::Observed
            } else {
                WaitOutcome::TimedOut
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_already_satisfied() {
        let (_tx, mut rx) = broadcast::channel(8);
        let outcome = await_condition(
            || true,
            &mut rx,
            WaitSpec::new(MapEventKind::Idle, Duration::from_secs(1)),
        )
        .await;
        assert_eq!(outcome, WaitOutcome::AlreadySatisfied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observes_event() {
        let (tx, mut rx) = broadcast::channel(8);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send(MapEvent::StyleData).ok();
            tx.send(MapEvent::Idle).ok();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let outcome = await_condition(
            || false,
            &mut rx,
            WaitSpec::new(MapEventKind::Idle, Duration::from_secs(5)),
        )
        .await;
        assert_eq!(outcome, WaitOutcome::Observed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let (_tx, mut rx) = broadcast::channel::<MapEvent>(8);
        let start = tokio::time::Instant::now();
        let outcome = await_condition(
            || false,
            &mut rx,
            WaitSpec::new(MapEventKind::Idle, Duration::from_secs(8)),
        )
        .await;
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_event_fails_when_requested() {
        let (tx, mut rx) = broadcast::channel(8);
        tx.send(MapEvent::Error("style 404".into())).unwrap();
        let outcome = await_condition(
            || false,
            &mut rx,
            WaitSpec::new(MapEventKind::StyleLoaded, Duration::from_secs(5)).fail_on_error(),
        )
        .await;
        assert_eq!(outcome, WaitOutcome::Failed("style 404".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_sees_silent_state_change() {
        let (_tx, mut rx) = broadcast::channel::<MapEvent>(8);
        let flag = Arc::new(AtomicBool::new(false));
        let setter = flag.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            setter.store(true, Ordering::SeqCst);
        });
        let outcome = await_condition(
            || flag.load(Ordering::SeqCst),
            &mut rx,
            WaitSpec::new(MapEventKind::StyleLoaded, Duration::from_secs(5)).with_poll(
                Backoff::new(Duration::from_millis(50), Duration::from_millis(800)),
            ),
        )
        .await;
        assert_eq!(outcome, WaitOutcome::Observed);
    }

    #[tokio::test]
    async fn test_closed_stream() {
        let (tx, mut rx) = broadcast::channel::<MapEvent>(8);
        drop(tx);
        let outcome = await_condition(
            || false,
            &mut rx,
            WaitSpec::new(MapEventKind::Idle, Duration::from_secs(5)),
        )
        .await;
        assert_eq!(outcome, WaitOutcome::Closed);
    }

    #[test]
    fn test_backoff_caps() {
        let b = Backoff::new(Duration::from_millis(50), Duration::from_millis(800));
        assert_eq!(b.next(Duration::from_millis(50)), Duration::from_millis(100));
        assert_eq!(b.next(Duration::from_millis(600)), Duration::from_millis(800));
    }
}

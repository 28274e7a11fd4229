//! Concurrent fan-out with per-item results.
//!
//! One failing item never cancels or fails its siblings; every item gets its
//! own outcome in the returned report.

use std::future::Future;

use futures::stream::{self, StreamExt};

use crate::error::{ActionError, ActionResult};

/// Default number of platform calls in flight per fan-out.
pub const DEFAULT_CONCURRENCY: usize = 16;

/// Outcome of one fanned-out item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome<K> {
    pub key: K,
    pub result: ActionResult<()>,
}

/// Per-item outcomes of a fan-out, in completion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport<K> {
    pub outcomes: Vec<Outcome<K>>,
}

impl<K> BatchReport<K> {
    pub fn empty() -> Self {
        Self {
            outcomes: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&K, &ActionError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.key, e)))
    }
}

/// Run `action` for every key with at most `concurrency` calls in flight.
pub async fn fan_out<K, F, Fut>(
    keys: impl IntoIterator<Item = K>,
    concurrency: usize,
    action: F,
) -> BatchReport<K>
where
    K: Clone,
    F: Fn(K) -> Fut,
    Fut: Future<Output = ActionResult<()>>,
{
    let outcomes: Vec<Outcome<K>> = stream::iter(keys)
        .map(|key| {
            let fut = action(key.clone());
            async move {
                Outcome {
                    key,
                    result: fut.await,
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    BatchReport { outcomes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn failures_are_isolated() {
        let report = fan_out(1..=5u64, 4, |k| async move {
            if k == 3 {
                Err(ActionError::Forbidden)
            } else {
                Ok(())
            }
        })
        .await;

        assert_eq!(report.len(), 5);
        assert_eq!(report.succeeded(), 4);
        assert_eq!(report.failed(), 1);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures, vec![(&3, &ActionError::Forbidden)]);
    }

    #[tokio::test]
    async fn empty_input_yields_empty_report() {
        let report = fan_out(Vec::<u64>::new(), 4, |_| async { Ok(()) }).await;
        assert!(report.is_empty());
        assert_eq!(report.succeeded(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let report = fan_out(0..20u64, 3, |_| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert_eq!(report.succeeded(), 20);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_concurrency_still_runs() {
        let report = fan_out(0..3u64, 0, |_| async { Ok(()) }).await;
        assert_eq!(report.succeeded(), 3);
    }
}

//! Debounced batching: events are held until the source has been quiet for
//! a full interval, then released together as one batch.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_QUIET_INTERVAL: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy)]
pub struct EventBatcher {
    quiet: Duration,
    max_events: Option<usize>,
}

impl Default for EventBatcher {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_INTERVAL, None)
    }
}

impl EventBatcher {
    /// `max_events` force-closes a batch once it holds that many events.
    /// Without it, traffic that never pauses for `quiet` never closes a batch.
    pub fn new(quiet: Duration, max_events: Option<usize>) -> Self {
        Self {
            quiet,
            max_events: max_events.filter(|max| *max > 0),
        }
    }

    pub fn quiet(&self) -> Duration {
        self.quiet
    }

    /// Runs until `input` closes (pending events are flushed first) or
    /// `cancel` fires (pending events are discarded).
    pub async fn run<T>(
        self,
        mut input: mpsc::Receiver<T>,
        output: mpsc::UnboundedSender<Vec<T>>,
        cancel: CancellationToken,
    ) {
        let mut pending: Vec<T> = Vec::new();
        let timer = sleep(self.quiet);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    if !pending.is_empty() {
                        tracing::debug!(dropped = pending.len(), "batcher cancelled");
                    }
                    return;
                }
                received = input.recv() => match received {
                    Some(event) => {
                        pending.push(event);
                        timer.as_mut().reset(Instant::now() + self.quiet);

                        if self.max_events.is_some_and(|max| pending.len() >= max) {
                            tracing::debug!(events = pending.len(), "batch size limit reached");
                            if !emit(&output, &mut pending) {
                                return;
                            }
                        }
                    }
                    None => {
                        if !pending.is_empty() {
                            emit(&output, &mut pending);
                        }
                        return;
                    }
                },
                _ = timer.as_mut(), if !pending.is_empty() => {
                    if !emit(&output, &mut pending) {
                        return;
                    }
                }
            }
        }
    }
}

fn emit<T>(output: &mpsc::UnboundedSender<Vec<T>>, pending: &mut Vec<T>) -> bool {
    let batch = std::mem::take(pending);
    tracing::debug!(events = batch.len(), "batch closed");
    if output.send(batch).is_err() {
        tracing::debug!("batch receiver dropped");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        input: mpsc::Sender<u32>,
        output: mpsc::UnboundedReceiver<Vec<u32>>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn(batcher: EventBatcher) -> Harness {
        let (input, rx) = mpsc::channel(16);
        let (tx, output) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(batcher.run(rx, tx, cancel.clone()));
        Harness {
            input,
            output,
            cancel,
            task,
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn short_gaps_join_one_batch() {
        let mut h = spawn(EventBatcher::default());

        h.input.send(1).await.expect("send");
        tokio::time::sleep(Duration::from_millis(500)).await;
        h.input.send(2).await.expect("send");
        tokio::time::sleep(Duration::from_millis(2000)).await;

        assert_eq!(h.output.recv().await, Some(vec![1, 2]));
        assert!(h.output.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn long_gap_splits_batches() {
        let mut h = spawn(EventBatcher::default());

        h.input.send(1).await.expect("send");
        tokio::time::sleep(Duration::from_millis(1600)).await;
        h.input.send(2).await.expect("send");
        tokio::time::sleep(Duration::from_millis(1600)).await;

        assert_eq!(h.output.recv().await, Some(vec![1]));
        assert_eq!(h.output.recv().await, Some(vec![2]));
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_emitted_before_quiet_interval() {
        let mut h = spawn(EventBatcher::default());

        h.input.send(1).await.expect("send");
        tokio::time::sleep(Duration::from_millis(1400)).await;
        settle().await;

        assert!(h.output.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn steady_traffic_is_held_without_a_limit() {
        let mut h = spawn(EventBatcher::default());

        for i in 0..10 {
            h.input.send(i).await.expect("send");
            tokio::time::sleep(Duration::from_millis(1000)).await;
        }
        settle().await;
        assert!(h.output.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(h.output.recv().await.map(|b| b.len()), Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn size_limit_closes_batch_early() {
        let mut h = spawn(EventBatcher::new(DEFAULT_QUIET_INTERVAL, Some(3)));

        for i in 0..4 {
            h.input.send(i).await.expect("send");
        }
        settle().await;
        assert_eq!(h.output.try_recv().ok(), Some(vec![0, 1, 2]));

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(h.output.recv().await, Some(vec![3]));
    }

    #[tokio::test(start_paused = true)]
    async fn closing_input_flushes_pending() {
        let mut h = spawn(EventBatcher::default());

        h.input.send(7).await.expect("send");
        drop(h.input);

        assert_eq!(h.output.recv().await, Some(vec![7]));
        assert_eq!(h.output.recv().await, None);
        h.task.await.expect("join");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_discards_pending() {
        let mut h = spawn(EventBatcher::default());

        h.input.send(7).await.expect("send");
        settle().await;
        h.cancel.cancel();
        h.task.await.expect("join");

        assert_eq!(h.output.recv().await, None);
    }
}

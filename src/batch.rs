use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

use crate::isg::client::CommandSink;
use crate::model::PendingCommand;

/// Accumulates user setpoint writes and flushes them as one debounced
/// save-post.
///
/// Each enqueue replaces (never accumulates) the single pending flush
/// timer, so a burst of writes produces exactly one batch. The batch is
/// taken atomically on flush; a failed flush is logged and the pending
/// writes are dropped rather than retried — the device re-serves the
/// authoritative state on the read-back pass that follows a successful
/// flush.
pub struct CommandBatcher<S: CommandSink + 'static> {
    sink: Arc<S>,
    debounce: Duration,
    pending: Arc<Mutex<Vec<PendingCommand>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    /// Read-back notifications on successful flush.
    readback: Sender<()>,
}

impl<S: CommandSink> CommandBatcher<S> {
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);

    pub fn new(sink: Arc<S>, debounce: Duration, readback: Sender<()>) -> Self {
        Self {
            sink,
            debounce,
            pending: Arc::new(Mutex::new(Vec::new())),
            timer: Mutex::new(None),
            readback,
        }
    }

    /// Append one write and (re)start the debounce timer.
    pub async fn enqueue(&self, name: String, value: String) {
        self.pending
            .lock()
            .await
            .push(PendingCommand { name, value });

        let mut timer = self.timer.lock().await;
        if let Some(old) = timer.take() {
            old.abort();
        }

        let sink = self.sink.clone();
        let pending = self.pending.clone();
        let readback = self.readback.clone();
        let debounce = self.debounce;
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            flush(&*sink, &pending, &readback).await;
        }));
    }

    /// Flush immediately, bypassing the debounce (shutdown path).
    pub async fn flush_now(&self) {
        if let Some(old) = self.timer.lock().await.take() {
            old.abort();
        }
        flush(&*self.sink, &self.pending, &self.readback).await;
    }
}

async fn flush<S: CommandSink>(
    sink: &S,
    pending: &Mutex<Vec<PendingCommand>>,
    readback: &Sender<()>,
) {
    // Taken atomically: the batch is cleared whether or not the post
    // succeeds, so a failed flush drops the writes instead of retrying.
    let batch = std::mem::take(&mut *pending.lock().await);
    if batch.is_empty() {
        return;
    }

    log::info!("Submitting {} batched command(s)", batch.len());
    match sink.submit(&batch).await {
        Ok(()) => {
            // Re-read the command pages so confirmed device state
            // replaces the optimistic user writes.
            let _ = readback.send(()).await;
        }
        Err(err) => {
            log::error!("Command batch submission failed, dropping batch: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use crate::error::{BridgeError, BridgeResult};

    use super::*;

    struct RecordingSink {
        batches: Mutex<Vec<Vec<PendingCommand>>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl CommandSink for RecordingSink {
        async fn submit(&self, batch: &[PendingCommand]) -> BridgeResult<()> {
            self.batches.lock().await.push(batch.to_vec());
            if self.fail {
                Err(BridgeError::Timeout)
            } else {
                Ok(())
            }
        }
    }

    fn sink(fail: bool) -> Arc<RecordingSink> {
        Arc::new(RecordingSink {
            batches: Mutex::new(Vec::new()),
            fail,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn burst_flushes_as_one_ordered_batch() {
        let sink = sink(false);
        let (tx, mut rx) = mpsc::channel(4);
        let batcher = CommandBatcher::new(sink.clone(), Duration::from_secs(5), tx);

        batcher.enqueue("A".to_string(), "1".to_string()).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        batcher.enqueue("A".to_string(), "2".to_string()).await;

        tokio::time::sleep(Duration::from_secs(6)).await;

        let batches = sink.batches.lock().await;
        assert_eq!(batches.len(), 1, "one debounced flush, not two");
        assert_eq!(
            batches[0],
            vec![
                PendingCommand {
                    name: "A".to_string(),
                    value: "1".to_string()
                },
                PendingCommand {
                    name: "A".to_string(),
                    value: "2".to_string()
                },
            ]
        );
        assert!(rx.try_recv().is_ok(), "successful flush signals read-back");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_flush_drops_batch_without_readback() {
        let sink = sink(true);
        let (tx, mut rx) = mpsc::channel(4);
        let batcher = CommandBatcher::new(sink.clone(), Duration::from_secs(5), tx);

        batcher.enqueue("A".to_string(), "1".to_string()).await;
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(sink.batches.lock().await.len(), 1);
        assert!(batcher.pending.lock().await.is_empty(), "batch cleared on failure");
        assert!(rx.try_recv().is_err(), "no read-back after failure");

        // The batcher stays usable for the next write.
        batcher.enqueue("B".to_string(), "3".to_string()).await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(sink.batches.lock().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_now_bypasses_debounce() {
        let sink = sink(false);
        let (tx, _rx) = mpsc::channel(4);
        let batcher = CommandBatcher::new(sink.clone(), Duration::from_secs(5), tx);

        batcher.enqueue("A".to_string(), "1".to_string()).await;
        batcher.flush_now().await;

        assert_eq!(sink.batches.lock().await.len(), 1);
    }
}

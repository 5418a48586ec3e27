//! Streaming of contiguous block ranges
//!
//! [`CacheDb::stream_block_range`] spawns a producer task that reads one height at a
//! time on the blocking pool and feeds a bounded channel. The consumer side,
//! [`BlockRangeStream`], yields payloads in ascending height order and always ends
//! in an explicit way:
//!
//! - `None` after the last block: the range was read completely.
//! - `Some(Err(_))` followed by `None`: the read failed, was cancelled, or the
//!   producer died before finishing.
//!
//! Heights with no stored block are skipped, so a stream may yield fewer items than
//! the span it was asked for.

use crate::error::{Result, StoreError};
use crate::store::CacheDb;
use crate::types::{Height, StreamedBlock};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Messages on the producer → consumer channel.
#[derive(Debug)]
enum RangeEvent {
    Block(StreamedBlock),
    End,
    Failed(StoreError),
}

/// Rejects empty-or-inverted ranges and ranges wider than `max` heights.
pub fn check_range(start: Height, end: Height, max: u32) -> Result<()> {
    if end < start {
        return Err(StoreError::InvalidRange { start, end });
    }
    let span = u64::from(end - start) + 1;
    if span > u64::from(max) {
        return Err(StoreError::RangeTooLarge { start, end, max });
    }
    Ok(())
}

impl CacheDb {
    /// Streams the payloads of blocks in `start..=end`.
    ///
    /// The span is checked against `limits.max_range_span` before anything is read.
    /// Must be called from within a Tokio runtime.
    pub fn stream_block_range(
        &self,
        start: Height,
        end: Height,
        cancel: &CancellationToken,
    ) -> Result<BlockRangeStream> {
        check_range(start, end, self.limits().max_range_span)?;

        let (tx, rx) = mpsc::channel(self.limits().stream_buffer);
        let producer = RangeProducer {
            db: self.clone(),
            start,
            end,
            cancel: cancel.clone(),
            tx,
        };
        tokio::spawn(producer.run());

        Ok(BlockRangeStream {
            rx,
            cancel: cancel.clone(),
            done: false,
        })
    }
}

struct RangeProducer {
    db: CacheDb,
    start: Height,
    end: Height,
    cancel: CancellationToken,
    tx: mpsc::Sender<RangeEvent>,
}

impl RangeProducer {
    async fn run(self) {
        debug!(target: "range_stream", start = self.start, end = self.end, "Range stream started");

        let mut sent = 0usize;
        for height in self.start..=self.end {
            let db = self.db.clone();
            let cancel = self.cancel.clone();
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(target: "range_stream", height, sent, "Range stream cancelled");
                    return;
                }
                read = tokio::task::spawn_blocking(move || db.read_streamed_block(&cancel, height)) => read,
            };

            let event = match read {
                Ok(Ok(Some(block))) => RangeEvent::Block(block),
                Ok(Ok(None)) => continue,
                Ok(Err(StoreError::Cancelled)) => {
                    warn!(target: "range_stream", height, sent, "Range stream cancelled");
                    return;
                }
                Ok(Err(err)) => {
                    warn!(target: "range_stream", height, %err, "Range read failed");
                    self.send(RangeEvent::Failed(err)).await;
                    return;
                }
                Err(join_err) => {
                    // Dropping the sender without a terminal event surfaces as StreamAborted.
                    warn!(target: "range_stream", height, %join_err, "Range read task died");
                    return;
                }
            };

            if !self.send(event).await {
                return;
            }
            sent += 1;
        }

        if self.send(RangeEvent::End).await {
            debug!(target: "range_stream", start = self.start, end = self.end, sent, "Range stream finished");
        }
    }

    /// Delivers one event, racing the consumer's readiness against cancellation.
    /// Returns false when the stream should stop.
    async fn send(&self, event: RangeEvent) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            res = self.tx.send(event) => {
                if res.is_err() {
                    debug!(target: "range_stream", "Range consumer went away");
                }
                res.is_ok()
            }
        }
    }
}

/// Consumer half of a block range. See the module docs for the termination protocol.
#[derive(Debug)]
pub struct BlockRangeStream {
    rx: mpsc::Receiver<RangeEvent>,
    cancel: CancellationToken,
    done: bool,
}

impl BlockRangeStream {
    /// Waits for the next block, or `None` once the range finished cleanly.
    pub async fn next(&mut self) -> Option<Result<StreamedBlock>> {
        StreamExt::next(self).await
    }

    /// Drains the stream into a vector, stopping at the first error.
    pub async fn collect_blocks(mut self) -> Result<Vec<StreamedBlock>> {
        let mut blocks = Vec::new();
        while let Some(item) = self.next().await {
            blocks.push(item?);
        }
        Ok(blocks)
    }

    fn finish(&mut self, err: StoreError) -> Poll<Option<Result<StreamedBlock>>> {
        self.done = true;
        self.rx.close();
        Poll::Ready(Some(Err(err)))
    }
}

impl Stream for BlockRangeStream {
    type Item = Result<StreamedBlock>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if this.cancel.is_cancelled() {
            return this.finish(StoreError::Cancelled);
        }

        match this.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(RangeEvent::Block(block))) => Poll::Ready(Some(Ok(block))),
            Poll::Ready(Some(RangeEvent::End)) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(RangeEvent::Failed(err))) => this.finish(err),
            Poll::Ready(None) if this.cancel.is_cancelled() => this.finish(StoreError::Cancelled),
            Poll::Ready(None) => this.finish(StoreError::StreamAborted),
        }
    }
}

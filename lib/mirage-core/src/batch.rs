//! Batched delivery of log records.

use std::{sync::Arc, time::Duration};

use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::{encoder::EncodedRecord, error::TransportError, transport::Transport};

/// Delivery counters for a single [`BatchDeliverer`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Records handed to the transport.
    pub attempted: u64,

    /// Records the transport confirmed as delivered.
    pub sent: u64,

    /// Batches delivered.
    pub batches_sent: u64,

    /// Batches dropped after a failed send.
    pub batches_failed: u64,
}

impl DeliveryStats {
    /// Returns the number of records dropped after a failed send.
    pub fn dropped(&self) -> u64 {
        self.attempted - self.sent
    }

    /// Merges `other` into these counters.
    pub fn merge(&mut self, other: &DeliveryStats) {
        self.attempted += other.attempted;
        self.sent += other.sent;
        self.batches_sent += other.batches_sent;
        self.batches_failed += other.batches_failed;
    }
}

/// Accumulates records and hands them to a [`Transport`] in batches.
///
/// A batch is flushed as soon as it holds `batch_size` records, or when a record is added to a batch that is older
/// than `flush_interval`. Each send is bounded by `send_timeout`. A batch whose send fails or times out is dropped:
/// it is never retried or requeued.
pub struct BatchDeliverer {
    transport: Arc<dyn Transport>,
    batch_size: usize,
    flush_interval: Duration,
    send_timeout: Duration,
    batch: Vec<EncodedRecord>,
    batch_started: Option<Instant>,
    stats: DeliveryStats,
}

impl BatchDeliverer {
    /// Creates a new `BatchDeliverer`.
    ///
    /// A `batch_size` of zero is treated as one.
    pub fn new(
        transport: Arc<dyn Transport>, batch_size: usize, flush_interval: Duration, send_timeout: Duration,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            transport,
            batch_size,
            flush_interval,
            send_timeout,
            batch: Vec::with_capacity(batch_size),
            batch_started: None,
            stats: DeliveryStats::default(),
        }
    }

    /// Adds a record to the current batch, flushing it if it is full or has been open for longer than the flush
    /// interval.
    pub async fn add(&mut self, record: EncodedRecord) {
        let started = *self.batch_started.get_or_insert_with(Instant::now);
        self.batch.push(record);

        if self.batch.len() >= self.batch_size || started.elapsed() >= self.flush_interval {
            self.flush().await;
        }
    }

    /// Sends the current batch, if any.
    ///
    /// Returns `true` if there was nothing to send or the batch was delivered.
    pub async fn flush(&mut self) -> bool {
        if self.batch.is_empty() {
            return true;
        }

        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        self.batch_started = None;

        let records = batch.len() as u64;
        self.stats.attempted += records;

        let result = match timeout(self.send_timeout, self.transport.send(&batch)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::TimedOut {
                timeout: self.send_timeout,
            }),
        };

        match result {
            Ok(()) => {
                self.stats.sent += records;
                self.stats.batches_sent += 1;
                debug!(records, "Flushed batch.");
                true
            }
            Err(e) => {
                self.stats.batches_failed += 1;
                warn!(records, error = %e, "Failed to deliver batch. Dropping it.");
                false
            }
        }
    }

    /// Returns the number of records waiting in the current batch.
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Returns the delivery counters.
    pub fn stats(&self) -> DeliveryStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::attributes::AnyValue;

    #[derive(Default)]
    struct RecordingTransport {
        batches: Mutex<Vec<usize>>,
        fail: AtomicBool,
        hang: AtomicBool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, records: &[EncodedRecord]) -> Result<(), TransportError> {
            if self.hang.load(Ordering::Relaxed) {
                std::future::pending::<()>().await;
            }

            self.batches.lock().unwrap().push(records.len());
            if self.fail.load(Ordering::Relaxed) {
                Err(TransportError::UnexpectedStatus {
                    endpoint: "test".to_string(),
                    status: 503,
                    body: String::new(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn record(n: u64) -> EncodedRecord {
        EncodedRecord {
            time_unix_nano: n,
            severity_number: 9,
            severity_text: "INFO",
            body: AnyValue::string("ok"),
            attributes: Vec::new(),
            dropped_attributes_count: 0,
            trace_id: format!("{:032x}", n),
            span_id: format!("{:016x}", n),
            parent_span_id: None,
        }
    }

    fn deliverer(transport: &Arc<RecordingTransport>, batch_size: usize) -> BatchDeliverer {
        BatchDeliverer::new(
            transport.clone(),
            batch_size,
            Duration::from_secs(3600),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn full_batch_triggers_exactly_one_send() {
        let transport = Arc::new(RecordingTransport::default());
        let mut deliverer = deliverer(&transport, 4);

        for i in 0..4 {
            deliverer.add(record(i)).await;
        }

        assert_eq!(*transport.batches.lock().unwrap(), vec![4]);
        assert_eq!(deliverer.pending(), 0);
        assert_eq!(deliverer.stats().sent, 4);
    }

    #[tokio::test]
    async fn partial_batch_waits_for_explicit_flush() {
        let transport = Arc::new(RecordingTransport::default());
        let mut deliverer = deliverer(&transport, 4);

        for i in 0..3 {
            deliverer.add(record(i)).await;
        }
        assert!(transport.batches.lock().unwrap().is_empty());
        assert_eq!(deliverer.pending(), 3);

        assert!(deliverer.flush().await);
        assert_eq!(*transport.batches.lock().unwrap(), vec![3]);

        // Nothing left to send.
        assert!(deliverer.flush().await);
        assert_eq!(transport.batches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_batch_is_dropped_not_retried() {
        let transport = Arc::new(RecordingTransport::default());
        transport.fail.store(true, Ordering::Relaxed);
        let mut deliverer = deliverer(&transport, 2);

        deliverer.add(record(1)).await;
        deliverer.add(record(2)).await;
        assert_eq!(deliverer.pending(), 0);

        transport.fail.store(false, Ordering::Relaxed);
        deliverer.add(record(3)).await;
        deliverer.add(record(4)).await;

        assert_eq!(*transport.batches.lock().unwrap(), vec![2, 2]);
        assert_eq!(
            deliverer.stats(),
            DeliveryStats {
                attempted: 4,
                sent: 2,
                batches_sent: 1,
                batches_failed: 1,
            }
        );
        assert_eq!(deliverer.stats().dropped(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_send_is_bounded() {
        let transport = Arc::new(RecordingTransport::default());
        transport.hang.store(true, Ordering::Relaxed);
        let mut deliverer = deliverer(&transport, 1);

        deliverer.add(record(1)).await;

        assert_eq!(deliverer.stats().batches_failed, 1);
        assert_eq!(deliverer.stats().sent, 0);
        assert_eq!(deliverer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_batch_flushes_on_next_add() {
        let transport = Arc::new(RecordingTransport::default());
        let mut deliverer = BatchDeliverer::new(
            transport.clone(),
            100,
            Duration::from_secs(5),
            Duration::from_secs(1),
        );

        deliverer.add(record(1)).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        deliverer.add(record(2)).await;

        assert_eq!(*transport.batches.lock().unwrap(), vec![2]);
    }
}

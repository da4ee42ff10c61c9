// src/matching/writer.rs - Linkage persistence through a bounded pool of writer tasks
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::models::core::Linkage;
use crate::models::stats_models::WriterStats;
use crate::utils::db_connect::PgPool;

#[async_trait]
pub trait LinkageSink: Send + Sync {
    /// Returns true when a new row was stored, false when it already existed.
    async fn insert_linkage(&self, linkage: &Linkage) -> Result<bool>;
}

/// Appends linkages to `public.kol__onekey`. Existing rows are left untouched.
#[derive(Clone)]
pub struct PgLinkageStore {
    pool: PgPool,
}

impl PgLinkageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LinkageSink for PgLinkageStore {
    async fn insert_linkage(&self, linkage: &Linkage) -> Result<bool> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for insert_linkage")?;

        const INSERT_SQL: &str = "
            INSERT INTO public.kol__onekey (onekey, kid, did)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING";

        let inserted = conn
            .execute(
                INSERT_SQL,
                &[&linkage.external_id, &linkage.internal_id, &linkage.deployment_id],
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to insert linkage {} -> {} (did:{})",
                    linkage.external_id, linkage.internal_id, linkage.deployment_id
                )
            })?;

        Ok(inserted > 0)
    }
}

#[derive(Default)]
struct WriterCounters {
    submitted: AtomicUsize,
    written: AtomicUsize,
    failed: AtomicUsize,
}

/// Fixed set of writer tasks fed by a bounded queue. `submit` waits while the
/// queue is full; `shutdown` drains it and joins every writer.
pub struct LinkageWriter {
    sender: mpsc::Sender<Linkage>,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<WriterCounters>,
}

impl LinkageWriter {
    pub fn spawn(sink: Arc<dyn LinkageSink>, writers: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Linkage>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let counters = Arc::new(WriterCounters::default());

        let workers = (0..writers.max(1))
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let counters = Arc::clone(&counters);
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    loop {
                        // The lock is held only while waiting for the next item
                        let next = receiver.lock().await.recv().await;
                        let Some(linkage) = next else { break };

                        match sink.insert_linkage(&linkage).await {
                            Ok(inserted) => {
                                counters.written.fetch_add(1, Ordering::Relaxed);
                                if !inserted {
                                    debug!(
                                        "Linkage {} -> {} (did:{}) already recorded",
                                        linkage.external_id, linkage.internal_id, linkage.deployment_id
                                    );
                                }
                            }
                            Err(e) => {
                                counters.failed.fetch_add(1, Ordering::Relaxed);
                                error!("Writer {} failed: {:?}", worker_id, e);
                            }
                        }
                    }
                    debug!("Linkage writer {} finished", worker_id);
                })
            })
            .collect();

        info!(
            "Started {} linkage writer(s), queue capacity {}",
            writers.max(1),
            queue_capacity.max(1)
        );

        Self {
            sender,
            workers,
            counters,
        }
    }

    pub async fn submit(&self, linkage: Linkage) -> Result<()> {
        self.sender
            .send(linkage)
            .await
            .context("Linkage writers have stopped")?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Closes the queue and waits until every queued linkage has been attempted.
    pub async fn shutdown(self) -> WriterStats {
        let Self {
            sender,
            workers,
            counters,
        } = self;
        drop(sender);

        for result in join_all(workers).await {
            if let Err(e) = result {
                warn!("Linkage writer task ended abnormally: {}", e);
            }
        }

        WriterStats {
            submitted: counters.submitted.load(Ordering::Relaxed),
            written: counters.written.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::collections::HashSet;

    #[derive(Default)]
    struct RecordingSink {
        rows: Mutex<HashSet<Linkage>>,
    }

    #[async_trait]
    impl LinkageSink for RecordingSink {
        async fn insert_linkage(&self, linkage: &Linkage) -> Result<bool> {
            tokio::task::yield_now().await;
            Ok(self.rows.lock().await.insert(linkage.clone()))
        }
    }

    /// Rejects every linkage for one deployment.
    struct FailingSink {
        broken_deployment: i32,
        inner: RecordingSink,
    }

    #[async_trait]
    impl LinkageSink for FailingSink {
        async fn insert_linkage(&self, linkage: &Linkage) -> Result<bool> {
            if linkage.deployment_id == self.broken_deployment {
                return Err(anyhow!("connection reset"));
            }
            self.inner.insert_linkage(linkage).await
        }
    }

    fn linkage(n: i64, did: i32) -> Linkage {
        Linkage {
            external_id: format!("WDEM{:05}", n),
            internal_id: n,
            deployment_id: did,
        }
    }

    #[tokio::test]
    async fn test_every_submitted_linkage_is_written_before_shutdown_returns() {
        let sink = Arc::new(RecordingSink::default());
        let writer = LinkageWriter::spawn(sink.clone(), 4, 2);

        for n in 0..50 {
            writer.submit(linkage(n, 1)).await.unwrap();
        }
        let stats = writer.shutdown().await;

        assert_eq!(
            stats,
            WriterStats {
                submitted: 50,
                written: 50,
                failed: 0
            }
        );
        assert_eq!(sink.rows.lock().await.len(), 50);
    }

    #[tokio::test]
    async fn test_duplicates_count_as_written() {
        let sink = Arc::new(RecordingSink::default());
        let writer = LinkageWriter::spawn(sink.clone(), 1, 8);

        writer.submit(linkage(1, 1)).await.unwrap();
        writer.submit(linkage(1, 1)).await.unwrap();
        let stats = writer.shutdown().await;

        assert_eq!(stats.written, 2);
        assert_eq!(sink.rows.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_retried() {
        let sink = Arc::new(FailingSink {
            broken_deployment: 2,
            inner: RecordingSink::default(),
        });
        let writer = LinkageWriter::spawn(sink.clone(), 2, 4);

        for n in 0..10 {
            writer.submit(linkage(n, 1 + (n % 2) as i32)).await.unwrap();
        }
        let stats = writer.shutdown().await;

        assert_eq!(stats.submitted, 10);
        assert_eq!(stats.written, 5);
        assert_eq!(stats.failed, 5);
        assert_eq!(sink.inner.rows.lock().await.len(), 5);
    }

    #[tokio::test]
    async fn test_zero_writers_still_spawns_one() {
        let sink = Arc::new(RecordingSink::default());
        let writer = LinkageWriter::spawn(sink, 0, 0);
        writer.submit(linkage(7, 3)).await.unwrap();
        assert_eq!(writer.stats().submitted, 1);
        assert_eq!(writer.shutdown().await.written, 1);
    }
}

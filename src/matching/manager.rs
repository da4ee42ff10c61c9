// src/matching/manager.rs - Stream run: every OneKey record against every configured deployment
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::matching::cascade::Resolver;
use crate::matching::db::stream_onekey_records;
use crate::matching::writer::{LinkageSink, LinkageWriter, PgLinkageStore};
use crate::models::core::{ExternalRecord, Linkage};
use crate::models::stats_models::{MatchRunStats, WriterStats};
use crate::utils::config::MatchingConfig;
use crate::utils::db_connect::{get_pool_status, PgPool};
use crate::utils::get_memory_usage;
use crate::utils::progress_bars::logging::{log_record_progress, log_run_completion};
use crate::utils::progress_bars::progress_config::ProgressConfig;

/// Per-run switches that come from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Match only this OneKey customer id.
    pub only_customer: Option<String>,
    /// Resolve and log, but write no linkages.
    pub dry_run: bool,
}

/// Streams the OneKey table through the resolver and persists every accepted
/// linkage through the bounded writer pool. Counters land in `stats`.
pub async fn run_matching_pipeline(
    pool: &PgPool,
    resolver: &Resolver,
    config: &MatchingConfig,
    options: &RunOptions,
    stats: &mut MatchRunStats,
) -> Result<WriterStats> {
    let start_time = Instant::now();
    let progress = ProgressConfig::from_env();

    let writer = if options.dry_run {
        None
    } else {
        let sink: Arc<dyn LinkageSink> = Arc::new(PgLinkageStore::new(pool.clone()));
        Some(LinkageWriter::spawn(
            sink,
            config.linkage_writers,
            config.linkage_queue_capacity,
        ))
    };

    let (sender, receiver) = mpsc::channel::<ExternalRecord>(config.record_batch_size.max(1));
    let reader_pool = pool.clone();
    let batch_size = config.record_batch_size;
    let only_customer = options.only_customer.clone();
    let reader = tokio::spawn(async move {
        stream_onekey_records(&reader_pool, batch_size, only_customer.as_deref(), sender).await
    });

    let spinner = progress.create_spinner("Matching OneKey records");
    process_records(
        receiver,
        resolver,
        &config.deployments,
        writer.as_ref(),
        stats,
        spinner.as_ref(),
        &progress,
        Some(pool),
    )
    .await;

    if let (Some(pb), Some(_)) = (&spinner, &writer) {
        pb.set_message("Waiting for linkage writers to drain");
    }
    let (writer_stats, streamed) = finish_run(writer, reader).await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    stats.linkages_written = writer_stats.written;
    stats.linkages_failed = writer_stats.failed;
    stats.matching_time = start_time.elapsed().as_secs_f64();

    let streamed = streamed?;
    debug!("Reader delivered {} records", streamed);

    log_run_completion(stats, &writer_stats, start_time.elapsed());
    Ok(writer_stats)
}

/// Joins the reader, then drains the writer pool whatever the reader returned.
/// Queued linkages are always written before a reader error is handed back.
async fn finish_run(
    writer: Option<LinkageWriter>,
    reader: JoinHandle<Result<usize>>,
) -> (WriterStats, Result<usize>) {
    let streamed = match reader.await {
        Ok(result) => result.context("Failed to stream OneKey records"),
        Err(e) => Err(anyhow::Error::new(e).context("OneKey reader task panicked")),
    };
    if let Err(e) = &streamed {
        error!("OneKey reader failed, draining queued linkages: {:?}", e);
    }

    let writer_stats = match writer {
        Some(writer) => writer.shutdown().await,
        None => WriterStats::default(),
    };
    (writer_stats, streamed)
}

/// Consumes the record channel until it closes. Each record is resolved once
/// per deployment; a failed resolution is logged, counted and skipped.
#[allow(clippy::too_many_arguments)]
pub async fn process_records(
    mut receiver: mpsc::Receiver<ExternalRecord>,
    resolver: &Resolver,
    deployments: &[i32],
    writer: Option<&LinkageWriter>,
    stats: &mut MatchRunStats,
    spinner: Option<&ProgressBar>,
    progress: &ProgressConfig,
    pool: Option<&PgPool>,
) {
    let start_time = Instant::now();

    while let Some(record) = receiver.recv().await {
        stats.records_seen += 1;
        if let Some(pb) = spinner {
            pb.inc(1);
        }

        let source_id = match record.source_id.as_deref() {
            Some(id) if !record.first_name.is_empty() && !record.last_name.is_empty() => id.to_string(),
            _ => {
                debug!("Skipping incomplete OneKey record '{}'", record.display_name());
                stats.records_skipped += 1;
                continue;
            }
        };

        for &deployment_id in deployments {
            stats.resolutions += 1;
            let candidates = match resolver.resolve(&record, deployment_id, &[]).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    stats.resolution_errors += 1;
                    warn!(
                        "Resolution failed for {} '{}' (did:{}): {}",
                        source_id,
                        record.display_name(),
                        deployment_id,
                        e
                    );
                    continue;
                }
            };

            for candidate in candidates.values() {
                stats.record_strategy(candidate.strategy);
                let linkage = Linkage {
                    external_id: source_id.clone(),
                    internal_id: candidate.internal_id(),
                    deployment_id,
                };
                match writer {
                    Some(writer) => {
                        if let Err(e) = writer.submit(linkage).await {
                            error!("Could not queue linkage for {}: {:?}", source_id, e);
                        }
                    }
                    None => info!(
                        "[DRY RUN] {} -> {} (did:{}, {})",
                        linkage.external_id, linkage.internal_id, deployment_id, candidate.strategy
                    ),
                }
            }
        }

        log_record_progress(stats.records_seen, stats.candidates_accepted, start_time.elapsed());
        if stats.records_seen % 1000 == 0 {
            if let Some(pb) = spinner {
                pb.set_message(progress_message(stats, progress, pool).await);
            }
        }
    }
}

async fn progress_message(
    stats: &MatchRunStats,
    progress: &ProgressConfig,
    pool: Option<&PgPool>,
) -> String {
    let mut message = format!("{} candidates", stats.candidates_accepted);
    if progress.should_show_memory() {
        message.push_str(&format!(", {} MB", get_memory_usage().await));
    }
    if let Some(pool) = pool.filter(|_| progress.should_show_db_connection_stats()) {
        let (total, idle, in_use) = get_pool_status(pool);
        message.push_str(&format!(", db {}/{} in use ({} idle)", in_use, total, idle));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::canonical::canonicalize;
    use crate::models::core::{CanonicalPerson, StrategyTag};
    use crate::search::InMemoryIndex;
    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        rows: Mutex<Vec<Linkage>>,
    }

    #[async_trait]
    impl LinkageSink for CollectingSink {
        async fn insert_linkage(&self, linkage: &Linkage) -> Result<bool> {
            self.rows.lock().await.push(linkage.clone());
            Ok(true)
        }
    }

    fn person(id: i64, did: i32, first: &str, middle: &str, last: &str) -> CanonicalPerson {
        CanonicalPerson::from_canonical(id, did, canonicalize(first, middle, last, &[]), "Germany", "", 0)
    }

    fn record(id: &str, first: &str, middle: &str, last: &str, country: &str) -> ExternalRecord {
        ExternalRecord::new(Some(id.to_string()), first, middle, last).with_location("", country)
    }

    fn quiet() -> ProgressConfig {
        ProgressConfig {
            enabled: false,
            ..ProgressConfig::default()
        }
    }

    #[tokio::test]
    async fn test_records_are_matched_per_deployment_and_linked() {
        let index = InMemoryIndex::with_people(vec![
            person(1, 1, "Ralf", "F", "Dittrich"),
            person(2, 2, "Ralf", "F", "Dittrich"),
            person(3, 1, "Anna", "", "Vogt"),
        ])
        .await;
        let resolver = Resolver::new(Arc::new(index));
        let sink = Arc::new(CollectingSink::default());
        let writer = LinkageWriter::spawn(sink.clone(), 2, 4);
        let mut stats = MatchRunStats::new("run", Utc::now().naive_utc(), None, &[1, 2]);

        let (sender, receiver) = mpsc::channel(8);
        sender.send(record("WDEM1", "Ralf", "Friedrich", "Dittrich", "DEU")).await.unwrap();
        sender.send(record("WDEM2", "Anna", "", "Vogt", "")).await.unwrap();
        sender.send(record("WDEM3", "Erik", "", "", "")).await.unwrap();
        sender.send(record("WDEM4", "Anna", "", "Vogt", "XXX")).await.unwrap();
        drop(sender);

        process_records(receiver, &resolver, &[1, 2], Some(&writer), &mut stats, None, &quiet(), None)
            .await;
        let writer_stats = writer.shutdown().await;

        assert_eq!(stats.records_seen, 4);
        assert_eq!(stats.records_skipped, 1);
        assert_eq!(stats.resolutions, 6);
        assert_eq!(stats.resolution_errors, 2);
        assert_eq!(stats.candidates_accepted, 3);
        assert_eq!(stats.strategy_counts.get(&StrategyTag::Simple), Some(&3));
        assert_eq!(writer_stats.written, 3);

        let mut rows = sink.rows.lock().await.clone();
        rows.sort_by_key(|l| (l.external_id.clone(), l.deployment_id));
        let keys: Vec<(&str, i64, i32)> = rows
            .iter()
            .map(|l| (l.external_id.as_str(), l.internal_id, l.deployment_id))
            .collect();
        assert_eq!(keys, vec![("WDEM1", 1, 1), ("WDEM1", 2, 2), ("WDEM2", 3, 1)]);
    }

    struct SlowSink {
        inner: CollectingSink,
    }

    #[async_trait]
    impl LinkageSink for SlowSink {
        async fn insert_linkage(&self, linkage: &Linkage) -> Result<bool> {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.inner.insert_linkage(linkage).await
        }
    }

    #[tokio::test]
    async fn test_reader_failure_still_drains_queued_linkages() {
        let sink = Arc::new(SlowSink {
            inner: CollectingSink::default(),
        });
        let writer = LinkageWriter::spawn(sink.clone(), 1, 8);
        for id in 0..6 {
            writer
                .submit(Linkage {
                    external_id: format!("WDEM{}", id),
                    internal_id: id,
                    deployment_id: 1,
                })
                .await
                .unwrap();
        }
        let reader = tokio::spawn(async { Err::<usize, _>(anyhow::anyhow!("connection reset")) });

        let (writer_stats, streamed) = finish_run(Some(writer), reader).await;
        assert_eq!(writer_stats.written, 6);
        assert_eq!(sink.inner.rows.lock().await.len(), 6);

        let err = streamed.unwrap_err();
        assert!(format!("{:#}", err).contains("connection reset"));
    }

    #[tokio::test]
    async fn test_reader_success_reports_streamed_count() {
        let reader = tokio::spawn(async { Ok::<usize, anyhow::Error>(42) });
        let (writer_stats, streamed) = finish_run(None, reader).await;
        assert_eq!(writer_stats, WriterStats::default());
        assert_eq!(streamed.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let index = InMemoryIndex::with_people(vec![person(1, 1, "Anna", "", "Vogt")]).await;
        let resolver = Resolver::new(Arc::new(index));
        let mut stats = MatchRunStats::new("dry", Utc::now().naive_utc(), None, &[1]);

        let (sender, receiver) = mpsc::channel(2);
        sender.send(record("WDEM2", "Anna", "", "Vogt", "")).await.unwrap();
        drop(sender);

        process_records(receiver, &resolver, &[1], None, &mut stats, None, &quiet(), None).await;
        assert_eq!(stats.candidates_accepted, 1);
        assert_eq!(stats.linkages_written, 0);
    }

    #[tokio::test]
    async fn test_records_without_source_id_are_skipped() {
        let index = InMemoryIndex::with_people(vec![person(1, 1, "Anna", "", "Vogt")]).await;
        let resolver = Resolver::new(Arc::new(index));
        let mut stats = MatchRunStats::new("anon", Utc::now().naive_utc(), None, &[1]);

        let (sender, receiver) = mpsc::channel(2);
        sender.send(ExternalRecord::new(None, "Anna", "", "Vogt")).await.unwrap();
        drop(sender);

        process_records(receiver, &resolver, &[1], None, &mut stats, None, &quiet(), None).await;
        assert_eq!(stats.records_skipped, 1);
        assert_eq!(stats.resolutions, 0);
    }
}

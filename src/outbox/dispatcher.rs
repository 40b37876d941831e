//! OutboxProcessor
//!
//! The background dispatcher: claims due entries, hands them to the
//! publisher, and advances their status. Scheduling follows
//! `jobs::JobScheduler`'s `tokio::select!` shape - separate ticking
//! intervals for the pending sweep, the retry sweep, and cleanup, rather
//! than one loop doing everything every tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, sleep, MissedTickBehavior};

use super::entry::{OutboxEntry, OutboxStatistics};
use super::error::OutboxError;
use super::publisher::OutboxPublisher;
use super::repository::OutboxRepository;

#[derive(Debug, Clone)]
pub struct OutboxProcessorConfig {
    pub batch_size: i64,
    pub pending_poll_interval: Duration,
    pub pending_initial_delay: Duration,
    pub retry_poll_interval: Duration,
    pub retry_initial_delay: Duration,
    pub cleanup_interval: Duration,
    pub cleanup_retention: chrono::Duration,
    pub stats_interval: Duration,
    /// How often to sweep for PROCESSING rows a worker claimed and then
    /// never finished (crash, kill -9 between claim and mark_*).
    pub reap_interval: Duration,
    /// How long a row may sit in PROCESSING with no update before the
    /// reaper considers its claiming worker dead and resets it to PENDING.
    pub reap_stale_after: chrono::Duration,
}

impl Default for OutboxProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            pending_poll_interval: Duration::from_secs(5),
            pending_initial_delay: Duration::from_secs(10),
            retry_poll_interval: Duration::from_secs(30),
            retry_initial_delay: Duration::from_secs(20),
            cleanup_interval: Duration::from_secs(3600),
            cleanup_retention: chrono::Duration::days(7),
            stats_interval: Duration::from_secs(300),
            reap_interval: Duration::from_secs(60),
            reap_stale_after: chrono::Duration::minutes(5),
        }
    }
}

pub struct OutboxProcessor {
    repository: Arc<dyn OutboxRepository>,
    publisher: Arc<dyn OutboxPublisher>,
    config: OutboxProcessorConfig,
}

impl OutboxProcessor {
    pub fn new(repository: Arc<dyn OutboxRepository>, publisher: Arc<dyn OutboxPublisher>) -> Self {
        Self {
            repository,
            publisher,
            config: OutboxProcessorConfig::default(),
        }
    }

    pub fn with_config(
        repository: Arc<dyn OutboxRepository>,
        publisher: Arc<dyn OutboxPublisher>,
        config: OutboxProcessorConfig,
    ) -> Self {
        Self {
            repository,
            publisher,
            config,
        }
    }

    /// Exponential backoff for a failed entry's next retry: `2^retry_count`
    /// minutes, capped at 24 hours so a chronically failing entry doesn't
    /// push its next attempt into the far future and effectively hide
    /// there without ever reaching `max_retries` and going to the dead
    /// letter queue.
    pub fn calculate_backoff(retry_count: i32) -> chrono::Duration {
        let minutes = 2i64.saturating_pow(retry_count.clamp(0, 20) as u32);
        chrono::Duration::minutes(minutes.min(24 * 60))
    }

    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!("outbox processor started");

        sleep(self.config.pending_initial_delay).await;

        let mut pending_interval = interval(self.config.pending_poll_interval);
        pending_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut retry_interval = interval(self.config.retry_poll_interval);
        retry_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cleanup_interval_timer = interval(self.config.cleanup_interval);
        let mut stats_interval_timer = interval(self.config.stats_interval);
        let mut reap_interval_timer = interval(self.config.reap_interval);

        sleep(self.config.retry_initial_delay.saturating_sub(self.config.pending_initial_delay)).await;

        loop {
            tokio::select! {
                _ = pending_interval.tick() => {
                    match self.process_pending_entries().await {
                        Ok(n) if n > 0 => tracing::debug!(processed = n, "processed pending outbox entries"),
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "pending outbox sweep failed"),
                    }
                }
                _ = retry_interval.tick() => {
                    match self.process_retry_entries().await {
                        Ok(n) if n > 0 => tracing::debug!(processed = n, "processed retrying outbox entries"),
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "retry outbox sweep failed"),
                    }
                }
                _ = cleanup_interval_timer.tick() => {
                    let before = Utc::now() - self.config.cleanup_retention;
                    match self.cleanup_completed_entries(before).await {
                        Ok(n) if n > 0 => tracing::info!(rows_deleted = n, "cleaned up completed outbox entries"),
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "outbox cleanup failed"),
                    }
                }
                _ = stats_interval_timer.tick() => {
                    match self.get_statistics().await {
                        Ok(stats) => tracing::info!(
                            pending = stats.pending,
                            processing = stats.processing,
                            failed = stats.failed,
                            dead_letter = stats.dead_letter,
                            "outbox statistics"
                        ),
                        Err(e) => tracing::error!(error = %e, "outbox statistics query failed"),
                    }
                }
                _ = reap_interval_timer.tick() => {
                    match self.reap_stale_processing().await {
                        Ok(n) if n > 0 => tracing::warn!(
                            reset = n,
                            "reset stale PROCESSING outbox entries back to PENDING"
                        ),
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "outbox stale-PROCESSING reap failed"),
                    }
                }
            }
        }
    }

    pub async fn process_pending_entries(&self) -> Result<usize, OutboxError> {
        let batch = self.repository.claim_pending_batch(self.config.batch_size).await?;
        self.dispatch_batch(batch).await
    }

    pub async fn process_retry_entries(&self) -> Result<usize, OutboxError> {
        let batch = self.repository.claim_retry_batch(self.config.batch_size).await?;
        self.dispatch_batch(batch).await
    }

    async fn dispatch_batch(&self, batch: Vec<OutboxEntry>) -> Result<usize, OutboxError> {
        let mut processed = 0;
        for entry in batch {
            match self.publisher.publish(&entry).await {
                Ok(()) => {
                    self.repository.mark_completed(entry.outbox_id).await?;
                    processed += 1;
                }
                Err(e) => {
                    if entry.retry_count + 1 >= entry.max_retries {
                        tracing::warn!(
                            outbox_id = entry.outbox_id,
                            retry_count = entry.retry_count,
                            error = %e,
                            "outbox entry exceeded max_retries, moving to dead letter"
                        );
                        self.repository.mark_dead_letter(entry.outbox_id, &e.to_string()).await?;
                    } else {
                        let next_retry_at = Utc::now() + Self::calculate_backoff(entry.retry_count);
                        self.repository
                            .mark_failed(entry.outbox_id, &e.to_string(), next_retry_at)
                            .await?;
                    }
                }
            }
        }
        Ok(processed)
    }

    pub async fn cleanup_completed_entries(&self, before: chrono::DateTime<Utc>) -> Result<u64, OutboxError> {
        self.repository.cleanup_completed_before(before).await
    }

    /// Reclaim entries left in PROCESSING by a worker that claimed them
    /// and then died before publishing. Reset rows go back to PENDING and
    /// are picked up by the next pending sweep like any other fresh entry.
    pub async fn reap_stale_processing(&self) -> Result<u64, OutboxError> {
        let before = Utc::now() - self.config.reap_stale_after;
        self.repository.reset_stale_processing(before).await
    }

    pub async fn get_statistics(&self) -> Result<OutboxStatistics, OutboxError> {
        self.repository.get_statistics().await
    }

    pub async fn get_dead_letter_entries(&self, limit: i64) -> Result<Vec<OutboxEntry>, OutboxError> {
        self.repository.get_dead_letter_entries(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::entry::{NewOutboxEntry, OutboxStatus};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(OutboxProcessor::calculate_backoff(0), chrono::Duration::minutes(1));
        assert_eq!(OutboxProcessor::calculate_backoff(1), chrono::Duration::minutes(2));
        assert_eq!(OutboxProcessor::calculate_backoff(4), chrono::Duration::minutes(16));
        assert_eq!(OutboxProcessor::calculate_backoff(20), chrono::Duration::hours(24));
        assert_eq!(OutboxProcessor::calculate_backoff(200), chrono::Duration::hours(24));
    }

    /// In-memory stand-in for `SqlxOutboxRepository` so the dispatcher's
    /// state machine can be driven without a database. Mirrors the same
    /// status transitions the real repository's SQL performs.
    #[derive(Default)]
    struct MockOutboxRepository {
        rows: Mutex<Vec<OutboxEntry>>,
    }

    impl MockOutboxRepository {
        fn with_entry(max_retries: i32) -> Arc<Self> {
            let repo = Self::default();
            repo.rows.lock().unwrap().push(OutboxEntry {
                outbox_id: 1,
                event_id: Uuid::new_v4(),
                aggregate_id: Uuid::new_v4(),
                aggregate_type: "Account".to_string(),
                aggregate_version: 0,
                global_sequence: 1,
                event_type: "AccountCreated".to_string(),
                event_data: serde_json::json!({}),
                metadata: serde_json::json!({}),
                status: OutboxStatus::Pending,
                created_at: Utc::now(),
                processed_at: None,
                updated_at: Utc::now(),
                retry_count: 0,
                max_retries,
                last_error: None,
                next_retry_at: None,
                priority: 5,
                partition_key: None,
                correlation_id: None,
                tenant_id: None,
            });
            Arc::new(repo)
        }

        /// Test-only helper: simulate the backoff window having elapsed so
        /// a FAILED row becomes eligible for `claim_retry_batch` without
        /// actually sleeping.
        fn force_retry_due(&self) {
            for row in self.rows.lock().unwrap().iter_mut() {
                row.next_retry_at = Some(Utc::now() - chrono::Duration::seconds(1));
            }
        }

        fn force_stale_processing(&self) {
            for row in self.rows.lock().unwrap().iter_mut() {
                row.status = OutboxStatus::Processing;
                row.updated_at = Utc::now() - chrono::Duration::minutes(10);
            }
        }
    }

    #[async_trait::async_trait]
    impl OutboxRepository for MockOutboxRepository {
        async fn enqueue(&self, _entry: &NewOutboxEntry) -> Result<i64, OutboxError> {
            unimplemented!("not exercised by dispatcher tests")
        }

        async fn claim_pending_batch(&self, limit: i64) -> Result<Vec<OutboxEntry>, OutboxError> {
            let mut rows = self.rows.lock().unwrap();
            let mut claimed = Vec::new();
            for row in rows.iter_mut() {
                if claimed.len() as i64 >= limit {
                    break;
                }
                if row.status == OutboxStatus::Pending {
                    row.status = OutboxStatus::Processing;
                    row.updated_at = Utc::now();
                    claimed.push(row.clone());
                }
            }
            Ok(claimed)
        }

        async fn claim_retry_batch(&self, limit: i64) -> Result<Vec<OutboxEntry>, OutboxError> {
            let mut rows = self.rows.lock().unwrap();
            let now = Utc::now();
            let mut claimed = Vec::new();
            for row in rows.iter_mut() {
                if claimed.len() as i64 >= limit {
                    break;
                }
                if row.status == OutboxStatus::Failed
                    && row.retry_count < row.max_retries
                    && row.next_retry_at.map(|t| t <= now).unwrap_or(false)
                {
                    row.status = OutboxStatus::Processing;
                    row.updated_at = now;
                    claimed.push(row.clone());
                }
            }
            Ok(claimed)
        }

        async fn mark_completed(&self, outbox_id: i64) -> Result<(), OutboxError> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows.iter_mut().find(|r| r.outbox_id == outbox_id).unwrap();
            row.status = OutboxStatus::Completed;
            row.processed_at = Some(Utc::now());
            Ok(())
        }

        async fn mark_failed(
            &self,
            outbox_id: i64,
            error: &str,
            next_retry_at: chrono::DateTime<Utc>,
        ) -> Result<(), OutboxError> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows.iter_mut().find(|r| r.outbox_id == outbox_id).unwrap();
            row.status = OutboxStatus::Failed;
            row.retry_count += 1;
            row.last_error = Some(error.to_string());
            row.next_retry_at = Some(next_retry_at);
            Ok(())
        }

        async fn mark_dead_letter(&self, outbox_id: i64, error: &str) -> Result<(), OutboxError> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows.iter_mut().find(|r| r.outbox_id == outbox_id).unwrap();
            row.status = OutboxStatus::DeadLetter;
            row.retry_count += 1;
            row.last_error = Some(error.to_string());
            Ok(())
        }

        async fn reset_stale_processing(
            &self,
            before: chrono::DateTime<Utc>,
        ) -> Result<u64, OutboxError> {
            let mut rows = self.rows.lock().unwrap();
            let mut reset = 0;
            for row in rows.iter_mut() {
                if row.status == OutboxStatus::Processing && row.updated_at < before {
                    row.status = OutboxStatus::Pending;
                    row.updated_at = Utc::now();
                    reset += 1;
                }
            }
            Ok(reset)
        }

        async fn cleanup_completed_before(
            &self,
            _before: chrono::DateTime<Utc>,
        ) -> Result<u64, OutboxError> {
            Ok(0)
        }

        async fn get_dead_letter_entries(&self, limit: i64) -> Result<Vec<OutboxEntry>, OutboxError> {
            let rows = self.rows.lock().unwrap();
            let mut dead: Vec<_> = rows
                .iter()
                .filter(|r| r.status == OutboxStatus::DeadLetter)
                .cloned()
                .collect();
            dead.sort_by_key(|r| r.created_at);
            dead.truncate(limit as usize);
            Ok(dead)
        }

        async fn get_statistics(&self) -> Result<OutboxStatistics, OutboxError> {
            let rows = self.rows.lock().unwrap();
            let count = |s: OutboxStatus| rows.iter().filter(|r| r.status == s).count() as i64;
            Ok(OutboxStatistics {
                pending: count(OutboxStatus::Pending),
                processing: count(OutboxStatus::Processing),
                completed: count(OutboxStatus::Completed),
                failed: count(OutboxStatus::Failed),
                dead_letter: count(OutboxStatus::DeadLetter),
                cancelled: count(OutboxStatus::Cancelled),
            })
        }
    }

    struct AlwaysFailPublisher;

    #[async_trait::async_trait]
    impl OutboxPublisher for AlwaysFailPublisher {
        async fn publish(&self, _entry: &OutboxEntry) -> Result<(), OutboxError> {
            Err(OutboxError::Publish("simulated broker outage".to_string()))
        }
    }

    struct AlwaysSucceedPublisher;

    #[async_trait::async_trait]
    impl OutboxPublisher for AlwaysSucceedPublisher {
        async fn publish(&self, _entry: &OutboxEntry) -> Result<(), OutboxError> {
            Ok(())
        }
    }

    /// S6: a sink that always fails drives one entry with `max_retries=2`
    /// through `PENDING -> PROCESSING -> FAILED -> PROCESSING ->
    /// DEAD_LETTER`, ending with `retry_count == max_retries` and showing
    /// up in both the dead-letter listing and the statistics.
    #[tokio::test]
    async fn dead_letters_after_max_retries() {
        let repo = MockOutboxRepository::with_entry(2);
        let processor = OutboxProcessor::new(repo.clone(), Arc::new(AlwaysFailPublisher));

        let processed = processor.process_pending_entries().await.unwrap();
        assert_eq!(processed, 0, "a failed publish is not counted as processed");

        let stats = processor.get_statistics().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.dead_letter, 0);

        repo.force_retry_due();
        processor.process_retry_entries().await.unwrap();

        let stats = processor.get_statistics().await.unwrap();
        assert_eq!(stats.dead_letter, 1);
        assert_eq!(stats.failed, 0);

        let dead = processor.get_dead_letter_entries(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].retry_count, dead[0].max_retries);
        assert!(dead[0].retry_count >= dead[0].max_retries);
    }

    /// A publish that succeeds on the first attempt should never touch
    /// `FAILED`/`DEAD_LETTER` at all.
    #[tokio::test]
    async fn completes_on_successful_publish() {
        let repo = MockOutboxRepository::with_entry(3);
        let processor = OutboxProcessor::new(repo.clone(), Arc::new(AlwaysSucceedPublisher));

        let processed = processor.process_pending_entries().await.unwrap();
        assert_eq!(processed, 1);

        let stats = processor.get_statistics().await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.failed, 0);
    }

    /// Property 6 (liveness): a row a worker claimed and never finished
    /// must not stay in PROCESSING forever - the reaper resets it back to
    /// PENDING once it's old enough to have lost its claiming worker.
    #[tokio::test]
    async fn reaps_stale_processing_entries() {
        let repo = MockOutboxRepository::with_entry(3);
        repo.force_stale_processing();

        let processor = OutboxProcessor::new(repo.clone(), Arc::new(AlwaysSucceedPublisher));
        let reset = processor.reap_stale_processing().await.unwrap();
        assert_eq!(reset, 1);

        let stats = processor.get_statistics().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.processing, 0);
    }
}

//! Mail ingestion: fetch snippets from a [`MailSource`], classify them and
//! persist both message and classification, tallying labels as it goes.
//!
//! Messages are keyed per owner by provider id. A message that is already
//! stored is not fetched, classified or written again; its latest stored
//! classification is reported instead. The partitioned ingest also moves a
//! stored message to the direction its listing reports. Each new message is written in its
//! own transaction, so a failure half way through a batch keeps everything
//! stored before it.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::error::AppError;
use crate::models::{Credential, Direction, NewMessage, Sentiment, SentimentCounts, StoredMessage};
use crate::sentiment::Classifier;
use crate::source::MailSource;

/// Provider search filters for the partitioned ingest.
#[derive(Debug, Clone)]
pub struct PartitionQueries {
    pub received: String,
    pub sent: String,
}

#[derive(Debug)]
pub struct IngestOutcome {
    /// The credential after any refresh; callers should keep this one.
    pub credential: Credential,
    pub messages: Vec<StoredMessage>,
    pub counts: SentimentCounts,
    pub stored: usize,
    pub skipped: usize,
}

#[derive(Debug)]
pub struct PartitionedOutcome {
    pub credential: Credential,
    /// Every stored received message of the owner, this run's included.
    pub received: Vec<StoredMessage>,
    /// Every stored sent message of the owner, this run's included.
    pub sent: Vec<StoredMessage>,
    pub counts: SentimentCounts,
    pub stored: usize,
    pub skipped: usize,
}

#[derive(Debug)]
pub struct StandaloneOutcome {
    pub sentiment: Sentiment,
    /// Number of stored messages that received a new classification.
    pub appended: usize,
    /// Ids of those messages, oldest first.
    pub message_ids: Vec<i64>,
}

/// How a batch treats messages that are already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Existing {
    Keep,
    /// Move a stored message to the batch direction.
    Retag,
}

#[derive(Default)]
struct BatchStats {
    counts: SentimentCounts,
    stored: usize,
    skipped: usize,
}

#[derive(Clone)]
pub struct Ingestor {
    source: Arc<dyn MailSource>,
    store: Database,
    classifier: Arc<Classifier>,
}

impl Ingestor {
    pub fn new(source: Arc<dyn MailSource>, store: Database, classifier: Arc<Classifier>) -> Self {
        Self {
            source,
            store,
            classifier,
        }
    }

    /// Fetch up to `max_results` recent messages regardless of direction.
    pub async fn full_ingest(
        &self,
        owner: &str,
        credential: &Credential,
        max_results: u32,
    ) -> Result<IngestOutcome, AppError> {
        let credential = self.source.authorize(credential).await?;
        let ids = self
            .source
            .list_messages(&credential, None, max_results)
            .await?;

        let mut stats = BatchStats::default();
        let mut seen = HashSet::new();
        let messages = self
            .process_batch(
                owner,
                &credential,
                &ids,
                Direction::Received,
                Existing::Keep,
                &mut seen,
                &mut stats,
            )
            .await?;

        info!(
            owner,
            fetched = ids.len(),
            stored = stats.stored,
            skipped = stats.skipped,
            "Full ingest finished"
        );

        Ok(IngestOutcome {
            credential,
            messages,
            counts: stats.counts,
            stored: stats.stored,
            skipped: stats.skipped,
        })
    }

    /// Fetch received and sent mail through two independent listings and
    /// store each message tagged with its direction.
    pub async fn partitioned_ingest(
        &self,
        owner: &str,
        credential: &Credential,
        queries: &PartitionQueries,
        max_results: u32,
    ) -> Result<PartitionedOutcome, AppError> {
        let credential = self.source.authorize(credential).await?;
        let received_ids = self
            .source
            .list_messages(&credential, Some(&queries.received), max_results)
            .await?;
        let sent_ids = self
            .source
            .list_messages(&credential, Some(&queries.sent), max_results)
            .await?;

        let mut stats = BatchStats::default();
        // A message listed under both filters is only taken as received.
        let mut seen = HashSet::new();
        self.process_batch(
            owner,
            &credential,
            &received_ids,
            Direction::Received,
            Existing::Retag,
            &mut seen,
            &mut stats,
        )
        .await?;
        self.process_batch(
            owner,
            &credential,
            &sent_ids,
            Direction::Sent,
            Existing::Retag,
            &mut seen,
            &mut stats,
        )
        .await?;

        let received = self
            .store
            .query_messages(owner, Some(Direction::Received))
            .await?;
        let sent = self.store.query_messages(owner, Some(Direction::Sent)).await?;

        info!(
            owner,
            received_fetched = received_ids.len(),
            sent_fetched = sent_ids.len(),
            stored = stats.stored,
            skipped = stats.skipped,
            "Partitioned ingest finished"
        );

        Ok(PartitionedOutcome {
            credential,
            received,
            sent,
            counts: stats.counts,
            stored: stats.stored,
            skipped: stats.skipped,
        })
    }

    /// Classify free text and append the result to every stored message of
    /// `owner` whose content matches it exactly.
    pub async fn classify_text(&self, owner: &str, text: &str) -> Result<StandaloneOutcome, AppError> {
        if text.trim().is_empty() {
            return Err(AppError::EmptyInput);
        }

        let sentiment = self.classifier.classify(text);
        let ids = self.store.find_ids_by_content(owner, text).await?;
        if ids.is_empty() {
            debug!(owner, "No stored message matches submitted text");
            return Err(AppError::NotFound);
        }

        for id in &ids {
            self.store.save_classification(*id, sentiment).await?;
        }

        info!(owner, matched = ids.len(), label = %sentiment.label, "Appended classifications");
        Ok(StandaloneOutcome {
            sentiment,
            appended: ids.len(),
            message_ids: ids,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_batch(
        &self,
        owner: &str,
        credential: &Credential,
        ids: &[String],
        direction: Direction,
        existing: Existing,
        seen: &mut HashSet<String>,
        stats: &mut BatchStats,
    ) -> Result<Vec<StoredMessage>, AppError> {
        let mut messages = Vec::with_capacity(ids.len());

        for id in ids {
            if !seen.insert(id.clone()) {
                continue;
            }

            if let Some(stored) = self.store.find_by_provider_id(owner, id).await? {
                let stored = self.keep_existing(stored, direction, existing).await?;
                if let Some(sentiment) = stored.sentiment {
                    stats.counts.record(sentiment.label);
                }
                stats.skipped += 1;
                messages.push(stored);
                continue;
            }

            let snippet = match self.source.fetch_snippet(credential, id).await {
                Ok(snippet) => snippet,
                Err(e) => {
                    warn!(
                        owner,
                        message_id = %id,
                        stored = stats.stored,
                        "Fetch failed mid-batch: {}",
                        e
                    );
                    return Err(e.into());
                }
            };

            let sentiment = self.classifier.classify(&snippet.text);
            let message = NewMessage {
                owner: owner.to_string(),
                provider_id: Some(id.clone()),
                content: snippet.text,
                received_at: snippet.received_at.unwrap_or_else(Utc::now),
                direction,
            };

            match self.store.record_analyzed(&message, sentiment).await? {
                Some(stored) => {
                    debug!(owner, message_id = %id, %direction, label = %sentiment.label, "Stored message");
                    stats.counts.record(sentiment.label);
                    stats.stored += 1;
                    messages.push(stored);
                }
                None => {
                    // Another request stored it between the lookup and the insert.
                    debug!(owner, message_id = %id, "Message stored concurrently");
                    let stored = self
                        .store
                        .find_by_provider_id(owner, id)
                        .await?
                        .ok_or_else(|| {
                            anyhow::anyhow!("Message {} vanished after a conflicting insert", id)
                        })?;
                    let stored = self.keep_existing(stored, direction, existing).await?;
                    if let Some(sentiment) = stored.sentiment {
                        stats.counts.record(sentiment.label);
                    }
                    stats.skipped += 1;
                    messages.push(stored);
                }
            }
        }

        Ok(messages)
    }

    async fn keep_existing(
        &self,
        mut stored: StoredMessage,
        direction: Direction,
        existing: Existing,
    ) -> Result<StoredMessage, AppError> {
        if existing == Existing::Retag && stored.direction != direction {
            self.store.set_direction(stored.id, direction).await?;
            debug!(
                owner = %stored.owner,
                message_id = stored.id,
                from = %stored.direction,
                to = %direction,
                "Moved stored message"
            );
            stored.direction = direction;
        }
        Ok(stored)
    }
}

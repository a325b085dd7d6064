use crate::models::{
    Classification, Direction, NewMessage, Sentiment, SentimentCounts, SentimentLabel,
    StoredMessage,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

/// Every message column plus the label/score of its newest classification.
const MESSAGE_SELECT: &str = "SELECT m.id, m.owner, m.provider_id, m.content, m.received_at, m.is_received, c.label, c.score
     FROM messages m
     LEFT JOIN classifications c
       ON c.id = (SELECT MAX(id) FROM classifications WHERE message_id = m.id)";

/// Append-only store of ingested messages and their classifications.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database url {}", database_url))?
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to open database")?;
        Ok(Self { pool })
    }

    /// Private in-memory database. A single long-lived connection keeps the
    /// data alive for the lifetime of the pool.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        let schema = include_str!("../schema.sql");
        sqlx::query(schema)
            .execute(&self.pool)
            .await
            .context("Failed to apply schema")?;
        Ok(())
    }

    pub async fn save_classification(&self, message_id: i64, sentiment: Sentiment) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO classifications (message_id, label, score, analyzed_at) VALUES (?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(sentiment.label.as_str())
        .bind(sentiment.score)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save classification for message {}", message_id))?;

        Ok(result.last_insert_rowid())
    }

    /// Store a message together with its first classification. Both rows
    /// become visible together or not at all. Returns `None` when the owner
    /// already holds a message with the same provider id.
    pub async fn record_analyzed(
        &self,
        message: &NewMessage,
        sentiment: Sentiment,
    ) -> Result<Option<StoredMessage>> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO messages (owner, provider_id, content, received_at, is_received)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (owner, provider_id) WHERE provider_id IS NOT NULL DO NOTHING",
        )
        .bind(&message.owner)
        .bind(&message.provider_id)
        .bind(&message.content)
        .bind(message.received_at)
        .bind(message.direction.is_received())
        .execute(&mut *tx)
        .await
        .context("Failed to save message")?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }
        let message_id = inserted.last_insert_rowid();

        sqlx::query(
            "INSERT INTO classifications (message_id, label, score, analyzed_at) VALUES (?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(sentiment.label.as_str())
        .bind(sentiment.score)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .context("Failed to save classification")?;

        tx.commit().await.context("Failed to commit message")?;

        Ok(Some(StoredMessage {
            id: message_id,
            owner: message.owner.clone(),
            provider_id: message.provider_id.clone(),
            content: message.content.clone(),
            received_at: message.received_at,
            direction: message.direction,
            sentiment: Some(sentiment),
        }))
    }

    pub async fn set_direction(&self, message_id: i64, direction: Direction) -> Result<()> {
        sqlx::query("UPDATE messages SET is_received = ? WHERE id = ?")
            .bind(direction.is_received())
            .bind(message_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to update direction of message {}", message_id))?;
        Ok(())
    }

    /// Messages of one owner in insertion order, optionally limited to one direction.
    pub async fn query_messages(
        &self,
        owner: &str,
        direction: Option<Direction>,
    ) -> Result<Vec<StoredMessage>> {
        let rows = match direction {
            Some(direction) => {
                sqlx::query(&format!(
                    "{MESSAGE_SELECT} WHERE m.owner = ? AND m.is_received = ? ORDER BY m.id ASC"
                ))
                .bind(owner)
                .bind(direction.is_received())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("{MESSAGE_SELECT} WHERE m.owner = ? ORDER BY m.id ASC"))
                    .bind(owner)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.iter().map(message_from_row).collect())
    }

    pub async fn find_by_provider_id(
        &self,
        owner: &str,
        provider_id: &str,
    ) -> Result<Option<StoredMessage>> {
        let row = sqlx::query(&format!(
            "{MESSAGE_SELECT} WHERE m.owner = ? AND m.provider_id = ?"
        ))
        .bind(owner)
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(message_from_row))
    }

    /// Ids of the owner's messages whose content matches `content` exactly.
    pub async fn find_ids_by_content(&self, owner: &str, content: &str) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT id FROM messages WHERE owner = ? AND content = ? ORDER BY id ASC")
            .bind(owner)
            .bind(content)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|r| r.get(0)).collect())
    }

    pub async fn classifications_for(&self, message_id: i64) -> Result<Vec<Classification>> {
        let rows = sqlx::query(
            "SELECT id, message_id, label, score, analyzed_at
             FROM classifications
             WHERE message_id = ?
             ORDER BY id ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        let mut classifications = Vec::with_capacity(rows.len());
        for row in rows {
            let label: String = row.get(2);
            classifications.push(Classification {
                id: row.get(0),
                message_id: row.get(1),
                label: SentimentLabel::parse(&label)
                    .with_context(|| format!("Unknown sentiment label {:?}", label))?,
                score: row.get(3),
                analyzed_at: row.get(4),
            });
        }

        Ok(classifications)
    }

    /// Per-label message counts for an owner; each message counts once,
    /// under its most recent classification.
    pub async fn sentiment_counts(&self, owner: &str) -> Result<SentimentCounts> {
        let rows = sqlx::query(
            "SELECT c.label, COUNT(*)
             FROM messages m
             JOIN classifications c
               ON c.id = (SELECT MAX(id) FROM classifications WHERE message_id = m.id)
             WHERE m.owner = ?
             GROUP BY c.label",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = SentimentCounts::default();
        for row in rows {
            let label: String = row.get(0);
            let count: i64 = row.get(1);
            let count = u32::try_from(count).unwrap_or(u32::MAX);
            match SentimentLabel::parse(&label) {
                Some(SentimentLabel::Positive) => counts.positive = count,
                Some(SentimentLabel::Negative) => counts.negative = count,
                Some(SentimentLabel::Neutral) => counts.neutral = count,
                None => {}
            }
        }

        Ok(counts)
    }
}

fn message_from_row(row: &SqliteRow) -> StoredMessage {
    let label: Option<String> = row.get(6);
    let score: Option<f64> = row.get(7);
    let sentiment = match (label.as_deref().and_then(SentimentLabel::parse), score) {
        (Some(label), Some(score)) => Some(Sentiment { label, score }),
        _ => None,
    };
    let received_at: DateTime<Utc> = row.get(4);

    StoredMessage {
        id: row.get(0),
        owner: row.get(1),
        provider_id: row.get(2),
        content: row.get(3),
        received_at,
        direction: Direction::from_is_received(row.get(5)),
        sentiment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        let db = Database::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    fn new_message(owner: &str, provider_id: Option<&str>, content: &str, direction: Direction) -> NewMessage {
        NewMessage {
            owner: owner.to_string(),
            provider_id: provider_id.map(String::from),
            content: content.to_string(),
            received_at: Utc::now(),
            direction,
        }
    }

    fn sentiment(label: SentimentLabel, score: f64) -> Sentiment {
        Sentiment { label, score }
    }

    /// Insert a message without any classification.
    async fn save_unscored(db: &Database, message: &NewMessage) -> i64 {
        sqlx::query(
            "INSERT INTO messages (owner, provider_id, content, received_at, is_received)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.owner)
        .bind(&message.provider_id)
        .bind(&message.content)
        .bind(message.received_at)
        .bind(message.direction.is_received())
        .execute(&db.pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = test_db().await;
        db.run_migrations().await.unwrap();
    }

    #[tokio::test]
    async fn test_record_and_query_by_direction() {
        let db = test_db().await;
        db.record_analyzed(
            &new_message("alice", Some("a1"), "Great work", Direction::Received),
            sentiment(SentimentLabel::Positive, 0.8),
        )
        .await
        .unwrap();
        db.record_analyzed(
            &new_message("alice", Some("a2"), "Sending the file", Direction::Sent),
            Sentiment::neutral(),
        )
        .await
        .unwrap();
        db.record_analyzed(
            &new_message("bob", Some("b1"), "Hello", Direction::Received),
            Sentiment::neutral(),
        )
        .await
        .unwrap();

        let all = db.query_messages("alice", None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].content, "Great work");
        assert_eq!(
            all[0].sentiment,
            Some(sentiment(SentimentLabel::Positive, 0.8))
        );

        let received = db
            .query_messages("alice", Some(Direction::Received))
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].direction, Direction::Received);

        let sent = db.query_messages("alice", Some(Direction::Sent)).await.unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].provider_id.as_deref(), Some("a2"));
    }

    #[tokio::test]
    async fn test_classifications_append() {
        let db = test_db().await;
        let id = save_unscored(&db, &new_message("alice", None, "ok", Direction::Received)).await;

        assert!(db.query_messages("alice", None).await.unwrap()[0].sentiment.is_none());

        db.save_classification(id, Sentiment::neutral()).await.unwrap();
        db.save_classification(id, sentiment(SentimentLabel::Negative, -0.4))
            .await
            .unwrap();

        let history = db.classifications_for(id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].label, SentimentLabel::Neutral);
        assert_eq!(history[1].label, SentimentLabel::Negative);

        let latest = db.query_messages("alice", None).await.unwrap()[0].sentiment;
        assert_eq!(latest, Some(sentiment(SentimentLabel::Negative, -0.4)));
    }

    #[tokio::test]
    async fn test_provider_id_is_unique_per_owner() {
        let db = test_db().await;
        let first = new_message("alice", Some("m1"), "one", Direction::Received);
        db.record_analyzed(&first, Sentiment::neutral()).await.unwrap();

        let duplicate = db.record_analyzed(&first, Sentiment::neutral()).await.unwrap();
        assert!(duplicate.is_none());
        // The skipped insert left nothing behind.
        assert_eq!(db.query_messages("alice", None).await.unwrap().len(), 1);
        assert_eq!(
            db.classifications_for(1).await.unwrap().len(),
            1
        );

        // Another owner may hold the same provider id.
        db.record_analyzed(
            &new_message("bob", Some("m1"), "one", Direction::Received),
            Sentiment::neutral(),
        )
        .await
        .unwrap();

        let found = db.find_by_provider_id("alice", "m1").await.unwrap().unwrap();
        assert_eq!(found.owner, "alice");
        assert!(db.find_by_provider_id("alice", "zzz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_direction() {
        let db = test_db().await;
        let stored = db
            .record_analyzed(
                &new_message("alice", Some("s1"), "Sending the file", Direction::Received),
                Sentiment::neutral(),
            )
            .await
            .unwrap()
            .unwrap();

        db.set_direction(stored.id, Direction::Sent).await.unwrap();

        let found = db.find_by_provider_id("alice", "s1").await.unwrap().unwrap();
        assert_eq!(found.direction, Direction::Sent);
        assert_eq!(found.sentiment, Some(Sentiment::neutral()));
    }

    #[tokio::test]
    async fn test_find_ids_by_content_is_exact_and_owner_scoped() {
        let db = test_db().await;
        for (owner, content) in [
            ("alice", "See you soon"),
            ("alice", "See you soon"),
            ("alice", "see you soon"),
            ("bob", "See you soon"),
        ] {
            save_unscored(&db, &new_message(owner, None, content, Direction::Received)).await;
        }

        let ids = db.find_ids_by_content("alice", "See you soon").await.unwrap();
        assert_eq!(ids, vec![1, 2]);
        assert!(db.find_ids_by_content("carol", "See you soon").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sentiment_counts_use_latest_classification() {
        let db = test_db().await;
        let a = db
            .record_analyzed(
                &new_message("alice", Some("1"), "good", Direction::Received),
                sentiment(SentimentLabel::Positive, 0.7),
            )
            .await
            .unwrap()
            .unwrap();
        db.record_analyzed(
            &new_message("alice", Some("2"), "bad", Direction::Sent),
            sentiment(SentimentLabel::Negative, -0.7),
        )
        .await
        .unwrap();
        save_unscored(&db, &new_message("alice", Some("3"), "unscored", Direction::Received)).await;

        // Re-classifying moves the message, it does not double count it.
        db.save_classification(a.id, Sentiment::neutral()).await.unwrap();

        let counts = db.sentiment_counts("alice").await.unwrap();
        assert_eq!(
            counts,
            SentimentCounts {
                positive: 0,
                negative: 1,
                neutral: 1
            }
        );
        assert_eq!(db.sentiment_counts("nobody").await.unwrap().total(), 0);
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a message was received by or sent by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Received,
    Sent,
}

impl Direction {
    pub fn is_received(self) -> bool {
        matches!(self, Direction::Received)
    }

    pub fn from_is_received(is_received: bool) -> Self {
        if is_received {
            Direction::Received
        } else {
            Direction::Sent
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Received => f.write_str("received"),
            Direction::Sent => f.write_str("sent"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    /// The sign of the score decides the label; zero (and NaN) is neutral.
    pub fn from_score(score: f64) -> Self {
        if score > 0.0 {
            SentimentLabel::Positive
        } else if score < 0.0 {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SentimentLabel::Positive => "Positive",
            SentimentLabel::Negative => "Negative",
            SentimentLabel::Neutral => "Neutral",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Positive" => Some(SentimentLabel::Positive),
            "Negative" => Some(SentimentLabel::Negative),
            "Neutral" => Some(SentimentLabel::Neutral),
            _ => None,
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the classifier for one piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sentiment {
    pub label: SentimentLabel,
    pub score: f64,
}

impl Sentiment {
    pub fn neutral() -> Self {
        Self {
            label: SentimentLabel::Neutral,
            score: 0.0,
        }
    }
}

/// A message as persisted in the store, with its most recent classification.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: i64,
    pub owner: String,
    pub provider_id: Option<String>,
    pub content: String,
    pub received_at: DateTime<Utc>,
    pub direction: Direction,
    pub sentiment: Option<Sentiment>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub owner: String,
    pub provider_id: Option<String>,
    pub content: String,
    pub received_at: DateTime<Utc>,
    pub direction: Direction,
}

#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub id: i64,
    pub message_id: i64,
    pub label: SentimentLabel,
    pub score: f64,
    pub analyzed_at: DateTime<Utc>,
}

/// Per-label tally; transient, never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SentimentCounts {
    pub positive: u32,
    pub negative: u32,
    pub neutral: u32,
}

impl SentimentCounts {
    pub fn record(&mut self, label: SentimentLabel) {
        match label {
            SentimentLabel::Positive => self.positive += 1,
            SentimentLabel::Negative => self.negative += 1,
            SentimentLabel::Neutral => self.neutral += 1,
        }
    }

    pub fn get(&self, label: SentimentLabel) -> u32 {
        match label {
            SentimentLabel::Positive => self.positive,
            SentimentLabel::Negative => self.negative,
            SentimentLabel::Neutral => self.neutral,
        }
    }

    pub fn total(&self) -> u32 {
        self.positive + self.negative + self.neutral
    }
}

/// OAuth credential handed in by the identity collaborator.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub token_endpoint: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Tokens this close to expiry are refreshed up front.
    const EXPIRY_SKEW_SECS: i64 = 60;

    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.is_empty() {
            return true;
        }
        match self.expires_at {
            Some(expiry) => expiry - Duration::seconds(Self::EXPIRY_SKEW_SECS) <= now,
            None => false,
        }
    }
}

// Keeps secrets out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("client_id", &self.client_id)
            .field("token_endpoint", &self.token_endpoint)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

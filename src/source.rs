//! Mail provider abstraction.
//!
//! The ingestion pipeline only ever talks to a [`MailSource`]; the Gmail wire
//! format stays inside `gmail.rs`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::Credential;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// The credential is unusable and cannot be refreshed.
    #[error("credential expired and could not be refreshed")]
    AuthExpired,
    #[error("mail provider unavailable: {0}")]
    Unavailable(String),
}

/// Preview text of a single provider message.
#[derive(Debug, Clone)]
pub struct Snippet {
    pub provider_id: String,
    pub text: String,
    pub received_at: Option<DateTime<Utc>>,
}

/// Remote mailbox access. Implementations never retry; callers decide.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// Return a credential that is usable right now, refreshing it if it
    /// has expired.
    async fn authorize(&self, credential: &Credential) -> Result<Credential, MailError>;

    /// List message ids matching `query` (provider search syntax), newest first.
    async fn list_messages(
        &self,
        credential: &Credential,
        query: Option<&str>,
        max_results: u32,
    ) -> Result<Vec<String>, MailError>;

    async fn fetch_snippet(
        &self,
        credential: &Credential,
        message_id: &str,
    ) -> Result<Snippet, MailError>;

    /// Address of the mailbox the credential belongs to.
    async fn profile_email(&self, credential: &Credential) -> Result<String, MailError>;

    async fn send_message(
        &self,
        credential: &Credential,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), MailError>;
}

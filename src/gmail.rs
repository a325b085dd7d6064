use async_trait::async_trait;
use chrono::DateTime;
use google_gmail1::Gmail;
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::auth::TokenRefresher;
use crate::models::Credential;
use crate::source::{MailError, MailSource, Snippet};

type Connector = HttpsConnector<HttpConnector>;

/// Gmail REST API adapter. A hub is built per call around the caller's
/// access token, so one `GmailSource` serves every signed-in user.
#[derive(Clone)]
pub struct GmailSource {
    client: hyper::Client<Connector>,
    base_url: Option<String>,
    timeout: Duration,
    refresher: TokenRefresher,
}

impl GmailSource {
    pub fn new(
        base_url: Option<String>,
        timeout: Duration,
        refresher: TokenRefresher,
    ) -> anyhow::Result<Self> {
        use anyhow::Context;

        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .context("Failed to load native roots")?
            .https_or_http()
            .enable_http1()
            .build();

        Ok(Self {
            client: hyper::Client::builder().build(connector),
            base_url,
            timeout,
            refresher,
        })
    }

    fn hub(&self, credential: &Credential) -> Gmail<Connector> {
        let mut hub = Gmail::new(self.client.clone(), credential.access_token.clone());
        if let Some(base_url) = &self.base_url {
            // The generated client appends "gmail/v1/..." directly.
            let base = format!("{}/", base_url.trim_end_matches('/'));
            hub.base_url(base);
        }
        hub
    }

    async fn call<T, F>(&self, what: &str, fut: F) -> Result<T, MailError>
    where
        F: Future<Output = google_gmail1::Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(map_api_error),
            Err(_) => Err(MailError::Unavailable(format!(
                "{} timed out after {}s",
                what,
                self.timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl MailSource for GmailSource {
    async fn authorize(&self, credential: &Credential) -> Result<Credential, MailError> {
        self.refresher.ensure_fresh(credential).await
    }

    async fn list_messages(
        &self,
        credential: &Credential,
        query: Option<&str>,
        max_results: u32,
    ) -> Result<Vec<String>, MailError> {
        let hub = self.hub(credential);
        let mut req = hub.users().messages_list("me").max_results(max_results);
        if let Some(q) = query {
            req = req.q(q);
        }

        let (_, message_list) = self.call("list messages", req.doit()).await?;

        let ids: Vec<String> = message_list
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();

        debug!(query = query.unwrap_or(""), count = ids.len(), "Listed messages");
        Ok(ids)
    }

    async fn fetch_snippet(
        &self,
        credential: &Credential,
        message_id: &str,
    ) -> Result<Snippet, MailError> {
        let hub = self.hub(credential);
        let req = hub
            .users()
            .messages_get("me", message_id)
            .format("metadata");

        let (_, msg) = self.call("get message", req.doit()).await?;

        Ok(Snippet {
            provider_id: msg.id.unwrap_or_else(|| message_id.to_string()),
            text: decode_entities(msg.snippet.as_deref().unwrap_or_default()),
            received_at: msg.internal_date.and_then(DateTime::from_timestamp_millis),
        })
    }

    async fn profile_email(&self, credential: &Credential) -> Result<String, MailError> {
        let hub = self.hub(credential);
        let (_, profile) = self
            .call("get profile", hub.users().get_profile("me").doit())
            .await?;

        profile
            .email_address
            .ok_or_else(|| MailError::Unavailable("profile has no email address".to_string()))
    }

    async fn send_message(
        &self,
        credential: &Credential,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), MailError> {
        let raw_message = format!(
            "From: me\r\nTo: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{}",
            to, subject, body
        );
        debug!(to, body_len = body.len(), "Sending message");

        let cursor = std::io::Cursor::new(raw_message.into_bytes());

        let hub = self.hub(credential);
        let upload = hub
            .users()
            .messages_send(google_gmail1::api::Message::default(), "me")
            .upload(
                cursor,
                "message/rfc822"
                    .parse()
                    .map_err(|_| MailError::Unavailable("invalid upload mime type".to_string()))?,
            );

        self.call("send message", upload).await?;
        Ok(())
    }
}

fn map_api_error(err: google_gmail1::Error) -> MailError {
    use google_gmail1::Error;

    match err {
        Error::MissingToken(_) => MailError::AuthExpired,
        Error::BadRequest(ref value) if error_code(value) == Some(401) => MailError::AuthExpired,
        Error::Failure(ref response) if response.status() == hyper::StatusCode::UNAUTHORIZED => {
            MailError::AuthExpired
        }
        other => MailError::Unavailable(other.to_string()),
    }
}

fn error_code(value: &serde_json::Value) -> Option<u64> {
    value.get("error")?.get("code")?.as_u64()
}

/// Gmail snippets arrive HTML-escaped.
fn decode_entities(snippet: &str) -> String {
    snippet
        .replace("&#39;", "'")
        .replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

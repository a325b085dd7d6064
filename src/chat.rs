//! Keyword chatbot with a generative-language fallback.
//!
//! The conversation lives in a [`ConversationContext`] owned by the caller
//! (the session store); [`ChatBot::reply`] takes it in and hands back the
//! updated one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::ChatConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    /// `input: ...` / `output: ...` lines, oldest first.
    pub history: Vec<String>,
}

#[derive(Debug)]
pub struct ChatTurn {
    pub reply: String,
    pub context: ConversationContext,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("no chat API key configured")]
    MissingApiKey,
    #[error("chat API unreachable: {0}")]
    Transport(String),
    #[error("chat API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("chat API response carried no reply text")]
    MissingReply,
}

#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, history: &[String]) -> Result<String, ChatError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

pub struct GeminiClient {
    http: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, api_url: String, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            http,
            api_url,
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl ReplyGenerator for GeminiClient {
    async fn generate(&self, history: &[String]) -> Result<String, ChatError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(ChatError::MissingApiKey)?;

        let body = GenerateRequest {
            contents: vec![Content {
                parts: history.iter().map(|line| Part { text: line }).collect(),
            }],
        };

        debug!(parts = history.len(), "Calling generative chat API");

        let response = self
            .http
            .post(&self.api_url)
            .query(&[("key", api_key)])
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Transport(format!("malformed response: {}", e)))?;

        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
            .ok_or(ChatError::MissingReply)
    }
}

pub struct ChatBot {
    generator: Arc<dyn ReplyGenerator>,
    /// Keys are lowercase.
    responses: HashMap<String, String>,
    fallback_reply: String,
    max_sentences: usize,
    max_history: usize,
}

impl ChatBot {
    pub fn new(generator: Arc<dyn ReplyGenerator>, config: &ChatConfig) -> Self {
        Self {
            generator,
            responses: config
                .responses
                .iter()
                .map(|(k, v)| (k.trim().to_lowercase(), v.clone()))
                .collect(),
            fallback_reply: config.fallback_reply.clone(),
            max_sentences: config.max_sentences,
            max_history: config.max_history,
        }
    }

    pub fn from_config(http: reqwest::Client, config: &ChatConfig) -> Self {
        let client = GeminiClient::new(
            http,
            config.api_url.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        );
        Self::new(Arc::new(client), config)
    }

    pub async fn reply(
        &self,
        mut context: ConversationContext,
        message: &str,
    ) -> Result<ChatTurn, AppError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AppError::EmptyInput);
        }

        context.history.push(format!("input: {}", message));

        let reply = match self.responses.get(&message.to_lowercase()) {
            Some(canned) => canned.clone(),
            None => match self.generator.generate(&context.history).await {
                Ok(text) => truncate_sentences(&text, self.max_sentences),
                Err(e) => {
                    match e {
                        ChatError::MissingApiKey => warn!("Chat API key not configured"),
                        _ => error!(error = %e, "Chat API request failed"),
                    }
                    self.fallback_reply.clone()
                }
            },
        };

        context.history.push(format!("output: {}", reply));
        if context.history.len() > self.max_history {
            let excess = context.history.len() - self.max_history;
            context.history.drain(..excess);
        }

        Ok(ChatTurn { reply, context })
    }
}

/// Keep the first `max` ". "-delimited segments.
fn truncate_sentences(text: &str, max: usize) -> String {
    text.split(". ").take(max).collect::<Vec<_>>().join(". ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records the history it was called with and answers with a fixed result.
    struct ScriptedGenerator {
        answer: Result<String, ()>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedGenerator {
        fn answering(text: &str) -> Self {
            Self {
                answer: Ok(text.to_string()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                answer: Err(()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReplyGenerator for ScriptedGenerator {
        async fn generate(&self, history: &[String]) -> Result<String, ChatError> {
            self.calls.lock().unwrap().push(history.to_vec());
            self.answer
                .clone()
                .map_err(|_| ChatError::Transport("connection refused".to_string()))
        }
    }

    fn bot(generator: Arc<ScriptedGenerator>) -> ChatBot {
        ChatBot::new(generator, &ChatConfig::default())
    }

    #[tokio::test]
    async fn test_predefined_reply_is_case_insensitive() {
        let generator = Arc::new(ScriptedGenerator::answering("unused"));
        let turn = bot(generator.clone())
            .reply(ConversationContext::default(), "HeLLo")
            .await
            .unwrap();

        assert_eq!(turn.reply, "Hi there! How can I assist you today?");
        assert!(generator.calls.lock().unwrap().is_empty());
        assert_eq!(
            turn.context.history,
            vec![
                "input: HeLLo".to_string(),
                "output: Hi there! How can I assist you today?".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_generated_reply_is_truncated() {
        let generator = Arc::new(ScriptedGenerator::answering(
            "One. Two. Three. Four. Five.",
        ));
        let turn = bot(generator)
            .reply(ConversationContext::default(), "tell me a story")
            .await
            .unwrap();
        assert_eq!(turn.reply, "One. Two. Three");
    }

    #[tokio::test]
    async fn test_history_is_sent_and_carried() {
        let generator = Arc::new(ScriptedGenerator::answering("Sure."));
        let bot = bot(generator.clone());

        let first = bot
            .reply(ConversationContext::default(), "hello")
            .await
            .unwrap();
        let second = bot.reply(first.context, "what can you do").await.unwrap();

        let calls = generator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            vec![
                "input: hello".to_string(),
                "output: Hi there! How can I assist you today?".to_string(),
                "input: what can you do".to_string(),
            ]
        );
        assert_eq!(second.context.history.len(), 4);
        assert_eq!(second.context.history[3], "output: Sure.");
    }

    #[tokio::test]
    async fn test_failure_uses_fallback() {
        let turn = bot(Arc::new(ScriptedGenerator::failing()))
            .reply(ConversationContext::default(), "anything")
            .await
            .unwrap();
        assert_eq!(turn.reply, ChatConfig::default().fallback_reply);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let config = ChatConfig {
            max_history: 4,
            ..ChatConfig::default()
        };
        let bot = ChatBot::new(Arc::new(ScriptedGenerator::answering("ok")), &config);

        let mut context = ConversationContext::default();
        for i in 0..5 {
            context = bot.reply(context, &format!("q{}", i)).await.unwrap().context;
        }
        assert_eq!(
            context.history,
            vec!["input: q3", "output: ok", "input: q4", "output: ok"]
        );
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let result = bot(Arc::new(ScriptedGenerator::answering("ok")))
            .reply(ConversationContext::default(), "   ")
            .await;
        assert!(matches!(result, Err(AppError::EmptyInput)));
    }

    #[test]
    fn test_truncate_sentences() {
        assert_eq!(truncate_sentences("A. B", 3), "A. B");
        assert_eq!(truncate_sentences("A. B. C. D", 3), "A. B. C");
        assert_eq!(truncate_sentences("No delimiter here", 3), "No delimiter here");
    }

    fn gemini(uri: &str, key: Option<&str>) -> GeminiClient {
        GeminiClient::new(
            reqwest::Client::new(),
            format!("{}/v1beta/models/test:generateContent", uri),
            key.map(String::from),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_gemini_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/test:generateContent"))
            .and(query_param("key", "test-key"))
            .and(body_partial_json(serde_json::json!({
                "contents": [{ "parts": [{ "text": "input: hi there" }] }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "Hello from the model." }], "role": "model" },
                    "finishReason": "STOP"
                }]
            })))
            .mount(&mock_server)
            .await;

        let reply = gemini(&mock_server.uri(), Some("test-key"))
            .generate(&["input: hi there".to_string()])
            .await
            .unwrap();
        assert_eq!(reply, "Hello from the model.");
    }

    #[tokio::test]
    async fn test_gemini_error_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
            .mount(&mock_server)
            .await;

        let err = gemini(&mock_server.uri(), Some("bad"))
            .generate(&["input: hi".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Status { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_gemini_missing_reply_path() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": []
            })))
            .mount(&mock_server)
            .await;

        let err = gemini(&mock_server.uri(), Some("k"))
            .generate(&["input: hi".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::MissingReply));
    }

    #[tokio::test]
    async fn test_gemini_without_key() {
        let err = gemini("http://127.0.0.1:1", None)
            .generate(&["input: hi".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::MissingApiKey));
    }
}

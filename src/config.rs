//! Settings loaded from `settings.toml`, with `MAILMOOD_<SECTION>__<FIELD>`
//! environment overrides applied on top.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::ingest::PartitionQueries;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
    pub gmail: GmailConfig,
    pub chat: ChatConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:mailmood.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub max_results: u32,
    pub received_query: String,
    pub sent_query: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_results: 10,
            received_query: "label:inbox -label:unread".to_string(),
            sent_query: "label:sent".to_string(),
        }
    }
}

impl IngestConfig {
    pub fn partition_queries(&self) -> PartitionQueries {
        PartitionQueries {
            received: self.received_query.clone(),
            sent: self.sent_query.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GmailConfig {
    /// Overrides the Gmail REST root (tests, proxies).
    pub api_base_url: Option<String>,
    /// Used for credentials that arrive without their own token endpoint.
    pub token_endpoint: String,
    pub timeout_secs: u64,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            token_endpoint: "https://oauth2.googleapis.com/token".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub max_sentences: usize,
    pub max_history: usize,
    pub timeout_secs: u64,
    pub fallback_reply: String,
    pub responses: HashMap<String, String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_url: "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash-latest:generateContent"
                .to_string(),
            api_key: None,
            max_sentences: 3,
            max_history: 20,
            timeout_secs: 30,
            fallback_reply: "Sorry, there was an error processing your request.".to_string(),
            responses: HashMap::from([
                (
                    "hello".to_string(),
                    "Hi there! How can I assist you today?".to_string(),
                ),
                ("bye".to_string(), "Goodbye! Have a great day!".to_string()),
            ]),
        }
    }
}

impl std::fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatConfig")
            .field("api_url", &self.api_url)
            .field("has_api_key", &self.api_key.is_some())
            .field("max_sentences", &self.max_sentences)
            .field("max_history", &self.max_history)
            .field("responses", &self.responses.len())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// External sign-in entry point linked from the login page.
    pub login_url: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_url: "/accounts/google/login/".to_string(),
        }
    }
}

impl Config {
    /// Load from `path`, falling back to defaults when the file is missing
    /// or unreadable, then apply environment overrides.
    pub fn load(path: &Path) -> Self {
        let config = match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    debug!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Failed to parse {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("No config file at {}, using defaults", path.display());
                Self::default()
            }
        };

        config.with_env_overrides(std::env::vars())
    }

    /// Apply `MAILMOOD_<SECTION>__<FIELD>` overrides. Unknown keys and
    /// unparsable numbers are ignored with a warning.
    pub fn with_env_overrides<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix("MAILMOOD_") else {
                continue;
            };
            let applied = match name {
                "SERVER__BIND" => {
                    self.server.bind = value;
                    true
                }
                "DATABASE__URL" => {
                    self.database.url = value;
                    true
                }
                "INGEST__MAX_RESULTS" => set_parsed(&mut self.ingest.max_results, &value),
                "INGEST__RECEIVED_QUERY" => {
                    self.ingest.received_query = value;
                    true
                }
                "INGEST__SENT_QUERY" => {
                    self.ingest.sent_query = value;
                    true
                }
                "GMAIL__API_BASE_URL" => {
                    self.gmail.api_base_url = Some(value);
                    true
                }
                "GMAIL__TOKEN_ENDPOINT" => {
                    self.gmail.token_endpoint = value;
                    true
                }
                "CHAT__API_URL" => {
                    self.chat.api_url = value;
                    true
                }
                "CHAT__API_KEY" => {
                    self.chat.api_key = Some(value);
                    true
                }
                "CHAT__MAX_HISTORY" => set_parsed(&mut self.chat.max_history, &value),
                "AUTH__LOGIN_URL" => {
                    self.auth.login_url = value;
                    true
                }
                _ => false,
            };

            if applied {
                debug!("Applied env override {}", key);
            } else {
                warn!("Ignoring env override {}", key);
            }
        }
        self
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, value: &str) -> bool {
    match value.parse() {
        Ok(parsed) => {
            *slot = parsed;
            true
        }
        Err(_) => false,
    }
}

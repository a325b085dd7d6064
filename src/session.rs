//! In-memory session store keyed by the session cookie.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::chat::ConversationContext;
use crate::models::Credential;

pub const SESSION_COOKIE: &str = "mailmood_session";

#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Signed-in owner; `None` for anonymous chat-only sessions.
    pub owner: Option<String>,
    pub credential: Option<Credential>,
    pub conversation: ConversationContext,
}

impl Session {
    /// Owner and credential, when the session is signed in.
    pub fn signed_in(&self) -> Option<(&str, &Credential)> {
        match (&self.owner, &self.credential) {
            (Some(owner), Some(credential)) => Some((owner.as_str(), credential)),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `session` under a fresh id and return the id.
    pub async fn create(&self, session: Session) -> String {
        let id = Uuid::new_v4().to_string();
        self.sessions.write().await.insert(id.clone(), session);
        debug!("Created session");
        id
    }

    pub async fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn set_credential(&self, id: &str, credential: Credential) {
        if let Some(session) = self.sessions.write().await.get_mut(id) {
            session.credential = Some(credential);
        }
    }

    pub async fn set_conversation(&self, id: &str, conversation: ConversationContext) {
        if let Some(session) = self.sessions.write().await.get_mut(id) {
            session.conversation = conversation;
        }
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }
}

/// Extract the session id from a `Cookie` header value.
pub fn session_id_from_cookie(header: &str) -> Option<&str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

pub fn session_cookie(id: &str) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id)
}

pub fn expired_session_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

//! HTTP surface: routes, session handling and the mapping from pipeline
//! outcomes to pages.

use axum::{
    Form, Json, Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::chat::ChatBot;
use crate::config::Config;
use crate::db::Database;
use crate::error::AppError;
use crate::ingest::Ingestor;
use crate::models::Credential;
use crate::report::{REPORT_FILENAME, render_pdf};
use crate::sentiment::Classifier;
use crate::session::{
    Session, SessionStore, expired_session_cookie, session_cookie, session_id_from_cookie,
};
use crate::source::{MailError, MailSource};
use crate::ui::{self, SendFormValues};

const HOME_PATH: &str = "/home";
const MAX_SUBJECT_CHARS: usize = 100;
const SEND_FAILED: &str = "Error sending email. Please try again.";

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    sessions: Arc<SessionStore>,
    ingestor: Ingestor,
    source: Arc<dyn MailSource>,
    store: Database,
    chatbot: Arc<ChatBot>,
}

impl AppState {
    pub fn new(
        config: Config,
        source: Arc<dyn MailSource>,
        store: Database,
        classifier: Classifier,
        chatbot: ChatBot,
    ) -> Self {
        let ingestor = Ingestor::new(source.clone(), store.clone(), Arc::new(classifier));
        Self {
            config: Arc::new(config),
            sessions: Arc::new(SessionStore::new()),
            ingestor,
            source,
            store,
            chatbot: Arc::new(chatbot),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/login", get(login))
        .route("/auth/session", post(create_session))
        .route("/logout", get(logout))
        .route("/home", get(home))
        .route("/all-emails", get(home))
        .route("/seen-emails", get(seen_emails))
        .route("/send-email", get(send_email_form).post(send_email))
        .route(
            "/analyze_sentiment",
            get(|| async { Redirect::to(HOME_PATH) }).post(analyze_sentiment),
        )
        .route("/chatbot", get(chat_page).post(chat))
        .route("/download-report", get(download_report))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

struct SignedIn {
    session_id: String,
    owner: String,
    credential: Credential,
}

async fn current_session(state: &AppState, headers: &HeaderMap) -> Option<(String, Session)> {
    let id = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .and_then(session_id_from_cookie)?;
    let session = state.sessions.get(id).await?;
    Some((id.to_string(), session))
}

async fn require_signed_in(state: &AppState, headers: &HeaderMap) -> Result<SignedIn, AppError> {
    let Some((session_id, session)) = current_session(state, headers).await else {
        return Err(AppError::AuthExpired);
    };
    let Some((owner, credential)) = session.signed_in() else {
        return Err(AppError::AuthExpired);
    };
    Ok(SignedIn {
        owner: owner.to_string(),
        credential: credential.clone(),
        session_id,
    })
}

fn with_cookie(mut response: Response, cookie: &str) -> Response {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
        Err(e) => error!("Invalid session cookie: {}", e),
    }
    response
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Html<String> {
    let signed_in = require_signed_in(&state, &headers).await.is_ok();
    Html(ui::render_index(signed_in))
}

async fn login(State(state): State<AppState>) -> Html<String> {
    Html(ui::render_login(&state.config.auth.login_url))
}

#[derive(Debug, Deserialize)]
struct SessionRequest {
    /// Address the caller expects to sign in as.
    #[serde(default)]
    owner: Option<String>,
    credential: Credential,
}

/// Start a session for the mailbox the credential belongs to. The owner is
/// always taken from the provider profile; a claimed owner must match it.
async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<SessionRequest>,
) -> Result<Response, AppError> {
    let mut credential = request.credential;
    if credential.token_endpoint.is_empty() {
        credential.token_endpoint = state.config.gmail.token_endpoint.clone();
    }

    let credential = state.source.authorize(&credential).await?;
    let owner = state.source.profile_email(&credential).await?;

    let claimed = request.owner.as_deref().map(str::trim).unwrap_or_default();
    if !claimed.is_empty() && !claimed.eq_ignore_ascii_case(&owner) {
        warn!(claimed, owner = %owner, "Sign-in owner does not match the mailbox");
        return Err(AppError::Forbidden(
            "Credential belongs to a different account.".to_string(),
        ));
    }

    let id = state
        .sessions
        .create(Session {
            owner: Some(owner.clone()),
            credential: Some(credential),
            ..Session::default()
        })
        .await;
    info!(owner = %owner, "Signed in");

    Ok(with_cookie(
        Redirect::to(HOME_PATH).into_response(),
        &session_cookie(&id),
    ))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some((id, _)) = current_session(&state, &headers).await {
        state.sessions.remove(&id).await;
        info!("Signed out");
    }
    with_cookie(Redirect::to("/").into_response(), &expired_session_cookie())
}

async fn home(State(state): State<AppState>, headers: HeaderMap) -> Result<Html<String>, AppError> {
    let user = require_signed_in(&state, &headers).await?;
    let outcome = state
        .ingestor
        .full_ingest(&user.owner, &user.credential, state.config.ingest.max_results)
        .await?;
    state
        .sessions
        .set_credential(&user.session_id, outcome.credential)
        .await;

    Ok(Html(ui::render_home(&outcome.messages, &outcome.counts)))
}

async fn seen_emails(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Html<String>, AppError> {
    let user = require_signed_in(&state, &headers).await?;
    let outcome = state
        .ingestor
        .partitioned_ingest(
            &user.owner,
            &user.credential,
            &state.config.ingest.partition_queries(),
            state.config.ingest.max_results,
        )
        .await?;
    state
        .sessions
        .set_credential(&user.session_id, outcome.credential)
        .await;

    Ok(Html(ui::render_read_lists(&outcome.received, &outcome.sent)))
}

async fn send_email_form(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Html<String>, AppError> {
    require_signed_in(&state, &headers).await?;
    Ok(Html(ui::render_send_form(&SendFormValues::default(), None)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SendEmailForm {
    recipient: String,
    subject: String,
    message: String,
}

impl SendEmailForm {
    fn validate(&self) -> Result<(), String> {
        if !looks_like_address(self.recipient.trim()) {
            return Err("Enter a valid recipient email address.".to_string());
        }
        if self.subject.contains(['\r', '\n']) {
            return Err("Subject must be a single line.".to_string());
        }
        if self.subject.chars().count() > MAX_SUBJECT_CHARS {
            return Err(format!(
                "Subject must be at most {} characters.",
                MAX_SUBJECT_CHARS
            ));
        }
        if self.message.trim().is_empty() {
            return Err("Message must not be empty.".to_string());
        }
        Ok(())
    }

    fn values(&self) -> SendFormValues<'_> {
        SendFormValues {
            recipient: &self.recipient,
            subject: &self.subject,
            message: &self.message,
        }
    }
}

fn looks_like_address(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

async fn send_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<SendEmailForm>,
) -> Result<Response, AppError> {
    let user = require_signed_in(&state, &headers).await?;

    if let Err(reason) = form.validate() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Html(ui::render_send_form(&form.values(), Some(&reason))),
        )
            .into_response());
    }

    let credential = state.source.authorize(&user.credential).await?;
    state
        .sessions
        .set_credential(&user.session_id, credential.clone())
        .await;

    match state
        .source
        .send_message(&credential, form.recipient.trim(), &form.subject, &form.message)
        .await
    {
        Ok(()) => {
            info!(owner = %user.owner, "Email sent");
            Ok(Redirect::to(HOME_PATH).into_response())
        }
        Err(MailError::AuthExpired) => Err(AppError::AuthExpired),
        Err(e) => {
            error!(owner = %user.owner, "Error sending email: {}", e);
            Ok(Html(ui::render_send_form(&form.values(), Some(SEND_FAILED))).into_response())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnalyzeForm {
    email_content: String,
}

async fn analyze_sentiment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<AnalyzeForm>,
) -> Result<Html<String>, AppError> {
    let user = require_signed_in(&state, &headers).await?;
    let outcome = state
        .ingestor
        .classify_text(&user.owner, &form.email_content)
        .await?;

    let history = match outcome.message_ids.first() {
        Some(id) => state.store.classifications_for(*id).await?,
        None => Vec::new(),
    };

    Ok(Html(ui::render_sentiment_result(
        &form.email_content,
        &outcome.sentiment,
        outcome.appended,
        &history,
    )))
}

async fn chat_page() -> Html<String> {
    Html(ui::render_chat())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChatForm {
    message: String,
}

#[derive(Debug, Serialize)]
struct ChatReply {
    reply: String,
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ChatForm>,
) -> Result<Response, AppError> {
    let (session_id, context, created) = match current_session(&state, &headers).await {
        Some((id, session)) => (id, session.conversation, false),
        None => {
            let id = state.sessions.create(Session::default()).await;
            (id, Default::default(), true)
        }
    };

    let turn = state.chatbot.reply(context, &form.message).await?;
    state
        .sessions
        .set_conversation(&session_id, turn.context)
        .await;

    let response = Json(ChatReply { reply: turn.reply }).into_response();
    if created {
        Ok(with_cookie(response, &session_cookie(&session_id)))
    } else {
        Ok(response)
    }
}

async fn download_report(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let user = require_signed_in(&state, &headers).await?;
    let counts = state.store.sentiment_counts(&user.owner).await?;
    if counts.total() == 0 {
        warn!(owner = %user.owner, "Rendering report with no classified messages");
    }
    let pdf = render_pdf(&counts)?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", REPORT_FILENAME),
            ),
        ],
        pdf,
    )
        .into_response())
}

use chrono::Utc;
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthType, AuthUrl, ClientId, ClientSecret, RefreshToken, RequestTokenError, TokenResponse,
    TokenUrl,
};
use tracing::{debug, warn};

use crate::models::Credential;
use crate::source::MailError;

// Only needed to build the client; refresh never visits it.
const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Exchanges refresh tokens for fresh access tokens.
#[derive(Debug, Clone, Default)]
pub struct TokenRefresher;

impl TokenRefresher {
    pub fn new() -> Self {
        Self
    }

    /// Return `credential` unchanged while it is valid, otherwise redeem its
    /// refresh token at the credential's token endpoint.
    pub async fn ensure_fresh(&self, credential: &Credential) -> Result<Credential, MailError> {
        if !credential.needs_refresh(Utc::now()) {
            return Ok(credential.clone());
        }
        self.refresh(credential).await
    }

    pub async fn refresh(&self, credential: &Credential) -> Result<Credential, MailError> {
        let Some(refresh_token) = credential.refresh_token.as_deref() else {
            warn!("Credential expired and carries no refresh token");
            return Err(MailError::AuthExpired);
        };

        debug!(endpoint = %credential.token_endpoint, "Refreshing access token");

        let token = oauth_client(credential)?
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(async_http_client)
            .await
            .map_err(map_token_error)?;

        let expires_at = token
            .expires_in()
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| Utc::now() + ttl);

        Ok(Credential {
            access_token: token.access_token().secret().clone(),
            refresh_token: token
                .refresh_token()
                .map(|t| t.secret().clone())
                .or_else(|| credential.refresh_token.clone()),
            expires_at,
            ..credential.clone()
        })
    }
}

fn oauth_client(credential: &Credential) -> Result<BasicClient, MailError> {
    let token_url = TokenUrl::new(credential.token_endpoint.clone()).map_err(|e| {
        warn!(endpoint = %credential.token_endpoint, "Unusable token endpoint: {}", e);
        MailError::AuthExpired
    })?;
    let auth_url = AuthUrl::new(AUTH_URL.to_string())
        .map_err(|e| MailError::Unavailable(format!("invalid auth url: {}", e)))?;
    let client_secret = Some(credential.client_secret.clone())
        .filter(|secret| !secret.is_empty())
        .map(ClientSecret::new);

    Ok(BasicClient::new(
        ClientId::new(credential.client_id.clone()),
        client_secret,
        auth_url,
        Some(token_url),
    )
    .set_auth_type(AuthType::RequestBody))
}

/// A standard OAuth error body (`invalid_grant` and friends) means the grant
/// is gone; anything else is the endpoint misbehaving.
fn map_token_error<RE>(err: RequestTokenError<RE, BasicErrorResponse>) -> MailError
where
    RE: std::error::Error + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response)
            if matches!(response.error(), BasicErrorResponseType::Extension(_)) =>
        {
            MailError::Unavailable(format!("token endpoint error: {}", response))
        }
        RequestTokenError::ServerResponse(response) => {
            warn!(error = %response, "Token refresh rejected");
            MailError::AuthExpired
        }
        RequestTokenError::Request(e) => {
            MailError::Unavailable(format!("token endpoint unreachable: {}", e))
        }
        RequestTokenError::Parse(e, _) => {
            MailError::Unavailable(format!("malformed token response: {}", e))
        }
        RequestTokenError::Other(reason) => MailError::Unavailable(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn expired_credential(token_endpoint: String) -> Credential {
        Credential {
            access_token: "stale".to_string(),
            refresh_token: Some("refresh-123".to_string()),
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            token_endpoint,
            expires_at: Some(Utc::now() - Duration::minutes(5)),
        }
    }

    #[tokio::test]
    async fn test_valid_credential_is_not_refreshed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&mock_server)
            .await;

        let mut credential = expired_credential(format!("{}/token", mock_server.uri()));
        credential.expires_at = Some(Utc::now() + Duration::hours(1));

        let refresher = TokenRefresher::new();
        let fresh = refresher.ensure_fresh(&credential).await.unwrap();
        assert_eq!(fresh.access_token, "stale");
    }

    #[tokio::test]
    async fn test_refresh_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-123"))
            .and(body_string_contains("client_secret=client-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh-token",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .mount(&mock_server)
            .await;

        let credential = expired_credential(format!("{}/token", mock_server.uri()));
        let refresher = TokenRefresher::new();
        let fresh = refresher.ensure_fresh(&credential).await.unwrap();

        assert_eq!(fresh.access_token, "fresh-token");
        assert_eq!(fresh.refresh_token.as_deref(), Some("refresh-123"));
        assert!(fresh.expires_at.unwrap() > Utc::now());
        assert!(!fresh.needs_refresh(Utc::now()));
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_auth_expired() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&mock_server)
            .await;

        let credential = expired_credential(format!("{}/token", mock_server.uri()));
        let refresher = TokenRefresher::new();
        let err = refresher.ensure_fresh(&credential).await.unwrap_err();
        assert!(matches!(err, MailError::AuthExpired));
    }

    #[tokio::test]
    async fn test_token_endpoint_outage_is_unavailable() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(503).set_body_string("backend error"))
            .mount(&mock_server)
            .await;

        let credential = expired_credential(format!("{}/token", mock_server.uri()));
        let err = TokenRefresher::new().ensure_fresh(&credential).await.unwrap_err();
        assert!(matches!(err, MailError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_temporarily_unavailable_keeps_grant() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
                "error": "temporarily_unavailable"
            })))
            .mount(&mock_server)
            .await;

        let credential = expired_credential(format!("{}/token", mock_server.uri()));
        let err = TokenRefresher::new().ensure_fresh(&credential).await.unwrap_err();
        assert!(matches!(err, MailError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_rotated_refresh_token_is_kept() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh-token",
                "refresh_token": "refresh-456",
                "token_type": "Bearer"
            })))
            .mount(&mock_server)
            .await;

        let credential = expired_credential(format!("{}/token", mock_server.uri()));
        let fresh = TokenRefresher::new().ensure_fresh(&credential).await.unwrap();
        assert_eq!(fresh.refresh_token.as_deref(), Some("refresh-456"));
        assert!(fresh.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_missing_refresh_token_is_auth_expired() {
        let mut credential = expired_credential("http://127.0.0.1:1/token".to_string());
        credential.refresh_token = None;

        let refresher = TokenRefresher::new();
        let err = refresher.ensure_fresh(&credential).await.unwrap_err();
        assert!(matches!(err, MailError::AuthExpired));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let credential = expired_credential("http://127.0.0.1:1/token".to_string());
        let refresher = TokenRefresher::new();
        let err = refresher.ensure_fresh(&credential).await.unwrap_err();
        assert!(matches!(err, MailError::Unavailable(_)));
    }
}

use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use tracing::{error, warn};

use crate::source::MailError;

/// Where unauthenticated or expired sessions are sent.
pub const LOGIN_PATH: &str = "/login";

/// Failures surfaced at the request boundary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("credential expired or missing; sign in again")]
    AuthExpired,
    #[error("remote service unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("No matching email found.")]
    NotFound,
    #[error("No content provided for sentiment analysis.")]
    EmptyInput,
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
    #[error("report rendering failed: {0}")]
    Report(String),
}

impl From<MailError> for AppError {
    fn from(err: MailError) -> Self {
        match err {
            MailError::AuthExpired => AppError::AuthExpired,
            MailError::Unavailable(reason) => AppError::RemoteUnavailable(reason),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::AuthExpired => {
                warn!("Redirecting to sign-in: {}", self);
                Redirect::to(LOGIN_PATH).into_response()
            }
            AppError::RemoteUnavailable(_) => {
                error!(error = %self, "Remote call failed");
                (
                    StatusCode::BAD_GATEWAY,
                    format!("An error occurred: {}", self),
                )
                    .into_response()
            }
            AppError::NotFound => (StatusCode::NOT_FOUND, self.to_string()).into_response(),
            AppError::EmptyInput | AppError::InvalidInput(_) => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            AppError::Forbidden(_) => {
                warn!("Rejected request: {}", self);
                (StatusCode::FORBIDDEN, self.to_string()).into_response()
            }
            AppError::Storage(_) | AppError::Report(_) => {
                error!(error = %self, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("An error occurred: {}", self),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::LOCATION;

    #[test]
    fn test_auth_expired_redirects_to_login() {
        let response = AppError::AuthExpired.into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[LOCATION], LOGIN_PATH);
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::RemoteUnavailable("timeout".into()), StatusCode::BAD_GATEWAY),
            (AppError::NotFound, StatusCode::NOT_FOUND),
            (AppError::EmptyInput, StatusCode::BAD_REQUEST),
            (AppError::InvalidInput("bad".into()), StatusCode::BAD_REQUEST),
            (AppError::Forbidden("not yours".into()), StatusCode::FORBIDDEN),
            (
                AppError::Storage(anyhow::anyhow!("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_mail_errors_map_to_taxonomy() {
        assert!(matches!(
            AppError::from(MailError::AuthExpired),
            AppError::AuthExpired
        ));
        assert!(matches!(
            AppError::from(MailError::Unavailable("503".into())),
            AppError::RemoteUnavailable(reason) if reason == "503"
        ));
    }
}

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use sqlx::Error as SqlxError;
use std::env::VarError;
use tera::Context;
use thiserror::Error;

use crate::TEMPLATES;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("Database migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Not found")]
    NotFound,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Template error: {0}")]
    TemplateError(#[from] tera::Error),

    #[error("Password error: {0}")]
    PasswordError(String),

    #[error("Identity error: {0}")]
    IdentityError(String),

    #[error("Session error: {0}")]
    SessionError(String),

    #[error("Mail error: {0}")]
    MailError(String),

    #[error("Export error: {0}")]
    ExportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] VarError),
}

impl AppError {
    /// Message shown on the error page. Server-side details stay in the log.
    fn public_message(&self) -> String {
        match self {
            AppError::NotFound => "The page you were looking for does not exist.".to_string(),
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Forbidden => "You do not have access to this page.".to_string(),
            _ => "Something went wrong on our end.".to_string(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{}", self);
        }
        render_error_page(status, &self.public_message())
    }
}

/// Renders `errors/{status}.html`, falling back to a plain-text body.
pub fn render_error_page(status: StatusCode, message: &str) -> HttpResponse {
    let mut context = Context::new();
    context.insert("title", status.canonical_reason().unwrap_or("Error"));
    context.insert("message", message);
    context.insert("messages", &Vec::<crate::flash::FlashMessage>::new());
    context.insert("current_user", &None::<()>);
    context.insert("version", env!("CARGO_PKG_VERSION"));

    match TEMPLATES.render(&format!("errors/{}.html", status.as_u16()), &context) {
        Ok(rendered) => HttpResponse::build(status)
            .content_type("text/html; charset=utf-8")
            .body(rendered),
        Err(e) => {
            log::error!("Failed to render error page: {}", e);
            HttpResponse::build(status).body(message.to_string())
        }
    }
}

impl From<AppError> for std::io::Error {
    fn from(err: AppError) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::BadRequest("nope".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::MailError("smtp down".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_server_errors_hide_details() {
        let err = AppError::PasswordError("argon2 exploded".into());
        assert!(!err.public_message().contains("argon2"));
        let err = AppError::BadRequest("Unsupported export format: pdf".into());
        assert_eq!(err.public_message(), "Unsupported export format: pdf");
    }
}

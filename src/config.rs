use std::env;

use crate::errors::AppError;

/// Smallest key `actix_web::cookie::Key::from` accepts.
const MIN_SESSION_KEY_LEN: usize = 64;

#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub session_key: Vec<u8>,
    pub secure_cookies: bool,
    pub site_url: String,
    pub email_from: String,
    pub smtp: Option<SmtpConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let session_key = env::var("SESSION_KEY")?.into_bytes();
        if session_key.len() < MIN_SESSION_KEY_LEN {
            return Err(AppError::ConfigError(format!(
                "SESSION_KEY must be at least {} bytes",
                MIN_SESSION_KEY_LEN
            )));
        }

        let smtp = env::var("SMTP_HOST").ok().map(|host| SmtpConfig {
            host,
            port: env::var("SMTP_PORT").ok().and_then(|p| p.parse().ok()),
            username: env::var("SMTP_USERNAME").ok(),
            password: env::var("SMTP_PASSWORD").ok(),
        });

        Ok(Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://ppetrackr.db".to_string()),
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            session_key,
            secure_cookies: env::var("SECURE_COOKIES")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            site_url: env::var("SITE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string())
                .trim_end_matches('/')
                .to_string(),
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "PPETrackr <noreply@ppetrackr.local>".to_string()),
            smtp,
        })
    }

    pub fn server_addr(&self) -> (String, u16) {
        (self.server_host.clone(), self.server_port)
    }
}

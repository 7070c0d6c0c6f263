//! One-shot messages carried in the session until the next rendered page.

use actix_session::Session;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

const FLASH_KEY: &str = "_flash";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Success,
    Info,
    Error,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FlashMessage {
    pub level: Level,
    pub text: String,
}

impl FlashMessage {
    pub fn success(text: impl Into<String>) -> Self {
        FlashMessage {
            level: Level::Success,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        FlashMessage {
            level: Level::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        FlashMessage {
            level: Level::Error,
            text: text.into(),
        }
    }
}

pub fn push(session: &Session, message: FlashMessage) -> Result<(), AppError> {
    let mut pending: Vec<FlashMessage> = session
        .get(FLASH_KEY)
        .map_err(|e| AppError::SessionError(e.to_string()))?
        .unwrap_or_default();
    pending.push(message);
    session
        .insert(FLASH_KEY, pending)
        .map_err(|e| AppError::SessionError(e.to_string()))
}

/// Drains pending messages; a corrupt entry is dropped. The session is
/// only touched when something is pending.
pub fn take(session: &Session) -> Vec<FlashMessage> {
    match session.get::<Vec<FlashMessage>>(FLASH_KEY) {
        Ok(None) => Vec::new(),
        Ok(Some(messages)) => {
            session.remove(FLASH_KEY);
            messages
        }
        Err(e) => {
            log::warn!("Discarding unreadable flash messages: {}", e);
            session.remove(FLASH_KEY);
            Vec::new()
        }
    }
}

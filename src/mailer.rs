use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tera::Context;

use crate::{config::Config, errors::AppError, TEMPLATES};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl OutgoingMail {
    /// Renders a plain-text template from `templates/emails/`.
    pub fn from_template(
        to: &str,
        subject: &str,
        template: &str,
        context: &Context,
    ) -> Result<Self, AppError> {
        let body = TEMPLATES.render(&format!("emails/{}", template), context)?;
        Ok(OutgoingMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body,
        })
    }
}

#[derive(Clone)]
pub enum Mailer {
    Smtp {
        transport: AsyncSmtpTransport<Tokio1Executor>,
        from: Mailbox,
    },
    /// No relay configured; messages only go to the log.
    Log,
    #[cfg(test)]
    Memory(std::sync::Arc<std::sync::Mutex<Vec<OutgoingMail>>>),
}

impl Mailer {
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let Some(smtp) = &config.smtp else {
            log::warn!("SMTP_HOST not set, outgoing mail will only be logged");
            return Ok(Mailer::Log);
        };

        let from: Mailbox = config
            .email_from
            .parse()
            .map_err(|e| {
                AppError::ConfigError(format!("EMAIL_FROM is not a valid mailbox: {}", e))
            })?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
            .map_err(|e| {
                AppError::ConfigError(format!("Invalid SMTP relay {}: {}", smtp.host, e))
            })?;
        if let Some(port) = smtp.port {
            builder = builder.port(port);
        }
        if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        log::info!("Sending mail through {}", smtp.host);
        Ok(Mailer::Smtp {
            transport: builder.build(),
            from,
        })
    }

    pub async fn send(&self, mail: OutgoingMail) -> Result<(), AppError> {
        match self {
            Mailer::Smtp { transport, from } => {
                let to: Mailbox = mail
                    .to
                    .parse()
                    .map_err(|e| {
                        AppError::MailError(format!("Invalid recipient {}: {}", mail.to, e))
                    })?;
                let message = Message::builder()
                    .from(from.clone())
                    .to(to)
                    .subject(mail.subject.as_str())
                    .header(ContentType::TEXT_PLAIN)
                    .body(mail.body)
                    .map_err(|e| AppError::MailError(e.to_string()))?;
                transport
                    .send(message)
                    .await
                    .map_err(|e| AppError::MailError(e.to_string()))?;
                log::info!("Mail sent to {}: {}", mail.to, mail.subject);
                Ok(())
            }
            Mailer::Log => {
                log::info!("Mail to {} ({}):\n{}", mail.to, mail.subject, mail.body);
                Ok(())
            }
            #[cfg(test)]
            Mailer::Memory(outbox) => {
                outbox
                    .lock()
                    .map_err(|e| AppError::MailError(e.to_string()))?
                    .push(mail);
                Ok(())
            }
        }
    }
}

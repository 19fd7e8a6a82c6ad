//! Outgoing e-mail: confirmation and password reset messages.
//!
//! Messages are handed to a [`Mailer`] from a background task so that the
//! HTTP response never waits on the mail server. Delivery failures are
//! logged and counted, never reported to the client.

mod smtp;

pub use smtp::SmtpMailer;

use crate::metrics;
use crate::telemetry::spans;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{Instrument, debug, info, warn};

/// Mail delivery errors.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("server rejected {command}: {code} {message}")]
    Rejected {
        command: &'static str,
        code: u16,
        message: String,
    },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timed out talking to mail server")]
    Timeout,
}

/// A single HTML message to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Shared handle to the configured mailer.
pub type SharedMailer = Arc<dyn Mailer>;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), MailError>;
}

/// Writes messages to the log instead of sending them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        // Bodies carry live confirmation and reset tokens.
        info!(to = %email.to, subject = %email.subject, "Mail delivery disabled, message not sent");
        debug!(to = %email.to, body = %email.html, "Unsent message body");
        Ok(())
    }
}

/// Which template a message was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailKind {
    Confirmation,
    PasswordReset,
}

impl EmailKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirmation => "confirmation",
            Self::PasswordReset => "password_reset",
        }
    }
}

/// Send `email` on a background task.
pub fn dispatch(mailer: SharedMailer, kind: EmailKind, email: Email) {
    let span = spans::email(kind.as_str(), &email.to);
    tokio::spawn(
        async move {
            match mailer.send(email).await {
                Ok(()) => {
                    metrics::record_email(kind.as_str(), "sent");
                    info!("E-mail sent");
                }
                Err(e) => {
                    metrics::record_email(kind.as_str(), "failed");
                    warn!(error = %e, "E-mail delivery failed");
                }
            }
        }
        .instrument(span),
    );
}

/// Escape text for inclusion in HTML element content or attribute values.
pub fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

/// E-mail asking a new user to confirm their address. `host` ends with `/`.
pub fn confirmation_email(to: &str, username: &str, host: &str, token: &str) -> Email {
    let link = html_escape(&format!("{host}api/auth/confirmed_email/{token}"));
    let username = html_escape(username);
    Email {
        to: to.to_string(),
        subject: "Confirm your email".to_string(),
        html: format!(
            "<!DOCTYPE html>\n<html>\n<body>\n\
             <p>Hi {username},</p>\n\
             <p>Thanks for signing up. Please confirm your email address by following the link below.</p>\n\
             <p><a href=\"{link}\">Confirm email</a></p>\n\
             <p>If you did not create an account, you can ignore this message.</p>\n\
             </body>\n</html>\n"
        ),
    }
}

/// E-mail with a password reset link. `host` ends with `/`.
pub fn reset_password_email(
    to: &str,
    username: &str,
    host: &str,
    token: &str,
    valid_secs: i64,
) -> Email {
    let link = html_escape(&format!("{host}api/auth/reset_password/{token}"));
    let username = html_escape(username);
    let minutes = (valid_secs / 60).max(1);
    Email {
        to: to.to_string(),
        subject: "Reset password".to_string(),
        html: format!(
            "<!DOCTYPE html>\n<html>\n<body>\n\
             <p>Hi {username},</p>\n\
             <p>A password reset was requested for your account. The link below is valid for {minutes} minutes.</p>\n\
             <p><a href=\"{link}\">Reset password</a></p>\n\
             <p>If you did not request a reset, you can ignore this message.</p>\n\
             </body>\n</html>\n"
        ),
    }
}

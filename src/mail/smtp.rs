//! Minimal async SMTP submission client.
//!
//! Speaks just enough of RFC 5321 to hand one message to an authenticated
//! relay: greeting, `EHLO`, optional `AUTH LOGIN`, `MAIL FROM`, `RCPT TO`,
//! `DATA`, `QUIT`. The connection is either TLS from the first byte (SMTPS)
//! or plaintext for local relays.

use super::{Email, MailError, Mailer};
use crate::config::{MailConfig, MailTls};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::{debug, warn};

const SESSION_TIMEOUT: Duration = Duration::from_secs(30);
const BODY_LINE_LEN: usize = 76;

/// Sends mail through a configured SMTP relay, one connection per message.
pub struct SmtpMailer {
    server: String,
    port: u16,
    username: String,
    password: String,
    from: String,
    from_name: String,
    tls: Option<TlsConnector>,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self, MailError> {
        let tls = match config.tls {
            MailTls::Implicit => Some(tls_connector()?),
            MailTls::None => None,
        };
        Ok(Self {
            server: config.server.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            from: config.from.clone(),
            from_name: config.from_name.clone(),
            tls,
        })
    }

    async fn deliver(&self, email: &Email) -> Result<(), MailError> {
        let tcp = TcpStream::connect((self.server.as_str(), self.port)).await?;
        match &self.tls {
            Some(connector) => {
                let name = ServerName::try_from(self.server.clone())
                    .map_err(|e| MailError::Tls(e.to_string()))?;
                let stream = connector.connect(name, tcp).await?;
                self.session(stream, email).await
            }
            None => self.session(tcp, email).await,
        }
    }

    async fn session<S>(&self, stream: S, email: &Email) -> Result<(), MailError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut conn = Connection {
            stream: BufReader::new(stream),
        };
        conn.expect("greeting", &[220]).await?;
        conn.command("EHLO contacts-api", "EHLO", &[250]).await?;

        if !self.username.is_empty() {
            conn.command("AUTH LOGIN", "AUTH", &[334]).await?;
            conn.command(&STANDARD.encode(&self.username), "AUTH", &[334])
                .await?;
            conn.command(&STANDARD.encode(&self.password), "AUTH", &[235])
                .await?;
        }

        conn.command(&format!("MAIL FROM:<{}>", self.from), "MAIL FROM", &[250])
            .await?;
        conn.command(
            &format!("RCPT TO:<{}>", strip_line_breaks(&email.to)),
            "RCPT TO",
            &[250, 251],
        )
        .await?;
        conn.command("DATA", "DATA", &[354]).await?;

        let payload = dot_stuff(&self.format_message(email));
        conn.write_raw(&payload).await?;
        conn.write_raw(".\r\n").await?;
        conn.expect("DATA", &[250]).await?;

        if let Err(e) = conn.command("QUIT", "QUIT", &[221]).await {
            debug!(error = %e, "SMTP QUIT not acknowledged");
        }
        Ok(())
    }

    fn format_message(&self, email: &Email) -> String {
        let domain = self
            .from
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or("localhost");
        let body = STANDARD.encode(email.html.as_bytes());

        let mut message = String::new();
        message.push_str(&format!(
            "From: {} <{}>\r\n",
            encode_header(&self.from_name.replace('"', "")),
            self.from
        ));
        message.push_str(&format!("To: <{}>\r\n", strip_line_breaks(&email.to)));
        message.push_str(&format!("Subject: {}\r\n", encode_header(&email.subject)));
        message.push_str(&format!("Date: {}\r\n", chrono::Utc::now().to_rfc2822()));
        message.push_str(&format!(
            "Message-ID: <{}@{}>\r\n",
            uuid::Uuid::new_v4(),
            domain
        ));
        message.push_str("MIME-Version: 1.0\r\n");
        message.push_str("Content-Type: text/html; charset=utf-8\r\n");
        message.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
        for chunk in body.as_bytes().chunks(BODY_LINE_LEN) {
            // base64 output is ASCII
            message.push_str(&String::from_utf8_lossy(chunk));
            message.push_str("\r\n");
        }
        message
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        tokio::time::timeout(SESSION_TIMEOUT, self.deliver(&email))
            .await
            .map_err(|_| MailError::Timeout)?
    }
}

struct Connection<S> {
    stream: BufReader<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    /// Read one reply, following `NNN-` continuation lines to the final `NNN ` line.
    async fn read_reply(&mut self) -> Result<(u16, String), MailError> {
        let mut text = String::new();
        loop {
            let mut line = String::new();
            if self.stream.read_line(&mut line).await? == 0 {
                return Err(MailError::Protocol("connection closed by server".into()));
            }
            let line = line.trim_end_matches(['\r', '\n']);
            let code = line
                .get(..3)
                .and_then(|c| c.parse::<u16>().ok())
                .ok_or_else(|| MailError::Protocol(format!("malformed reply: {line}")))?;

            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(line.get(4..).unwrap_or(""));

            if line.as_bytes().get(3) != Some(&b'-') {
                return Ok((code, text));
            }
        }
    }

    async fn expect(&mut self, command: &'static str, accepted: &[u16]) -> Result<String, MailError> {
        let (code, message) = self.read_reply().await?;
        if accepted.contains(&code) {
            Ok(message)
        } else {
            Err(MailError::Rejected {
                command,
                code,
                message,
            })
        }
    }

    async fn command(
        &mut self,
        line: &str,
        name: &'static str,
        accepted: &[u16],
    ) -> Result<String, MailError> {
        self.write_raw(line).await?;
        self.write_raw("\r\n").await?;
        self.expect(name, accepted).await
    }

    async fn write_raw(&mut self, data: &str) -> Result<(), MailError> {
        let stream = self.stream.get_mut();
        stream.write_all(data.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }
}

fn tls_connector() -> Result<TlsConnector, MailError> {
    let mut roots = RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs();
    for cert in certs.certs {
        if let Err(e) = roots.add(cert) {
            warn!("Failed to add root cert: {}", e);
        }
    }
    for e in &certs.errors {
        warn!("Error loading native certs: {}", e);
    }

    let provider = Arc::new(tokio_rustls::rustls::crypto::aws_lc_rs::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| MailError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Normalize line endings to CRLF and double any leading dot (RFC 5321 4.5.2).
fn dot_stuff(data: &str) -> String {
    let mut out = String::with_capacity(data.len() + 16);
    for line in data.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    // split leaves one empty trailing piece after a final newline
    if data.ends_with('\n') {
        out.truncate(out.len() - 2);
    }
    out
}

fn strip_line_breaks(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// RFC 2047 encoded-word for non-ASCII header values.
fn encode_header(value: &str) -> String {
    let value = strip_line_breaks(value);
    if value.is_ascii() {
        value
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

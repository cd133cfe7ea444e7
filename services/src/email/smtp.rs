//! SMTP delivery through lettre.

use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

use super::traits::Mailer;
use super::{MailError, OutgoingEmail, parse_address};
use crate::config::MailerConfig;

const SMTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Mailer backed by a pooled async SMTP connection.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Builds the transport. No connection is made until the first send
    /// or [`SmtpMailer::check_connection`].
    pub fn new(config: &MailerConfig) -> Result<Self, MailError> {
        let from = config
            .from_address()
            .parse::<Mailbox>()
            .map_err(|e| MailError::InvalidAddress(format!("{}: {e}", config.from_address())))?;

        let mut builder = if config.tls() {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(config.host())
                .map_err(|e| MailError::Transport(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(config.host())
        };

        builder = builder.port(config.port()).timeout(Some(SMTP_TIMEOUT));
        if let Some((username, password)) = config.credentials() {
            builder =
                builder.credentials(Credentials::new(username.to_owned(), password.to_owned()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    /// Opens a connection to the relay and issues `NOOP`.
    pub async fn check_connection(&self) -> Result<(), MailError> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(MailError::Transport(
                "SMTP relay did not accept the connection".to_owned(),
            )),
            Err(e) => Err(MailError::Transport(e.to_string())),
        }
    }
}

impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        let to = Mailbox::new(None, parse_address(&email.to)?);

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body)
            .map_err(|e| MailError::Build(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        let domain = email.to.rsplit('@').next().unwrap_or_default();
        tracing::debug!(recipient_domain = %domain, "Email delivered");
        Ok(())
    }
}

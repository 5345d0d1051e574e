use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{
        Attachment, Mailbox, MultiPart, SinglePart, header::ContentType,
    },
    transport::smtp::authentication::Credentials,
};
use tracing::debug;

use super::{MailCredentials, MailTransport, OutgoingMail, TransportError};

/// Port that selects STARTTLS; every other port uses implicit TLS.
pub const STARTTLS_PORT: u16 = 587;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// SMTP relay transport backed by `lettre`.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    host: String,
    port: u16,
}

impl SmtpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn connect(
        &self,
        credentials: &MailCredentials,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, lettre::transport::smtp::Error>
    {
        let builder = if self.port == STARTTLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host)?
        };

        Ok(builder
            .port(self.port)
            .timeout(Some(SMTP_TIMEOUT))
            .credentials(Credentials::new(
                credentials.user.clone(),
                credentials.secret.clone(),
            ))
            .build())
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn verify(
        &self,
        credentials: &MailCredentials,
    ) -> Result<(), TransportError> {
        let transport = self
            .connect(credentials)
            .map_err(|err| TransportError::Verify(err.to_string()))?;

        match transport.test_connection().await {
            Ok(true) => {
                debug!(host = %self.host, port = self.port, "smtp relay verified");
                Ok(())
            }
            Ok(false) => Err(TransportError::Verify(format!(
                "{}:{} did not accept the connection",
                self.host, self.port
            ))),
            Err(err) => Err(TransportError::Verify(err.to_string())),
        }
    }

    async fn send(
        &self,
        credentials: &MailCredentials,
        mail: OutgoingMail,
    ) -> Result<(), TransportError> {
        let message = build_message(mail)?;
        let transport = self
            .connect(credentials)
            .map_err(|err| TransportError::Send(err.to_string()))?;

        transport
            .send(message)
            .await
            .map_err(|err| TransportError::Send(err.to_string()))?;
        Ok(())
    }
}

fn build_message(mail: OutgoingMail) -> Result<Message, TransportError> {
    let from: Mailbox = mail.from.parse().map_err(|err| {
        TransportError::Message(format!("invalid sender '{}': {err}", mail.from))
    })?;
    let to: Mailbox = mail.to.parse().map_err(|err| {
        TransportError::Message(format!("invalid recipient '{}': {err}", mail.to))
    })?;

    let mut body = MultiPart::mixed().singlepart(SinglePart::plain(mail.body));
    for attachment in mail.attachments {
        let content_type = ContentType::parse(&attachment.content_type)
            .map_err(|err| {
                TransportError::Message(format!(
                    "invalid content type '{}': {err}",
                    attachment.content_type
                ))
            })?;
        body = body.singlepart(
            Attachment::new(attachment.file_name)
                .body(attachment.data, content_type),
        );
    }

    Message::builder()
        .from(from)
        .to(to)
        .subject(mail.subject)
        .multipart(body)
        .map_err(|err| TransportError::Message(err.to_string()))
}

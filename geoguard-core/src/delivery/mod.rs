//! Report delivery: credential resolution and the mail transport seam.

pub mod smtp;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

use crate::error::FinalizeError;
use crate::report::{
    builder::Report,
    writer::{RenderedReport, XLSX_CONTENT_TYPE},
};

#[derive(Clone, PartialEq, Eq)]
pub struct MailCredentials {
    pub user: String,
    pub secret: String,
}

impl fmt::Debug for MailCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailCredentials")
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Where delivery credentials come from. `None` means not configured.
pub trait CredentialSource: Send + Sync + fmt::Debug {
    fn resolve(&self) -> Option<MailCredentials>;
}

/// Credentials fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    credentials: Option<MailCredentials>,
}

impl StaticCredentials {
    pub fn new(user: Option<String>, secret: Option<String>) -> Self {
        let credentials = match (user, secret) {
            (Some(user), Some(secret))
                if !user.trim().is_empty() && !secret.trim().is_empty() =>
            {
                Some(MailCredentials {
                    user: user.trim().to_string(),
                    secret,
                })
            }
            _ => None,
        };
        Self { credentials }
    }

    pub fn missing() -> Self {
        Self::default()
    }
}

impl CredentialSource for StaticCredentials {
    fn resolve(&self) -> Option<MailCredentials> {
        self.credentials.clone()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct MailAttachment {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl fmt::Debug for MailAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailAttachment")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("len", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<MailAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport verification failed: {0}")]
    Verify(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("message could not be built: {0}")]
    Message(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn verify(
        &self,
        credentials: &MailCredentials,
    ) -> Result<(), TransportError>;

    async fn send(
        &self,
        credentials: &MailCredentials,
        mail: OutgoingMail,
    ) -> Result<(), TransportError>;
}

/// Credentials and destination checked before any I/O happens.
#[derive(Debug, Clone)]
pub struct PreparedDelivery {
    credentials: MailCredentials,
    destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub destination: String,
    pub attachment_count: usize,
}

pub struct DeliveryService {
    transport: Arc<dyn MailTransport>,
    credentials: Arc<dyn CredentialSource>,
    destination: Option<String>,
    verify_before_send: bool,
}

impl fmt::Debug for DeliveryService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryService")
            .field("transport", &std::any::type_name_of_val(&*self.transport))
            .field("credentials", &self.credentials)
            .field("destination", &self.destination)
            .field("verify_before_send", &self.verify_before_send)
            .finish()
    }
}

impl DeliveryService {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        credentials: Arc<dyn CredentialSource>,
        destination: Option<String>,
        verify_before_send: bool,
    ) -> Self {
        Self {
            transport,
            credentials,
            destination: destination
                .map(|to| to.trim().to_string())
                .filter(|to| !to.is_empty()),
            verify_before_send,
        }
    }

    /// Resolves credentials and destination. Fails with a configuration
    /// error without touching the network.
    pub fn prepare(&self) -> Result<PreparedDelivery, FinalizeError> {
        let credentials = self.credentials.resolve().ok_or_else(|| {
            FinalizeError::Config(
                "mail credentials (EMAIL_USER / EMAIL_PASS) are not set".into(),
            )
        })?;
        let destination = self.destination.clone().ok_or_else(|| {
            FinalizeError::Config("destination address (EMAIL_TO) is not set".into())
        })?;
        Ok(PreparedDelivery {
            credentials,
            destination,
        })
    }

    /// Sends the rendered report and its image attachments.
    pub async fn deliver(
        &self,
        prepared: PreparedDelivery,
        rendered: &RenderedReport,
        report: &Report,
    ) -> Result<Delivered, FinalizeError> {
        let PreparedDelivery {
            credentials,
            destination,
        } = prepared;

        if self.verify_before_send {
            self.transport.verify(&credentials).await.map_err(|err| {
                error!(key = %report.key, error = %err, "transport verification failed");
                FinalizeError::Delivery(err.to_string())
            })?;
        }

        let mail = compose(&credentials.user, &destination, rendered, report);
        let attachment_count = mail.attachments.len();

        self.transport.send(&credentials, mail).await.map_err(|err| {
            error!(key = %report.key, error = %err, "report delivery failed");
            FinalizeError::Delivery(err.to_string())
        })?;

        info!(
            key = %report.key,
            to = %destination,
            attachments = attachment_count,
            "report delivered"
        );
        Ok(Delivered {
            destination,
            attachment_count,
        })
    }

    /// [`prepare`](Self::prepare) followed by [`deliver`](Self::deliver).
    pub async fn send(
        &self,
        rendered: &RenderedReport,
        report: &Report,
    ) -> Result<Delivered, FinalizeError> {
        let prepared = self.prepare()?;
        self.deliver(prepared, rendered, report).await
    }
}

pub fn subject_for(key: &str) -> String {
    format!("Scan Batch Completed - {key}")
}

fn compose(
    from: &str,
    to: &str,
    rendered: &RenderedReport,
    report: &Report,
) -> OutgoingMail {
    let operator = if report.operator_name.is_empty() {
        "-"
    } else {
        report.operator_name.as_str()
    };
    let body = format!(
        "Batch {key} is complete.\n\n\
         Operator: {operator}\n\
         Scans: {count}\n\
         Total duration: {duration}\n\n\
         The scan report is attached.",
        key = report.key,
        count = report.scan_count(),
        duration = report.duration,
    );

    let mut attachments = Vec::with_capacity(1 + report.attachments.len());
    attachments.push(MailAttachment {
        file_name: rendered.file_name.clone(),
        content_type: XLSX_CONTENT_TYPE.to_string(),
        data: rendered.bytes.clone(),
    });
    attachments.extend(report.attachments.iter().map(|image| MailAttachment {
        file_name: image.file_name.clone(),
        content_type: image.content_type.clone(),
        data: image.data.clone(),
    }));

    OutgoingMail {
        from: from.to_string(),
        to: to.to_string(),
        subject: subject_for(&report.key),
        body,
        attachments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{Batch, BatchKey, NewScan, pairing::ImagePayload};
    use crate::report::builder::{ReportBuilder, ReportContext};

    fn sample() -> (Report, RenderedReport) {
        let mut batch = Batch::new(BatchKey::new("42").unwrap(), 1);
        batch.push(NewScan {
            operator_id: "42".into(),
            code_value: "A".into(),
            captured_at: "10:00:00".into(),
            epoch_millis: Some(0),
            image: Some(ImagePayload::new("image/jpeg", vec![1, 2])),
        });
        let report =
            ReportBuilder::new().build(&batch, &ReportContext::default());
        let rendered = RenderedReport {
            path: "/nonexistent/Batch_42.xlsx".into(),
            file_name: report.file_name.clone(),
            bytes: b"PK".to_vec(),
        };
        (report, rendered)
    }

    fn creds() -> Arc<StaticCredentials> {
        Arc::new(StaticCredentials::new(
            Some("sender@example.com".into()),
            Some("app-password".into()),
        ))
    }

    #[tokio::test]
    async fn missing_credentials_never_touch_transport() {
        let mut transport = MockMailTransport::new();
        transport.expect_verify().never();
        transport.expect_send().never();

        let service = DeliveryService::new(
            Arc::new(transport),
            Arc::new(StaticCredentials::missing()),
            Some("ops@example.com".into()),
            true,
        );
        let (report, rendered) = sample();

        let err = service.send(&rendered, &report).await.unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::ConfigError);
    }

    #[test]
    fn missing_destination_is_config_error() {
        let service = DeliveryService::new(
            Arc::new(MockMailTransport::new()),
            creds(),
            Some("   ".into()),
            false,
        );
        assert!(matches!(service.prepare(), Err(FinalizeError::Config(_))));
    }

    #[tokio::test]
    async fn verify_failure_skips_send() {
        let mut transport = MockMailTransport::new();
        transport
            .expect_verify()
            .times(1)
            .returning(|_| Err(TransportError::Verify("auth rejected".into())));
        transport.expect_send().never();

        let service = DeliveryService::new(
            Arc::new(transport),
            creds(),
            Some("ops@example.com".into()),
            true,
        );
        let (report, rendered) = sample();

        let err = service.send(&rendered, &report).await.unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::DeliveryFailed);
        assert!(err.to_string().contains("auth rejected"));
    }

    #[tokio::test]
    async fn sends_report_and_images() {
        let mut transport = MockMailTransport::new();
        transport.expect_verify().never();
        transport
            .expect_send()
            .times(1)
            .withf(|credentials, mail| {
                credentials.user == "sender@example.com"
                    && mail.to == "ops@example.com"
                    && mail.subject == "Scan Batch Completed - 42"
                    && mail.attachments.len() == 2
                    && mail.attachments[0].file_name == "Batch_42.xlsx"
                    && mail.attachments[0].content_type == XLSX_CONTENT_TYPE
                    && mail.attachments[1].file_name == "Batch_42_Scan_1.jpg"
            })
            .returning(|_, _| Ok(()));

        let service = DeliveryService::new(
            Arc::new(transport),
            creds(),
            Some("ops@example.com".into()),
            false,
        );
        let (report, rendered) = sample();

        let delivered = service.send(&rendered, &report).await.unwrap();
        assert_eq!(delivered.attachment_count, 2);
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let rendered = format!("{:?}", creds().resolve().unwrap());
        assert!(!rendered.contains("app-password"));
    }
}

//! Mail transport contract and the AWS SES v2 implementation.
//!
//! The dispatcher and the HTTP send path only ever see [`MailTransport`];
//! swapping the gateway (or injecting a mock in tests) never touches them.

use async_trait::async_trait;
use aws_sdk_sesv2::{
    types::{EmailContent, RawMessage},
    Client as SesClient,
};
use chrono::Utc;
use html_inline::{InlineImage, RemoteImageRef};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::types::{DeliveryReceipt, OutboundEmail, ValidationError};

/// Anything that can deliver an [`OutboundEmail`].
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<DeliveryReceipt, TransportError>;
}

/// Transport operation errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to build email: {0}")]
    BuildError(String),

    #[error("Send failed: {0}")]
    SendFailed(String),
}

/// SES email sender
pub struct SesMailer {
    client: SesClient,
    configuration_set: Option<String>,
}

impl SesMailer {
    /// Create a new SES mailer from environment config
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = SesClient::new(&config);

        Self {
            client,
            configuration_set: std::env::var("SES_CONFIGURATION_SET").ok(),
        }
    }

    /// Create with a custom client (for testing against localstack)
    pub fn with_client(client: SesClient, configuration_set: Option<String>) -> Self {
        Self {
            client,
            configuration_set,
        }
    }
}

#[async_trait]
impl MailTransport for SesMailer {
    #[instrument(skip(self, email), fields(to = ?email.to, subject = %email.subject))]
    async fn send(&self, email: &OutboundEmail) -> Result<DeliveryReceipt, TransportError> {
        email.validate()?;

        let mime = build_mime_message(email)?;

        let raw_message = RawMessage::builder()
            .data(aws_sdk_sesv2::primitives::Blob::new(mime))
            .build()
            .map_err(|e| TransportError::BuildError(e.to_string()))?;

        let email_content = EmailContent::builder().raw(raw_message).build();

        let mut send_request = self.client.send_email().content(email_content);

        if let Some(ref config_set) = self.configuration_set {
            send_request = send_request.configuration_set_name(config_set);
        }

        let result = send_request.send().await.map_err(|e| {
            error!(error = %e, "SES raw send failed");
            TransportError::SendFailed(e.to_string())
        })?;

        let message_id = result.message_id().unwrap_or("unknown").to_string();
        info!(message_id = %message_id, "Email accepted by SES");

        Ok(DeliveryReceipt {
            message_id,
            accepted_at: Utc::now(),
        })
    }
}

/// Build the raw MIME message:
///
/// ```text
/// multipart/mixed
/// └── multipart/related
///     ├── multipart/alternative  (text/plain, text/html)
///     └── inline image parts     (Content-ID referenced from the HTML)
/// └── attachment parts
/// ```
pub fn build_mime_message(email: &OutboundEmail) -> Result<Vec<u8>, TransportError> {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use std::fmt::Write;

    let mut message = String::new();
    let mixed = boundary("Part");
    let related = boundary("Rel");
    let alternative = boundary("Alt");

    let mut w = |line: String| {
        // CRLF is mandatory in raw SES payloads.
        let _ = write!(message, "{}\r\n", line);
    };

    w(format!("From: {}", email.from));
    w(format!("To: {}", email.to.join(", ")));
    if let Some(ref reply_to) = email.reply_to {
        w(format!("Reply-To: {}", reply_to));
    }
    w(format!("Subject: {}", email.subject));
    w("MIME-Version: 1.0".to_string());
    w(format!(
        "Content-Type: multipart/mixed; boundary=\"{}\"",
        mixed
    ));
    w(String::new());

    // Body: related envelope so cid references resolve against the inline
    // image parts below.
    w(format!("--{}", mixed));
    w(format!(
        "Content-Type: multipart/related; boundary=\"{}\"",
        related
    ));
    w(String::new());

    w(format!("--{}", related));
    w(format!(
        "Content-Type: multipart/alternative; boundary=\"{}\"",
        alternative
    ));
    w(String::new());

    if let Some(ref text) = email.text {
        w(format!("--{}", alternative));
        w("Content-Type: text/plain; charset=UTF-8".to_string());
        w("Content-Transfer-Encoding: quoted-printable".to_string());
        w(String::new());
        w(text.clone());
    }

    if let Some(ref html) = email.html {
        w(format!("--{}", alternative));
        w("Content-Type: text/html; charset=UTF-8".to_string());
        w("Content-Transfer-Encoding: quoted-printable".to_string());
        w(String::new());
        w(html.clone());
    }

    w(format!("--{}--", alternative));

    for image in &email.inline_images {
        w(format!("--{}", related));
        w(format!("Content-Type: {}", image.content_type));
        w("Content-Transfer-Encoding: base64".to_string());
        w(format!("Content-ID: <{}>", image.content_id));
        w("Content-Disposition: inline".to_string());
        w(String::new());
        let encoded = BASE64.encode(&image.data);
        for chunk in encoded.as_bytes().chunks(76) {
            w(std::str::from_utf8(chunk).unwrap_or("").to_string());
        }
    }

    w(format!("--{}--", related));

    for attachment in &email.attachments {
        w(format!("--{}", mixed));
        w(format!(
            "Content-Type: {}; name=\"{}\"",
            attachment.content_type, attachment.filename
        ));
        w("Content-Transfer-Encoding: base64".to_string());
        w(format!(
            "Content-Disposition: attachment; filename=\"{}\"",
            attachment.filename
        ));
        w(String::new());
        for chunk in attachment.content.as_bytes().chunks(76) {
            w(std::str::from_utf8(chunk).unwrap_or("").to_string());
        }
    }

    w(format!("--{}--", mixed));

    Ok(message.into_bytes())
}

fn boundary(label: &str) -> String {
    format!("----=_{}_{}", label, Uuid::new_v4().to_string().replace('-', ""))
}

/// Fetch the remote image references a sanitize pass extracted, returning
/// them as inline attachments under their assigned content-ids.
///
/// A fetch failure drops that image with a warning; the `cid:` reference
/// then renders as a broken image, no worse than the dead URL it replaced.
pub async fn fetch_remote_images(
    client: &reqwest::Client,
    refs: &[RemoteImageRef],
) -> Vec<InlineImage> {
    let mut images = Vec::with_capacity(refs.len());

    for image_ref in refs {
        let response = match client.get(&image_ref.url).send().await {
            Ok(resp) => match resp.error_for_status() {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(url = %image_ref.url, error = %e, "remote image fetch rejected, skipping");
                    continue;
                }
            },
            Err(e) => {
                warn!(url = %image_ref.url, error = %e, "remote image fetch failed, skipping");
                continue;
            }
        };

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        match response.bytes().await {
            Ok(bytes) => images.push(InlineImage {
                content_id: image_ref.content_id.clone(),
                content_type,
                data: bytes.to_vec(),
            }),
            Err(e) => {
                warn!(url = %image_ref.url, error = %e, "remote image body read failed, skipping");
            }
        }
    }

    images
}

/// In-memory transport for tests: records every accepted send, and can be
/// told to reject sends addressed to a marker recipient (or all of them).
#[derive(Default)]
pub struct MockTransport {
    sent: std::sync::Mutex<Vec<OutboundEmail>>,
    fail_recipients_containing: Option<String>,
    fail_all: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every send.
    pub fn failing_all() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    /// Reject sends whose recipient list contains `marker`.
    pub fn failing_recipients_containing(marker: &str) -> Self {
        Self {
            fail_recipients_containing: Some(marker.to_string()),
            ..Self::default()
        }
    }

    /// Snapshot of everything accepted so far.
    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().expect("mock transport lock").clone()
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn send(&self, email: &OutboundEmail) -> Result<DeliveryReceipt, TransportError> {
        email.validate()?;

        if self.fail_all {
            return Err(TransportError::SendFailed("transport unreachable".into()));
        }
        if let Some(ref marker) = self.fail_recipients_containing {
            if email.to.iter().any(|to| to.contains(marker)) {
                return Err(TransportError::SendFailed(format!(
                    "recipient rejected: {}",
                    marker
                )));
            }
        }

        self.sent.lock().expect("mock transport lock").push(email.clone());
        Ok(DeliveryReceipt {
            message_id: format!("mock-{}", Uuid::new_v4()),
            accepted_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use crate::types::EmailAttachment;

    fn email_with_inline_image() -> OutboundEmail {
        OutboundEmail {
            from: "Courier <noreply@courierlists.com>".to_string(),
            to: vec!["user@example.com".to_string()],
            reply_to: None,
            subject: "Inline test".to_string(),
            html: Some(r#"<p>hi</p><img src="cid:img0.1@courier">"#.to_string()),
            text: Some("hi".to_string()),
            inline_images: vec![InlineImage {
                content_id: "img0.1@courier".to_string(),
                content_type: "image/png".to_string(),
                data: vec![1, 2, 3, 4],
            }],
            attachments: vec![],
        }
    }

    #[test]
    fn mime_message_carries_content_id_parts() {
        let mime = build_mime_message(&email_with_inline_image()).unwrap();
        let mime = String::from_utf8(mime).unwrap();

        assert!(mime.contains("Content-Type: multipart/mixed;"));
        assert!(mime.contains("Content-Type: multipart/related;"));
        assert!(mime.contains("Content-Type: multipart/alternative;"));
        assert!(mime.contains("Content-ID: <img0.1@courier>"));
        assert!(mime.contains("Content-Disposition: inline"));
        assert!(mime.contains(&BASE64.encode([1u8, 2, 3, 4])));
    }

    #[test]
    fn mime_message_carries_regular_attachments() {
        let mut email = email_with_inline_image();
        email.attachments.push(EmailAttachment {
            filename: "report.csv".to_string(),
            content: BASE64.encode(b"a,b\n1,2\n"),
            content_type: "text/csv".to_string(),
        });

        let mime = String::from_utf8(build_mime_message(&email).unwrap()).unwrap();
        assert!(mime.contains("Content-Disposition: attachment; filename=\"report.csv\""));
        assert!(mime.contains("Content-Type: text/csv; name=\"report.csv\""));
    }

    #[test]
    fn mime_lines_are_crlf_terminated() {
        let mime = String::from_utf8(build_mime_message(&email_with_inline_image()).unwrap()).unwrap();
        for line in mime.split("\r\n") {
            assert!(!line.contains('\n'));
        }
    }

    #[tokio::test]
    async fn mock_transport_records_sends() {
        let transport = MockTransport::new();
        let email = OutboundEmail::simple("a@x.com", "b@x.com", "s", "<p>h</p>");

        let receipt = transport.send(&email).await.unwrap();
        assert!(receipt.message_id.starts_with("mock-"));
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(transport.sent()[0].subject, "s");
    }

    #[tokio::test]
    async fn mock_transport_rejects_marked_recipients() {
        let transport = MockTransport::failing_recipients_containing("bounce@");
        let bad = OutboundEmail::simple("a@x.com", "bounce@x.com", "s", "<p>h</p>");
        let good = OutboundEmail::simple("a@x.com", "ok@x.com", "s", "<p>h</p>");

        assert!(matches!(
            transport.send(&bad).await,
            Err(TransportError::SendFailed(_))
        ));
        assert!(transport.send(&good).await.is_ok());
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn mock_transport_still_validates() {
        let transport = MockTransport::new();
        let invalid = OutboundEmail::simple("nope", "b@x.com", "s", "<p>h</p>");
        assert!(matches!(
            transport.send(&invalid).await,
            Err(TransportError::Validation(_))
        ));
    }
}

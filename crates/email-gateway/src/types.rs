//! Outbound email types and validation.

use chrono::{DateTime, Utc};
use html_inline::InlineImage;
use serde::{Deserialize, Serialize};

/// A fully assembled email ready for a [`crate::MailTransport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEmail {
    /// Sender, either bare or in `Name <addr>` form.
    pub from: String,

    /// Recipient addresses.
    pub to: Vec<String>,

    /// Reply-to address (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,

    /// Subject line.
    pub subject: String,

    /// HTML body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,

    /// Plain-text alternative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Images embedded via `cid:` references in the HTML body.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inline_images: Vec<InlineImage>,

    /// Regular file attachments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<EmailAttachment>,
}

impl OutboundEmail {
    /// Minimal HTML email.
    pub fn simple(from: &str, to: &str, subject: &str, html: &str) -> Self {
        Self {
            from: from.to_string(),
            to: vec![to.to_string()],
            reply_to: None,
            subject: subject.to_string(),
            html: Some(html.to_string()),
            text: None,
            inline_images: vec![],
            attachments: vec![],
        }
    }

    /// Add a plain text alternative.
    pub fn with_text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    /// Validate addresses and content before handing to a transport.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.from.is_empty() {
            return Err(ValidationError::MissingField("from"));
        }
        if !is_valid_email(&self.from) {
            return Err(ValidationError::InvalidEmail(self.from.clone()));
        }

        if self.to.is_empty() {
            return Err(ValidationError::MissingField("to"));
        }
        for email in &self.to {
            if !is_valid_email(email) {
                return Err(ValidationError::InvalidEmail(email.clone()));
            }
        }

        if self.subject.is_empty() {
            return Err(ValidationError::MissingField("subject"));
        }

        if self.html.is_none() && self.text.is_none() {
            return Err(ValidationError::MissingContent);
        }

        Ok(())
    }
}

/// A regular (non-inline) attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAttachment {
    /// Filename shown to the recipient.
    pub filename: String,

    /// Base64-encoded content.
    pub content: String,

    /// MIME type (e.g., "application/pdf").
    #[serde(default = "default_mime_type")]
    pub content_type: String,
}

fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}

/// The transport's acknowledgement of one accepted send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Transport-assigned message id.
    pub message_id: String,

    /// When the transport accepted the message.
    pub accepted_at: DateTime<Utc>,
}

/// Validation error
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Email must have either html or text content")]
    MissingContent,
}

/// Format a sender as `Name <addr>`, or bare when no display name is set.
pub fn sender_address(from_email: &str, from_name: Option<&str>) -> String {
    match from_name {
        Some(name) if !name.trim().is_empty() => format!("{} <{}>", name.trim(), from_email),
        _ => from_email.to_string(),
    }
}

/// Check if email address is valid, accepting `Name <email@domain>` form.
fn is_valid_email(email: &str) -> bool {
    let email = match (email.find('<'), email.find('>')) {
        (Some(start), Some(end)) if start < end => &email[start + 1..end],
        _ => email,
    };

    email_address::EmailAddress::is_valid(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_email() {
        let email = OutboundEmail::simple(
            "noreply@courierlists.com",
            "user@example.com",
            "Test Subject",
            "<p>Hello</p>",
        );

        assert_eq!(email.from, "noreply@courierlists.com");
        assert_eq!(email.to, vec!["user@example.com"]);
        assert!(email.validate().is_ok());
    }

    #[test]
    fn test_email_with_display_name() {
        let email = OutboundEmail::simple(
            "Courier <noreply@courierlists.com>",
            "John Doe <john@example.com>",
            "Test",
            "<p>Hello</p>",
        );

        assert!(email.validate().is_ok());
    }

    #[test]
    fn test_missing_recipient() {
        let mut email =
            OutboundEmail::simple("from@example.com", "to@example.com", "Test", "<p>Hello</p>");
        email.to.clear();

        assert!(matches!(
            email.validate(),
            Err(ValidationError::MissingField("to"))
        ));
    }

    #[test]
    fn test_invalid_recipient() {
        let email = OutboundEmail::simple("from@example.com", "not-an-address", "Test", "<p>Hi</p>");

        assert!(matches!(
            email.validate(),
            Err(ValidationError::InvalidEmail(_))
        ));
    }

    #[test]
    fn test_content_required() {
        let mut email =
            OutboundEmail::simple("from@example.com", "to@example.com", "Test", "<p>Hi</p>");
        email.html = None;

        assert!(matches!(
            email.validate(),
            Err(ValidationError::MissingContent)
        ));

        let with_text = email.with_text("hi");
        assert!(with_text.validate().is_ok());
    }

    #[test]
    fn test_sender_address_formatting() {
        assert_eq!(
            sender_address("noreply@courierlists.com", Some("Courier")),
            "Courier <noreply@courierlists.com>"
        );
        assert_eq!(
            sender_address("noreply@courierlists.com", None),
            "noreply@courierlists.com"
        );
        assert_eq!(
            sender_address("noreply@courierlists.com", Some("  ")),
            "noreply@courierlists.com"
        );
    }
}

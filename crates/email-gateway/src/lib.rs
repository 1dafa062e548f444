//! Outbound mail gateway.
//!
//! Everything that touches the outside world when an email leaves the
//! system lives here: the [`MailTransport`] contract the dispatcher sends
//! through, the AWS SES v2 implementation of it, raw MIME assembly (with
//! `Content-ID` parts for inlined images), and the fetcher that resolves
//! the remote image references a sanitize pass extracts.
//!
//! ```text
//! courier-core → MailTransport → SES → recipient
//!                     ↑
//!               MockTransport (tests)
//! ```

pub mod transport;
pub mod types;

pub use transport::{
    build_mime_message, fetch_remote_images, MailTransport, MockTransport, SesMailer,
    TransportError,
};
pub use types::{
    sender_address, DeliveryReceipt, EmailAttachment, OutboundEmail, ValidationError,
};

/// Configuration for the gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Default "from" address when a job carries none
    pub default_from: String,

    /// SES configuration set for tracking
    pub configuration_set: Option<String>,

    /// Timeout for remote image fetches, seconds
    pub fetch_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_from: "Courier <noreply@courierlists.com>".to_string(),
            configuration_set: Some("courier-transactional".to_string()),
            fetch_timeout_secs: 10,
        }
    }
}

impl GatewayConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        Self {
            default_from: std::env::var("DEFAULT_FROM")
                .unwrap_or_else(|_| "Courier <noreply@courierlists.com>".to_string()),
            configuration_set: std::env::var("SES_CONFIGURATION_SET").ok(),
            fetch_timeout_secs: std::env::var("IMAGE_FETCH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        }
    }

    /// HTTP client for remote image fetching, honoring the fetch timeout.
    pub fn http_client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(self.fetch_timeout_secs))
            .build()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.default_from, "Courier <noreply@courierlists.com>");
        assert_eq!(config.fetch_timeout_secs, 10);
    }
}

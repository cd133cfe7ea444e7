//! Outgoing email.
//!
//! Implementations:
//! - [`SmtpMailer`]: lettre's async SMTP transport (STARTTLS relay, or plain
//!   SMTP for local catch-all relays)
//! - [`MockMailer`]: records messages in memory and can be told to fail
//!
//! Message bodies come from [`templates`].

mod mock;
mod smtp;
pub mod templates;
mod traits;

pub use mock::MockMailer;
pub use smtp::SmtpMailer;
pub use traits::Mailer;

use lettre::Address;

/// A plain-text message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Errors from building or delivering an email.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("Mail transport failed: {0}")]
    Transport(String),
}

/// Parses an email address, rejecting anything lettre cannot deliver to.
pub fn parse_address(raw: &str) -> Result<Address, MailError> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| MailError::InvalidAddress(format!("{raw}: {e}")))
}

/// Canonical form used for storing and comparing addresses.
///
/// Lettre keeps the case of the local part, but every mailbox this service
/// deals with is treated as case-insensitive.
pub fn normalize_address(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn test_parse_address() {
        let address = parse_address(" user@example.com ").expect("should parse");

        assert_eq!(address.domain(), "example.com");
        assert!(matches!(
            parse_address("not-an-email"),
            Err(MailError::InvalidAddress(_))
        ));
        assert!(matches!(parse_address(""), Err(MailError::InvalidAddress(_))));
    }
}

//! Message bodies.

use chrono::{DateTime, Utc};

use super::OutgoingEmail;

const PRODUCT_NAME: &str = "TiawPao";

/// The one-time passcode message.
pub fn otp_email(to: &str, code: &str, expires_at: DateTime<Utc>) -> OutgoingEmail {
    let minutes = (expires_at - Utc::now()).num_minutes().max(1);

    OutgoingEmail {
        to: to.to_owned(),
        subject: format!("{PRODUCT_NAME} verification code"),
        body: format!(
            "Hello,\n\n\
             Your {PRODUCT_NAME} verification code is:\n\n\
             {code}\n\n\
             The code expires in {minutes} minutes and can be used once.\n\n\
             If you did not request this code, you can ignore this email.\n"
        ),
    }
}

/// Sent after a successful registration.
pub fn welcome_email(to: &str, username: &str) -> OutgoingEmail {
    let greeting = if username.trim().is_empty() {
        "Hello".to_owned()
    } else {
        format!("Hello {username}")
    };

    OutgoingEmail {
        to: to.to_owned(),
        subject: format!("Welcome to {PRODUCT_NAME}"),
        body: format!(
            "{greeting},\n\n\
             Your {PRODUCT_NAME} account is ready. Start planning your next trip!\n"
        ),
    }
}

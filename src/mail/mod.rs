//! Email rendering and SMTP delivery.

mod render;
mod transport;

pub use self::render::{build_mail_html, load_template, DIGEST_SOURCE_LABEL, EMPTY_DIGEST_SUMMARY};
pub use self::transport::{build_message, MailTransport, SmtpMailer, PLAIN_TEXT_NOTICE};

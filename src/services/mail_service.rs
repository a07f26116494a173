//! Outgoing email for one-time codes and security alerts.
//!
//! Mail goes through a JSON email API when one is configured. Without one,
//! messages are written to the log so local development still works.
//!
//! Delivery failures are returned to the caller, which decides whether the
//! request can proceed.

use serde::Serialize;

use crate::{config::EmailConfig, error::AppError};

/// Mail transport selected at startup.
#[derive(Debug, Clone)]
pub enum Mailer {
    Http {
        client: reqwest::Client,
        config: EmailConfig,
    },
    Log,
}

/// Body sent to the email API.
#[derive(Debug, Serialize)]
struct OutgoingEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

/// A rendered message, ready for any transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
}

impl Mailer {
    pub fn from_config(config: Option<EmailConfig>) -> Result<Self, AppError> {
        match config {
            Some(config) => {
                let client = reqwest::Client::builder()
                    .timeout(std::time::Duration::from_secs(10))
                    .build()
                    .map_err(|e| AppError::Internal(format!("HTTP client error: {}", e)))?;
                Ok(Mailer::Http { client, config })
            }
            None => Ok(Mailer::Log),
        }
    }

    pub async fn send(&self, message: &EmailMessage) -> Result<(), AppError> {
        match self {
            Mailer::Http { client, config } => {
                let body = OutgoingEmail {
                    from: &config.from,
                    to: [&message.to],
                    subject: &message.subject,
                    text: &message.text,
                };

                let response = client
                    .post(&config.api_url)
                    .bearer_auth(&config.api_key)
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| AppError::Upstream(format!("Email request failed: {}", e)))?;

                if !response.status().is_success() {
                    return Err(AppError::Upstream(format!(
                        "Email API returned {}",
                        response.status()
                    )));
                }

                tracing::info!("Email '{}' sent to {}", message.subject, message.to);
                Ok(())
            }
            Mailer::Log => {
                tracing::warn!(
                    "No email API configured, message for {}:\n{}\n{}",
                    message.to,
                    message.subject,
                    message.text
                );
                Ok(())
            }
        }
    }

    pub async fn send_otp(
        &self,
        to: &str,
        first_name: &str,
        code: &str,
        ttl_minutes: i64,
    ) -> Result<(), AppError> {
        self.send(&otp_message(to, first_name, code, ttl_minutes))
            .await
    }

    pub async fn send_security_alert(
        &self,
        to: &str,
        anomaly_type: &str,
        description: &str,
        ip_address: Option<&str>,
    ) -> Result<(), AppError> {
        self.send(&alert_message(to, anomaly_type, description, ip_address))
            .await
    }
}

pub fn otp_message(to: &str, first_name: &str, code: &str, ttl_minutes: i64) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: "Your Rentverse verification code".to_string(),
        text: format!(
            "Hi {first_name},\n\n\
             Your verification code is {code}. It expires in {ttl_minutes} minutes.\n\n\
             If you did not try to sign in, change your password."
        ),
    }
}

pub fn alert_message(
    to: &str,
    anomaly_type: &str,
    description: &str,
    ip_address: Option<&str>,
) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: "Rentverse security alert".to_string(),
        text: format!(
            "We noticed unusual activity on your account.\n\n\
             Type: {anomaly_type}\n\
             Details: {description}\n\
             IP address: {}\n\n\
             If this was not you, change your password and contact support.",
            ip_address.unwrap_or("unknown")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_message_contains_code_and_expiry() {
        let message = otp_message("aina@example.com", "Aina", "042917", 5);
        assert_eq!(message.to, "aina@example.com");
        assert!(message.text.contains("042917"));
        assert!(message.text.contains("5 minutes"));
    }

    #[test]
    fn alert_without_ip_says_unknown() {
        let message = alert_message("a@example.com", "BRUTE_FORCE", "5 failed codes", None);
        assert!(message.text.contains("IP address: unknown"));
        assert!(message.text.contains("BRUTE_FORCE"));
    }

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        let mailer = Mailer::from_config(None).unwrap();
        assert!(matches!(mailer, Mailer::Log));
        mailer
            .send_otp("a@example.com", "A", "123456", 5)
            .await
            .unwrap();
    }
}

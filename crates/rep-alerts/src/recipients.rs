//! Who gets told about an alert.

use std::fmt;

use crate::config::RecipientsConfig;
use crate::error::Result;

/// Resolves the users and addresses that receive alert traffic.
pub trait RecipientResolver: Send + Sync + fmt::Debug {
    /// Users receiving in-app notifications for a new or upgraded alert.
    fn alert_users(&self) -> Result<Vec<String>>;

    /// Users receiving in-app escalation notifications.
    fn escalation_users(&self) -> Result<Vec<String>>;

    /// Addresses receiving alert email.
    fn alert_emails(&self) -> Result<Vec<String>>;

    /// Addresses receiving escalation email.
    fn escalation_emails(&self) -> Result<Vec<String>>;
}

/// Recipients taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticRecipients {
    config: RecipientsConfig,
}

impl StaticRecipients {
    /// Creates a resolver from configured lists.
    #[must_use]
    pub const fn new(config: RecipientsConfig) -> Self {
        Self { config }
    }

    /// Single-user, single-address resolver.
    #[must_use]
    pub fn single(user: impl Into<String>, email: impl Into<String>) -> Self {
        Self::new(RecipientsConfig {
            alert_users: vec![user.into()],
            alert_emails: vec![email.into()],
            ..RecipientsConfig::default()
        })
    }
}

fn or_fallback(primary: &[String], fallback: &[String]) -> Vec<String> {
    if primary.is_empty() {
        fallback.to_vec()
    } else {
        primary.to_vec()
    }
}

impl RecipientResolver for StaticRecipients {
    fn alert_users(&self) -> Result<Vec<String>> {
        Ok(self.config.alert_users.clone())
    }

    fn escalation_users(&self) -> Result<Vec<String>> {
        Ok(or_fallback(
            &self.config.escalation_users,
            &self.config.alert_users,
        ))
    }

    fn alert_emails(&self) -> Result<Vec<String>> {
        Ok(self.config.alert_emails.clone())
    }

    fn escalation_emails(&self) -> Result<Vec<String>> {
        Ok(or_fallback(
            &self.config.escalation_emails,
            &self.config.alert_emails,
        ))
    }
}

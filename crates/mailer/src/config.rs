//! Per-society sender configuration and its resolution.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use facteur_core::SocietyId;

use crate::error::MailerError;

/// Which transport the society's mail goes out through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailProvider {
    Smtp,
    /// Gmail via OAuth refresh token.
    Gmail,
}

/// Tenant-specific mail transport settings.
///
/// Secrets arrive already decrypted from the settings collaborator; this type
/// never persists them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderConfig {
    pub provider: MailProvider,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub secure: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub oauth_refresh_token: Option<String>,
    pub from_name: Option<String>,
    pub from_email: String,
}

impl SenderConfig {
    pub fn smtp(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        from_email: impl Into<String>,
    ) -> Self {
        Self {
            provider: MailProvider::Smtp,
            host: Some(host.into()),
            port: Some(port),
            secure: false,
            username: Some(username.into()),
            password: Some(password.into()),
            oauth_refresh_token: None,
            from_name: None,
            from_email: from_email.into(),
        }
    }

    pub fn gmail(refresh_token: impl Into<String>, from_email: impl Into<String>) -> Self {
        Self {
            provider: MailProvider::Gmail,
            host: None,
            port: None,
            secure: true,
            username: None,
            password: None,
            oauth_refresh_token: Some(refresh_token.into()),
            from_name: None,
            from_email: from_email.into(),
        }
    }

    pub fn with_from_name(mut self, name: impl Into<String>) -> Self {
        self.from_name = Some(name.into());
        self
    }

    /// RFC 5322 From header value: `Name <address>` or the bare address.
    pub fn from_header(&self) -> String {
        match &self.from_name {
            Some(name) if !name.trim().is_empty() => format!("{} <{}>", name, self.from_email),
            _ => self.from_email.clone(),
        }
    }

    /// Whether the configuration can plausibly deliver mail.
    pub fn validate(&self) -> Result<(), MailerError> {
        if self.from_email.trim().is_empty() {
            return Err(MailerError::NotConfigured("from address missing".into()));
        }
        match self.provider {
            MailProvider::Smtp => {
                if self.host.as_deref().is_none_or(|h| h.trim().is_empty())
                    && self.username.as_deref().is_none_or(|u| u.trim().is_empty())
                {
                    return Err(MailerError::NotConfigured(
                        "smtp host or user required".into(),
                    ));
                }
            }
            MailProvider::Gmail => {
                if self
                    .oauth_refresh_token
                    .as_deref()
                    .is_none_or(|t| t.trim().is_empty())
                {
                    return Err(MailerError::NotConfigured(
                        "gmail refresh token required".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Resolves the sender configuration for a society.
///
/// Backed by the society settings collaborator in production; secrets are
/// decrypted before they get here.
pub trait SenderConfigResolver: Send + Sync {
    fn resolve(&self, society_id: SocietyId) -> Result<SenderConfig, MailerError>;
}

/// In-memory resolver for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySenderConfigs {
    configs: RwLock<HashMap<SocietyId, SenderConfig>>,
}

impl InMemorySenderConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, society_id: SocietyId, config: SenderConfig) {
        self.configs.write().unwrap().insert(society_id, config);
    }
}

impl SenderConfigResolver for InMemorySenderConfigs {
    fn resolve(&self, society_id: SocietyId) -> Result<SenderConfig, MailerError> {
        let configs = self.configs.read().unwrap();
        let config = configs.get(&society_id).ok_or_else(|| {
            MailerError::NotConfigured(format!("no sender config for society {society_id}"))
        })?;
        config.validate()?;
        Ok(config.clone())
    }
}

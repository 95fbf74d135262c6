//! The service account this proxy impersonates.

use crate::error::ConfigError;
use std::fmt;

/// Target identity, fixed at startup and shared read-only by every request.
///
/// The name is usually a service account email, but any account identifier the
/// IAM Credentials API accepts works. It is handed to callers verbatim by the
/// `email` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpersonatedIdentity {
    name: String,
}

impl ImpersonatedIdentity {
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::MissingField("identity".into()));
        }
        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resource name used by the IAM Credentials API.
    pub fn resource_name(&self) -> String {
        format!("projects/-/serviceAccounts/{}", self.name)
    }
}

impl fmt::Display for ImpersonatedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

//! Addressing for the pubsub protocol: `local@domain/resource`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JidError {
    #[error("address has an empty domain")]
    EmptyDomain,
    #[error("address has an empty local part")]
    EmptyLocal,
    #[error("address has an empty resource")]
    EmptyResource,
}

/// A protocol address. The domain is mandatory; local part and resource are
/// optional (`domain`, `local@domain`, `local@domain/resource`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    local: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    /// A bare domain address, e.g. the pubsub service itself.
    pub fn domain(domain: impl Into<String>) -> Self {
        Self {
            local: None,
            domain: domain.into(),
            resource: None,
        }
    }

    pub fn with_local(mut self, local: impl Into<String>) -> Self {
        self.local = Some(local.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn local_part(&self) -> Option<&str> {
        self.local.as_deref()
    }

    pub fn domain_part(&self) -> &str {
        &self.domain
    }

    pub fn resource_part(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// The address without its resource.
    pub fn bare(&self) -> Jid {
        Jid {
            local: self.local.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (head, resource) = match raw.split_once('/') {
            Some((head, resource)) => {
                if resource.is_empty() {
                    return Err(JidError::EmptyResource);
                }
                (head, Some(resource.to_string()))
            }
            None => (raw, None),
        };
        let (local, domain) = match head.split_once('@') {
            Some((local, domain)) => {
                if local.is_empty() {
                    return Err(JidError::EmptyLocal);
                }
                (Some(local.to_string()), domain)
            }
            None => (None, head),
        };
        if domain.is_empty() {
            return Err(JidError::EmptyDomain);
        }
        Ok(Jid {
            local,
            domain: domain.to_string(),
            resource,
        })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(local) = &self.local {
            write!(f, "{local}@")?;
        }
        write!(f, "{}", self.domain)?;
        if let Some(resource) = &self.resource {
            write!(f, "/{resource}")?;
        }
        Ok(())
    }
}

impl Serialize for Jid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Jid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

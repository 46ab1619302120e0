//! Hierarchical names for fleet entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid entity path {0:?}: want owner/name")]
    Entity(String),

    #[error("invalid credential path {0:?}: want cloud/owner/name")]
    Credential(String),
}

/// Names a controller or a model: the owning user plus a name unique for that owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityPath {
    pub owner: String,
    pub name: String,
}

impl EntityPath {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for EntityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for EntityPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [owner, name] if !owner.is_empty() && !name.is_empty() => Ok(Self::new(*owner, *name)),
            _ => Err(PathError::Entity(s.to_string())),
        }
    }
}

/// Names a cloud credential. The owner segment is what access checks key on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CredentialPath {
    pub cloud: String,
    pub owner: String,
    pub name: String,
}

impl CredentialPath {
    pub fn new(cloud: impl Into<String>, owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cloud: cloud.into(),
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for CredentialPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.cloud, self.owner, self.name)
    }
}

impl FromStr for CredentialPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [cloud, owner, name] if parts.iter().all(|p| !p.is_empty()) => {
                Ok(Self::new(*cloud, *owner, *name))
            }
            _ => Err(PathError::Credential(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_path_display_and_parse() {
        let path = EntityPath::new("bob", "prod");
        assert_eq!(path.to_string(), "bob/prod");
        assert_eq!("bob/prod".parse::<EntityPath>().unwrap(), path);
    }

    #[test]
    fn test_entity_path_rejects_malformed() {
        for bad in ["", "bob", "bob/", "/prod", "a/b/c"] {
            assert!(bad.parse::<EntityPath>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_credential_path_roundtrip() {
        let path: CredentialPath = "aws/alice/cred1".parse().unwrap();
        assert_eq!(path.cloud, "aws");
        assert_eq!(path.owner, "alice");
        assert_eq!(path.name, "cred1");
        assert_eq!(path.to_string(), "aws/alice/cred1");
        assert!("aws/alice".parse::<CredentialPath>().is_err());
    }
}

//! Principals and access control lists.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Principal that matches every authenticated identity.
pub const EVERYONE: &str = "everyone";

/// An authenticated actor: a user name plus the groups it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    name: String,
    groups: BTreeSet<String>,
}

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: BTreeSet::new(),
        }
    }

    pub fn with_groups<I, G>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(String::as_str)
    }

    /// Reports whether this identity is, or belongs to, `principal`.
    pub fn is_member(&self, principal: &str) -> bool {
        principal == EVERYONE || principal == self.name || self.groups.contains(principal)
    }

    pub fn is_member_of_any<'a>(&self, principals: impl IntoIterator<Item = &'a String>) -> bool {
        principals.into_iter().any(|p| self.is_member(p))
    }
}

/// Ordered sets of principals allowed to read and write a resource.
///
/// Write access implies read access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    #[serde(default)]
    pub read: BTreeSet<String>,
    #[serde(default)]
    pub write: BTreeSet<String>,
}

impl Acl {
    pub fn with_read<I, P>(principals: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            read: principals.into_iter().map(Into::into).collect(),
            write: BTreeSet::new(),
        }
    }

    pub fn allows_read(&self, who: &Identity) -> bool {
        who.is_member_of_any(&self.read) || self.allows_write(who)
    }

    pub fn allows_write(&self, who: &Identity) -> bool {
        who.is_member_of_any(&self.write)
    }
}

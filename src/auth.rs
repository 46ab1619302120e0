/*!
 * Authorization policy
 *
 * FleetManager asks one question of its policy: may this identity perform
 * this action on this resource? The default [`AclAuthorizer`] answers from
 * ownership, the resource's ACL and membership of the controller-admin
 * group. Other policy engines plug in through [`Authorizer`].
 */

use corral_core_interface::{Acl, Identity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    /// Change ownership-level settings such as the ACL itself.
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Controller,
    Model,
    Credential,
    /// The fleet as a whole; used for operations like adding controllers.
    Fleet,
}

/// The facts about a resource that a policy needs.
#[derive(Debug, Clone)]
pub struct Resource<'a> {
    pub kind: ResourceKind,
    pub path: String,
    pub owner: &'a str,
    pub acl: &'a Acl,
}

pub trait Authorizer: Send + Sync + 'static {
    fn is_authorized(&self, actor: &Identity, resource: &Resource<'_>, action: Action) -> bool;
}

/// Owner, ACL member or controller-admin.
#[derive(Debug, Clone)]
pub struct AclAuthorizer {
    controller_admin: String,
}

impl AclAuthorizer {
    pub fn new(controller_admin: impl Into<String>) -> Self {
        Self {
            controller_admin: controller_admin.into(),
        }
    }
}

impl Authorizer for AclAuthorizer {
    fn is_authorized(&self, actor: &Identity, resource: &Resource<'_>, action: Action) -> bool {
        if actor.is_member(&self.controller_admin) {
            return true;
        }
        if resource.kind == ResourceKind::Fleet {
            return false;
        }
        if actor.is_member(resource.owner) {
            return true;
        }
        match action {
            Action::Read => resource.acl.allows_read(actor),
            Action::Write => resource.acl.allows_write(actor),
            Action::Admin => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource<'a>(owner: &'a str, acl: &'a Acl) -> Resource<'a> {
        Resource {
            kind: ResourceKind::Model,
            path: "bob/model".to_string(),
            owner,
            acl,
        }
    }

    #[test]
    fn test_read_gate() {
        let auth = AclAuthorizer::new("admins");
        let acl = Acl::with_read(["alice", "ops"]);
        let r = resource("bob", &acl);

        let cases = [
            (Identity::new("bob"), true),
            (Identity::new("alice"), true),
            (Identity::new("carol").with_groups(["ops"]), true),
            (Identity::new("root").with_groups(["admins"]), true),
            (Identity::new("mallory"), false),
        ];
        for (who, want) in cases {
            assert_eq!(
                auth.is_authorized(&who, &r, Action::Read),
                want,
                "read by {}",
                who.name()
            );
        }
    }

    #[test]
    fn test_read_acl_does_not_grant_write_or_admin() {
        let auth = AclAuthorizer::new("admins");
        let acl = Acl::with_read(["alice"]);
        let r = resource("bob", &acl);
        let alice = Identity::new("alice");
        assert!(!auth.is_authorized(&alice, &r, Action::Write));
        assert!(!auth.is_authorized(&alice, &r, Action::Admin));
        assert!(auth.is_authorized(&Identity::new("bob"), &r, Action::Admin));
    }

    #[test]
    fn test_group_owner() {
        let auth = AclAuthorizer::new("admins");
        let acl = Acl::default();
        let r = resource("team", &acl);
        let member = Identity::new("dave").with_groups(["team"]);
        assert!(auth.is_authorized(&member, &r, Action::Write));
    }

    #[test]
    fn test_fleet_requires_admin() {
        let auth = AclAuthorizer::new("admins");
        let acl = Acl::with_read(["everyone"]);
        let fleet = Resource {
            kind: ResourceKind::Fleet,
            path: String::new(),
            owner: "admins",
            acl: &acl,
        };
        assert!(!auth.is_authorized(&Identity::new("bob"), &fleet, Action::Write));
        let root = Identity::new("root").with_groups(["admins"]);
        assert!(auth.is_authorized(&root, &fleet, Action::Write));
    }
}

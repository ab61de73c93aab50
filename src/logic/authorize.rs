use sha2::{Digest, Sha256};

use crate::model::Caller;

/// Permission strings guarding write access to each resource family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ManageProducts,
    ManageCases,
    ManageTags,
    ManageEnvironments,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::ManageProducts => "core.manage_products",
            Permission::ManageCases => "library.manage_cases",
            Permission::ManageTags => "tags.manage_tags",
            Permission::ManageEnvironments => "environments.manage_environments",
        }
    }

    pub fn all() -> [Permission; 4] {
        [
            Permission::ManageProducts,
            Permission::ManageCases,
            Permission::ManageTags,
            Permission::ManageEnvironments,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// The caller did not identify itself
    Unauthenticated,
    /// The caller is known but lacks the permission
    Forbidden,
}

/// Capability check: may this caller exercise this permission?
pub trait Authorizer: Send + Sync {
    fn check(&self, caller: &Caller, permission: Permission) -> Decision;
}

/// Grants a permission to superusers and to users holding its string.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionAuthorizer;

impl Authorizer for PermissionAuthorizer {
    fn check(&self, caller: &Caller, permission: Permission) -> Decision {
        match &caller.user {
            None => Decision::Unauthenticated,
            Some(user) if user.has_permission(permission.as_str()) => Decision::Allow,
            Some(_) => Decision::Forbidden,
        }
    }
}

/// Hex SHA-256 digest under which API keys are stored.
pub fn digest_api_key(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::User;

    fn caller(permissions: &[Permission]) -> Caller {
        Caller::authenticated(User {
            id: 1,
            username: "tester".to_string(),
            permissions: permissions.iter().map(|p| p.as_str().to_string()).collect(),
            is_superuser: false,
        })
    }

    #[test]
    fn test_decisions() {
        let authorizer = PermissionAuthorizer;

        assert_eq!(
            authorizer.check(&Caller::anonymous(), Permission::ManageCases),
            Decision::Unauthenticated
        );
        assert_eq!(
            authorizer.check(&caller(&[Permission::ManageCases]), Permission::ManageCases),
            Decision::Allow
        );
        assert_eq!(
            authorizer.check(&caller(&[Permission::ManageTags]), Permission::ManageCases),
            Decision::Forbidden
        );
    }

    #[test]
    fn test_digest_is_stable_hex() {
        let digest = digest_api_key("secret");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, digest_api_key("secret"));
        assert_ne!(digest, digest_api_key("Secret"));
        assert_eq!(
            digest_api_key(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}

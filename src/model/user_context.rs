use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::model::Id;

/// An account that can hold API keys and permission strings such as
/// `library.manage_cases`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub permissions: BTreeSet<String>,
    pub is_superuser: bool,
}

impl User {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.is_superuser || self.permissions.contains(permission)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub username: String,
    pub permissions: BTreeSet<String>,
    pub is_superuser: bool,
}

/// Identity of the caller of one request, resolved from its API key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Caller {
    pub user: Option<User>,
}

impl Caller {
    /// A caller that supplied no credentials
    pub fn anonymous() -> Self {
        Self { user: None }
    }

    pub fn authenticated(user: User) -> Self {
        Self { user: Some(user) }
    }

    pub fn username(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.username.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superuser_holds_every_permission() {
        let user = User {
            id: 1,
            username: "admin".to_string(),
            permissions: BTreeSet::new(),
            is_superuser: true,
        };
        assert!(user.has_permission("library.manage_cases"));

        let plain = User {
            is_superuser: false,
            permissions: ["tags.manage_tags".to_string()].into_iter().collect(),
            ..user
        };
        assert!(plain.has_permission("tags.manage_tags"));
        assert!(!plain.has_permission("library.manage_cases"));
    }

    #[test]
    fn test_caller_username() {
        assert_eq!(Caller::anonymous().username(), None);
    }
}

use serde::{Deserialize, Serialize};

use crate::model::Id;

/// A label shared between case versions, optionally scoped to a product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub id: Id,
    pub name: String,
    pub description: String,
    /// Product the tag belongs to; `None` for global tags
    pub product_id: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTag {
    pub name: String,
    pub description: String,
    pub product_id: Option<Id>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TagFilter {
    pub name: Option<String>,
    pub product: Option<Id>,
}

impl TagFilter {
    pub fn matches(&self, tag: &Tag) -> bool {
        self.name.as_ref().map_or(true, |n| &tag.name == n)
            && self.product.map_or(true, |p| tag.product_id == Some(p))
    }
}

/// An execution environment case versions and product versions can be
/// linked to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    pub id: Id,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewEnvironment {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnvironmentFilter {
    pub name: Option<String>,
}

impl EnvironmentFilter {
    pub fn matches(&self, environment: &Environment) -> bool {
        self.name.as_ref().map_or(true, |n| &environment.name == n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_filter_by_product() {
        let global = Tag {
            id: 1,
            name: "smoke".to_string(),
            description: String::new(),
            product_id: None,
        };
        let scoped = Tag {
            product_id: Some(4),
            ..global.clone()
        };

        let filter = TagFilter {
            product: Some(4),
            ..Default::default()
        };
        assert!(!filter.matches(&global));
        assert!(filter.matches(&scoped));

        let by_name = TagFilter {
            name: Some("smoke".to_string()),
            ..Default::default()
        };
        assert!(by_name.matches(&global));
    }
}

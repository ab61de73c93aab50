use serde::{Deserialize, Serialize};
use std::fmt;

pub type Id = i64;

/// Mount point of every resource.
pub const API_PREFIX: &str = "/api/v1";

/// Resources addressable through `/api/v1/<name>/<id>/` uris.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Product,
    ProductVersion,
    ProductVersionEnvironments,
    Case,
    CaseVersion,
    CaseStep,
    CaseVersionSelection,
    Tag,
    Environment,
}

impl ResourceKind {
    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::Product => "product",
            ResourceKind::ProductVersion => "productversion",
            ResourceKind::ProductVersionEnvironments => "productversionenvironments",
            ResourceKind::Case => "case",
            ResourceKind::CaseVersion => "caseversion",
            ResourceKind::CaseStep => "casestep",
            ResourceKind::CaseVersionSelection => "caseversionselection",
            ResourceKind::Tag => "tag",
            ResourceKind::Environment => "environment",
        }
    }

    pub fn list_uri(self) -> String {
        format!("{}/{}/", API_PREFIX, self.name())
    }

    pub fn detail_uri(self, id: Id) -> String {
        format!("{}/{}/{}/", API_PREFIX, self.name(), id)
    }

    /// Extract the id from a detail uri of this kind.
    ///
    /// Accepts `/api/v1/<name>/<id>/` with or without the trailing slash,
    /// and a bare positive id.
    pub fn parse_uri(self, value: &str) -> Option<Id> {
        let value = value.trim();
        if let Ok(id) = value.parse::<Id>() {
            return (id > 0).then_some(id);
        }

        let rest = value
            .strip_prefix(API_PREFIX)?
            .strip_prefix('/')?
            .strip_prefix(self.name())?
            .strip_prefix('/')?;
        let id = rest.strip_suffix('/').unwrap_or(rest);
        id.parse::<Id>().ok().filter(|id| *id > 0)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

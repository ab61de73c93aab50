use crate::logic::{LinkDiff, StepDescriptor};
use crate::model::Id;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A logical test case. Its content lives in its case versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: Id,
    pub product_id: Id,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCase {
    pub product_id: Id,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CaseFilter {
    pub product: Option<Id>,
}

impl CaseFilter {
    pub fn matches(&self, case: &Case) -> bool {
        self.product.map_or(true, |p| case.product_id == p)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseVersionStatus {
    #[default]
    Draft,
    Active,
    Disabled,
}

impl CaseVersionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseVersionStatus::Draft => "draft",
            CaseVersionStatus::Active => "active",
            CaseVersionStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for CaseVersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaseVersionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CaseVersionStatus::Draft),
            "active" => Ok(CaseVersionStatus::Active),
            "disabled" => Ok(CaseVersionStatus::Disabled),
            _ => Err(format!("Unknown case version status: {}", s)),
        }
    }
}

/// One numbered instruction of a case version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseStep {
    pub id: Id,
    pub caseversion_id: Id,
    pub number: i32,
    pub instruction: String,
    pub expected: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCaseStep {
    pub number: i32,
    pub instruction: String,
    pub expected: String,
}

/// A case version with its steps (ordered by number) and link ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseVersion {
    pub id: Id,
    pub case_id: Id,
    pub productversion_id: Id,
    pub name: String,
    pub description: String,
    pub status: CaseVersionStatus,
    pub created_by: Option<String>,
    pub steps: Vec<CaseStep>,
    pub tag_ids: Vec<Id>,
    pub environment_ids: Vec<Id>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCaseVersion {
    pub case_id: Id,
    pub productversion_id: Id,
    pub name: String,
    pub description: String,
    pub status: CaseVersionStatus,
    pub created_by: Option<String>,
    pub steps: Vec<NewCaseStep>,
    pub tag_ids: Vec<Id>,
    pub environment_ids: Vec<Id>,
}

/// Everything a PUT changes on a case version, applied atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseVersionUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<CaseVersionStatus>,
    /// Desired step list, reconciled against the stored steps inside the
    /// write; `None` keeps the steps
    pub steps: Option<Vec<StepDescriptor>>,
    pub tags: Option<LinkDiff>,
    pub environments: Option<LinkDiff>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CaseVersionFilter {
    pub name: Option<String>,
    pub status: Option<CaseVersionStatus>,
    pub case: Option<Id>,
    pub productversion: Option<Id>,
    #[serde(rename = "productversion__product")]
    pub product: Option<Id>,
    pub tags: Option<Id>,
    pub environments: Option<Id>,
}

impl CaseVersionFilter {
    /// `product_id` is the product of the case version's productversion.
    pub fn matches(&self, caseversion: &CaseVersion, product_id: Id) -> bool {
        self.name.as_ref().map_or(true, |n| &caseversion.name == n)
            && self.status.map_or(true, |s| caseversion.status == s)
            && self.case.map_or(true, |c| caseversion.case_id == c)
            && self
                .productversion
                .map_or(true, |pv| caseversion.productversion_id == pv)
            && self.product.map_or(true, |p| product_id == p)
            && self.tags.map_or(true, |t| caseversion.tag_ids.contains(&t))
            && self
                .environments
                .map_or(true, |e| caseversion.environment_ids.contains(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caseversion() -> CaseVersion {
        CaseVersion {
            id: 7,
            case_id: 3,
            productversion_id: 2,
            name: "Login".to_string(),
            description: String::new(),
            status: CaseVersionStatus::Active,
            created_by: None,
            steps: Vec::new(),
            tag_ids: vec![11, 12],
            environment_ids: vec![],
        }
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("active".parse::<CaseVersionStatus>(), Ok(CaseVersionStatus::Active));
        assert!("Active".parse::<CaseVersionStatus>().is_err());
        assert_eq!(CaseVersionStatus::default().as_str(), "draft");
    }

    #[test]
    fn test_filter_matches_links_and_product() {
        let cv = caseversion();
        let by_tag = CaseVersionFilter {
            tags: Some(12),
            ..Default::default()
        };
        assert!(by_tag.matches(&cv, 1));

        let by_other_tag = CaseVersionFilter {
            tags: Some(13),
            ..Default::default()
        };
        assert!(!by_other_tag.matches(&cv, 1));

        let by_product = CaseVersionFilter {
            product: Some(9),
            status: Some(CaseVersionStatus::Active),
            ..Default::default()
        };
        assert!(by_product.matches(&cv, 9));
        assert!(!by_product.matches(&cv, 1));
    }
}

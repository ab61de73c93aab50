use crate::model::{CaseVersionStatus, Id, ProductVersion, Tag};
use serde::{Deserialize, Serialize};

/// Denormalized row of the case version selection view: a case version
/// joined with its product version, product and fully loaded tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseVersionSelection {
    pub id: Id,
    pub name: String,
    pub case_id: Id,
    pub status: CaseVersionStatus,
    pub created_by: Option<String>,
    /// True for the newest case version of its case
    pub latest: bool,
    pub product_id: Id,
    pub product_name: String,
    pub productversion: ProductVersion,
    pub tags: Vec<Tag>,
}

impl CaseVersionSelection {
    pub fn productversion_name(&self) -> String {
        self.productversion.display_name(&self.product_name)
    }
}

/// Filters of the selection view. `tags` keeps rows linked to the tag
/// (included), `tags__ne` keeps rows not linked to it (available).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SelectionFilter {
    pub name: Option<String>,
    pub status: Option<CaseVersionStatus>,
    pub case: Option<Id>,
    pub productversion: Option<Id>,
    #[serde(rename = "productversion__product")]
    pub product: Option<Id>,
    pub tags: Option<Id>,
    #[serde(rename = "tags__ne")]
    pub tags_ne: Option<Id>,
}

impl SelectionFilter {
    pub fn matches(&self, row: &CaseVersionSelection) -> bool {
        let linked = |tag_id: Id| row.tags.iter().any(|t| t.id == tag_id);

        self.name.as_ref().map_or(true, |n| &row.name == n)
            && self.status.map_or(true, |s| row.status == s)
            && self.case.map_or(true, |c| row.case_id == c)
            && self
                .productversion
                .map_or(true, |pv| row.productversion.id == pv)
            && self.product.map_or(true, |p| row.product_id == p)
            && self.tags.map_or(true, linked)
            && self.tags_ne.map_or(true, |t| !linked(t))
    }
}

use crate::logic::LinkDiff;
use crate::model::Id;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Id,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
}

/// Scalar changes for a product; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductVersion {
    pub id: Id,
    pub product_id: Id,
    pub version: String,
    pub codename: String,
}

impl ProductVersion {
    /// Display name, e.g. `Firefox 12.0`.
    pub fn display_name(&self, product_name: &str) -> String {
        format!("{} {}", product_name, self.version)
    }
}

/// Version descriptor nested in a product payload. Product writes
/// get-or-create these on `(product, version, codename)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVersionSpec {
    pub version: String,
    #[serde(default)]
    pub codename: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProductVersion {
    pub product_id: Id,
    pub version: String,
    pub codename: String,
    pub environment_ids: Vec<Id>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductVersionUpdate {
    pub version: Option<String>,
    pub codename: Option<String>,
    pub environments: Option<LinkDiff>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProductFilter {
    pub name: Option<String>,
}

impl ProductFilter {
    pub fn matches(&self, product: &Product) -> bool {
        self.name.as_ref().map_or(true, |name| &product.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProductVersionFilter {
    pub version: Option<String>,
    pub product: Option<Id>,
    #[serde(rename = "product__name")]
    pub product_name: Option<String>,
}

impl ProductVersionFilter {
    pub fn for_product(product_id: Id) -> Self {
        Self {
            product: Some(product_id),
            ..Default::default()
        }
    }

    /// `product_name` is the name of the version's owning product.
    pub fn matches(&self, productversion: &ProductVersion, product_name: &str) -> bool {
        self.version
            .as_ref()
            .map_or(true, |v| &productversion.version == v)
            && self.product.map_or(true, |p| productversion.product_id == p)
            && self.product_name.as_ref().map_or(true, |n| product_name == n)
    }
}

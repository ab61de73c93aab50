//! Wire representations of every resource.
//!
//! Ids are rendered as strings and references as detail uris. Request
//! payloads are deserialized from the raw body so that shape errors map to
//! the fixed validation messages instead of extractor rejections.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::logic::ValidationError;
use crate::model::{
    Case, CaseStep, CaseVersion, CaseVersionSelection, Environment, Id, PageRequest, Product,
    ProductVersion, ProductVersionSpec, ResourceKind, Tag,
};

/// Decode a request body that has to be a JSON object.
pub fn parse_payload<T: DeserializeOwned>(kind: ResourceKind, body: &[u8]) -> Result<T, ValidationError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| ValidationError::NotAnObject)?;
    if !value.is_object() {
        return Err(ValidationError::NotAnObject);
    }
    serde_json::from_value(value).map_err(|e| ValidationError::MalformedPayload {
        kind,
        message: e.to_string(),
    })
}

// Requests

#[derive(Debug, Default, Deserialize)]
pub struct ProductPayload {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub productversions: Vec<ProductVersionSpec>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductVersionPayload {
    pub product: Option<String>,
    pub version: Option<String>,
    pub codename: Option<String>,
    pub environments: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CasePayload {
    pub product: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CaseVersionPayload {
    pub case: Option<String>,
    pub productversion: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    /// Kept raw; its shape is checked before anything else
    pub steps: Option<Value>,
    pub tags: Option<Vec<String>>,
    pub environments: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TagPayload {
    pub name: Option<String>,
    pub description: Option<String>,
    pub product: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EnvironmentPayload {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// `limit` / `offset` query parameters of list endpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

// Responses

#[derive(Debug, Serialize, Deserialize)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    pub productversions: Vec<ProductVersionResponse>,
    pub resource_uri: String,
}

impl ProductResponse {
    pub fn new(product: &Product, productversions: &[ProductVersion]) -> Self {
        Self {
            id: product.id.to_string(),
            name: product.name.clone(),
            description: product.description.clone(),
            productversions: productversions.iter().map(ProductVersionResponse::from).collect(),
            resource_uri: ResourceKind::Product.detail_uri(product.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductVersionResponse {
    pub codename: String,
    pub id: String,
    pub product: String,
    pub resource_uri: String,
    pub version: String,
}

impl From<&ProductVersion> for ProductVersionResponse {
    fn from(pv: &ProductVersion) -> Self {
        Self {
            codename: pv.codename.clone(),
            id: pv.id.to_string(),
            product: ResourceKind::Product.detail_uri(pv.product_id),
            resource_uri: ResourceKind::ProductVersion.detail_uri(pv.id),
            version: pv.version.clone(),
        }
    }
}

/// Product version with its environments expanded.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProductVersionEnvironmentsResponse {
    pub id: String,
    pub version: String,
    pub codename: String,
    pub environments: Vec<EnvironmentResponse>,
    pub resource_uri: String,
}

impl ProductVersionEnvironmentsResponse {
    pub fn new(pv: &ProductVersion, environments: &[Environment]) -> Self {
        Self {
            id: pv.id.to_string(),
            version: pv.version.clone(),
            codename: pv.codename.clone(),
            environments: environments.iter().map(EnvironmentResponse::from).collect(),
            resource_uri: ResourceKind::ProductVersionEnvironments.detail_uri(pv.id),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaseResponse {
    pub id: String,
    pub product: String,
    pub resource_uri: String,
}

impl From<&Case> for CaseResponse {
    fn from(case: &Case) -> Self {
        Self {
            id: case.id.to_string(),
            product: ResourceKind::Product.detail_uri(case.product_id),
            resource_uri: ResourceKind::Case.detail_uri(case.id),
        }
    }
}

/// A step as nested inside its case version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedStepResponse {
    pub number: i32,
    pub instruction: String,
    pub expected: String,
    pub resource_uri: String,
}

impl From<&CaseStep> for NestedStepResponse {
    fn from(step: &CaseStep) -> Self {
        Self {
            number: step.number,
            instruction: step.instruction.clone(),
            expected: step.expected.clone(),
            resource_uri: ResourceKind::CaseStep.detail_uri(step.id),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaseStepResponse {
    pub id: String,
    pub caseversion: String,
    pub number: i32,
    pub instruction: String,
    pub expected: String,
    pub resource_uri: String,
}

impl From<&CaseStep> for CaseStepResponse {
    fn from(step: &CaseStep) -> Self {
        Self {
            id: step.id.to_string(),
            caseversion: ResourceKind::CaseVersion.detail_uri(step.caseversion_id),
            number: step.number,
            instruction: step.instruction.clone(),
            expected: step.expected.clone(),
            resource_uri: ResourceKind::CaseStep.detail_uri(step.id),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaseVersionResponse {
    pub id: String,
    pub case: String,
    pub productversion: String,
    pub name: String,
    pub description: String,
    pub status: String,
    pub steps: Vec<NestedStepResponse>,
    pub tags: Vec<String>,
    pub environments: Vec<String>,
    pub resource_uri: String,
}

impl From<&CaseVersion> for CaseVersionResponse {
    fn from(cv: &CaseVersion) -> Self {
        Self {
            id: cv.id.to_string(),
            case: ResourceKind::Case.detail_uri(cv.case_id),
            productversion: ResourceKind::ProductVersion.detail_uri(cv.productversion_id),
            name: cv.name.clone(),
            description: cv.description.clone(),
            status: cv.status.to_string(),
            steps: cv.steps.iter().map(NestedStepResponse::from).collect(),
            tags: uris(ResourceKind::Tag, &cv.tag_ids),
            environments: uris(ResourceKind::Environment, &cv.environment_ids),
            resource_uri: ResourceKind::CaseVersion.detail_uri(cv.id),
        }
    }
}

fn uris(kind: ResourceKind, ids: &[Id]) -> Vec<String> {
    ids.iter().map(|id| kind.detail_uri(*id)).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagResponse {
    pub description: String,
    pub id: String,
    pub name: String,
    pub product: Option<String>,
    pub resource_uri: String,
}

impl From<&Tag> for TagResponse {
    fn from(tag: &Tag) -> Self {
        Self {
            description: tag.description.clone(),
            id: tag.id.to_string(),
            name: tag.name.clone(),
            product: tag.product_id.map(|p| ResourceKind::Product.detail_uri(p)),
            resource_uri: ResourceKind::Tag.detail_uri(tag.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    pub resource_uri: String,
}

impl From<&Environment> for EnvironmentResponse {
    fn from(environment: &Environment) -> Self {
        Self {
            id: environment.id.to_string(),
            name: environment.name.clone(),
            description: environment.description.clone(),
            resource_uri: ResourceKind::Environment.detail_uri(environment.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResponse {
    pub case: String,
    pub case_id: String,
    pub created_by: Option<String>,
    pub id: String,
    pub latest: bool,
    pub name: String,
    pub product: ProductRef,
    pub product_id: String,
    pub productversion: ProductVersionResponse,
    pub productversion_name: String,
    pub resource_uri: String,
    pub tags: Vec<TagResponse>,
}

impl From<&CaseVersionSelection> for SelectionResponse {
    fn from(row: &CaseVersionSelection) -> Self {
        Self {
            case: ResourceKind::Case.detail_uri(row.case_id),
            case_id: row.case_id.to_string(),
            created_by: row.created_by.clone(),
            id: row.id.to_string(),
            latest: row.latest,
            name: row.name.clone(),
            product: ProductRef {
                id: row.product_id.to_string(),
            },
            product_id: row.product_id.to_string(),
            productversion: ProductVersionResponse::from(&row.productversion),
            productversion_name: row.productversion_name(),
            resource_uri: ResourceKind::CaseVersionSelection.detail_uri(row.id),
            tags: row.tags.iter().map(TagResponse::from).collect(),
        }
    }
}

// Lists

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListMeta {
    pub limit: usize,
    pub next: Option<String>,
    pub offset: usize,
    pub previous: Option<String>,
    pub total_count: usize,
}

impl ListMeta {
    /// `raw_query` is the request's query string; its parameters other than
    /// `limit` and `offset` are carried into the `next`/`previous` links.
    pub fn new(kind: ResourceKind, raw_query: Option<&str>, page: PageRequest, total_count: usize) -> Self {
        let kept: Vec<&str> = raw_query
            .unwrap_or_default()
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter(|pair| {
                let key = pair.split('=').next().unwrap_or_default();
                key != "limit" && key != "offset"
            })
            .collect();
        let link = |offset: usize| {
            let mut params: Vec<String> = kept.iter().map(|pair| pair.to_string()).collect();
            params.push(format!("limit={}&offset={}", page.limit, offset));
            format!("{}?{}", kind.list_uri(), params.join("&"))
        };

        let end = page.offset.saturating_add(page.limit);
        Self {
            limit: page.limit,
            next: (end < total_count).then(|| link(end)),
            offset: page.offset,
            previous: (page.offset > 0).then(|| link(page.offset.saturating_sub(page.limit))),
            total_count,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub meta: ListMeta,
    pub objects: Vec<T>,
}

use serde::Deserialize;
use serde_json::Value;

use crate::logic::StepDescriptor;
use crate::model::{Case, CaseVersion, CaseVersionStatus, Id, ProductVersion, ResourceKind};

/// Rejection of a write, detected before anything is mutated.
///
/// The `Display` text is the exact body of the 400 response; clients match
/// on these strings, so they must not change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("'steps' must be a list containing at least one dict or resource uri.")]
    StepsRequired,
    #[error("productversion must match case's product")]
    ProductMismatch,
    #[error("productversion of an existing caseversion may not be changed.")]
    ProductVersionChanged,
    #[error("case of an existing caseversion may not be changed.")]
    CaseChanged,
    #[error("product of an existing productversion may not be changed.")]
    ProductChanged,
    #[error("'{0}' is required.")]
    MissingField(&'static str),
    #[error("'{value}' is not a valid {kind} uri.")]
    InvalidUri { value: String, kind: ResourceKind },
    #[error("'{0}' is not a valid status.")]
    InvalidStatus(String),
    #[error("step number {0} must be 1 or greater.")]
    InvalidStepNumber(i32),
    #[error("step number {0} appears more than once.")]
    DuplicateStepNumber(i32),
    #[error("casestep {0} does not belong to this caseversion.")]
    ForeignStep(String),
    #[error("casestep {0} is listed more than once.")]
    DuplicateStepReference(String),
    #[error("request body must be a JSON object.")]
    NotAnObject,
    #[error("invalid {kind} payload: {message}")]
    MalformedPayload { kind: ResourceKind, message: String },
}

/// Step object as it appears inside a `steps` list.
#[derive(Debug, Deserialize)]
struct StepObject {
    number: Option<i32>,
    instruction: Option<String>,
    expected: Option<String>,
    resource_uri: Option<String>,
}

/// Check the shape of the raw `steps` value and turn it into descriptors.
///
/// `steps` has to be a non-empty list whose items are step objects or step
/// resource uris. Anything else, including objects with wrongly typed
/// fields, is `StepsRequired`.
pub fn parse_steps(steps: Option<&Value>) -> Result<Vec<StepDescriptor>, ValidationError> {
    let Some(Value::Array(items)) = steps else {
        return Err(ValidationError::StepsRequired);
    };
    if items.is_empty() {
        return Err(ValidationError::StepsRequired);
    }

    items.iter().map(parse_step).collect()
}

fn parse_step(item: &Value) -> Result<StepDescriptor, ValidationError> {
    match item {
        Value::String(uri) => Ok(StepDescriptor::reference(parse_ref(
            ResourceKind::CaseStep,
            uri,
        )?)),
        Value::Object(_) => {
            let object = StepObject::deserialize(item).map_err(|_| ValidationError::StepsRequired)?;
            let id = object
                .resource_uri
                .as_deref()
                .map(|uri| parse_ref(ResourceKind::CaseStep, uri))
                .transpose()?;

            Ok(StepDescriptor {
                id,
                number: object.number,
                instruction: object.instruction,
                expected: object.expected,
            })
        }
        _ => Err(ValidationError::StepsRequired),
    }
}

/// Resolve a resource uri of the given kind to an id.
pub fn parse_ref(kind: ResourceKind, value: &str) -> Result<Id, ValidationError> {
    kind.parse_uri(value)
        .ok_or_else(|| ValidationError::InvalidUri {
            value: value.to_string(),
            kind,
        })
}

pub fn parse_refs(kind: ResourceKind, values: &[String]) -> Result<Vec<Id>, ValidationError> {
    values.iter().map(|v| parse_ref(kind, v)).collect()
}

pub fn parse_status(value: &str) -> Result<CaseVersionStatus, ValidationError> {
    value
        .parse()
        .map_err(|_| ValidationError::InvalidStatus(value.to_string()))
}

pub fn require<T>(value: Option<T>, field: &'static str) -> Result<T, ValidationError> {
    value.ok_or(ValidationError::MissingField(field))
}

/// A new case version's productversion has to belong to its case's product.
pub fn check_product_match(
    case: &Case,
    productversion: &ProductVersion,
) -> Result<(), ValidationError> {
    if productversion.product_id != case.product_id {
        return Err(ValidationError::ProductMismatch);
    }
    Ok(())
}

/// `case` and `productversion` are create-only. `None` means the request
/// left the field out, which is never an error.
pub fn check_caseversion_refs_unchanged(
    stored: &CaseVersion,
    case_id: Option<Id>,
    productversion_id: Option<Id>,
) -> Result<(), ValidationError> {
    if productversion_id.is_some_and(|pv| pv != stored.productversion_id) {
        return Err(ValidationError::ProductVersionChanged);
    }
    if case_id.is_some_and(|c| c != stored.case_id) {
        return Err(ValidationError::CaseChanged);
    }
    Ok(())
}

pub fn check_productversion_product_unchanged(
    stored: &ProductVersion,
    product_id: Option<Id>,
) -> Result<(), ValidationError> {
    if product_id.is_some_and(|p| p != stored.product_id) {
        return Err(ValidationError::ProductChanged);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STEPS_MESSAGE: &str =
        "'steps' must be a list containing at least one dict or resource uri.";

    fn stored_caseversion() -> CaseVersion {
        CaseVersion {
            id: 1,
            case_id: 10,
            productversion_id: 20,
            name: "cv".to_string(),
            description: String::new(),
            status: CaseVersionStatus::Draft,
            created_by: None,
            steps: Vec::new(),
            tag_ids: Vec::new(),
            environment_ids: Vec::new(),
        }
    }

    #[test]
    fn test_steps_shape_messages() {
        let missing = parse_steps(None).unwrap_err();
        assert_eq!(missing.to_string(), STEPS_MESSAGE);

        let single = json!({"number": 1, "instruction": "i", "expected": "e"});
        assert_eq!(parse_steps(Some(&single)), Err(ValidationError::StepsRequired));
        assert_eq!(parse_steps(Some(&json!([]))), Err(ValidationError::StepsRequired));
        assert_eq!(parse_steps(Some(&json!(null))), Err(ValidationError::StepsRequired));
        assert_eq!(parse_steps(Some(&json!([1, 2]))), Err(ValidationError::StepsRequired));
        assert_eq!(
            parse_steps(Some(&json!([{"number": "one"}]))),
            Err(ValidationError::StepsRequired)
        );
    }

    #[test]
    fn test_steps_accept_objects_and_uris() {
        let steps = json!([
            {"number": 1, "instruction": "i1", "expected": "e1"},
            "/api/v1/casestep/7/",
            {"number": 3, "instruction": "i3", "resource_uri": "/api/v1/casestep/8/"}
        ]);
        let parsed = parse_steps(Some(&steps)).unwrap();

        assert_eq!(parsed[0], StepDescriptor::new(1, "i1", "e1"));
        assert_eq!(parsed[1], StepDescriptor::reference(7));
        assert_eq!(parsed[2].id, Some(8));
        assert_eq!(parsed[2].expected, None);
    }

    #[test]
    fn test_step_uri_of_wrong_kind() {
        let steps = json!(["/api/v1/tag/7/"]);
        assert_eq!(
            parse_steps(Some(&steps)).unwrap_err().to_string(),
            "'/api/v1/tag/7/' is not a valid casestep uri."
        );
    }

    #[test]
    fn test_product_match() {
        let case = Case { id: 1, product_id: 5 };
        let mut pv = ProductVersion {
            id: 2,
            product_id: 5,
            version: "1.0".to_string(),
            codename: String::new(),
        };
        assert!(check_product_match(&case, &pv).is_ok());

        pv.product_id = 6;
        assert_eq!(
            check_product_match(&case, &pv).unwrap_err().to_string(),
            "productversion must match case's product"
        );
    }

    #[test]
    fn test_create_only_refs() {
        let stored = stored_caseversion();

        assert!(check_caseversion_refs_unchanged(&stored, None, None).is_ok());
        assert!(check_caseversion_refs_unchanged(&stored, Some(10), Some(20)).is_ok());
        assert_eq!(
            check_caseversion_refs_unchanged(&stored, Some(10), Some(21))
                .unwrap_err()
                .to_string(),
            "productversion of an existing caseversion may not be changed."
        );
        assert_eq!(
            check_caseversion_refs_unchanged(&stored, Some(11), None)
                .unwrap_err()
                .to_string(),
            "case of an existing caseversion may not be changed."
        );
        // productversion is reported first when both change
        assert_eq!(
            check_caseversion_refs_unchanged(&stored, Some(11), Some(21)),
            Err(ValidationError::ProductVersionChanged)
        );
    }

    #[test]
    fn test_status_and_required() {
        assert_eq!(parse_status("active"), Ok(CaseVersionStatus::Active));
        assert_eq!(
            parse_status("finished").unwrap_err().to_string(),
            "'finished' is not a valid status."
        );
        assert_eq!(
            require::<String>(None, "name").unwrap_err().to_string(),
            "'name' is required."
        );
    }
}

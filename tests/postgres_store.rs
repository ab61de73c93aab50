//! Store tests against a live PostgreSQL database.
//!
//! Run with `DATABASE_URL=postgres://... cargo test -- --ignored`.

use case_library::logic::{diff_links, digest_api_key, StepDescriptor};
use case_library::store::traits::*;
use case_library::{
    Case, CaseVersion, CaseVersionStatus, CaseVersionUpdate, NewCase, NewCaseStep,
    NewCaseVersion, NewProduct, NewTag, NewUser, PostgresStore, ProductUpdate, ProductVersion,
    ProductVersionFilter, ProductVersionSpec, PageRequest,
};

async fn connect() -> PostgresStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PostgresStore::new(&url, 5).await.unwrap();
    store.migrate().await.unwrap();
    store
}

fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

/// A product with version `1.0`, a case and a two-step case version.
async fn fixture(store: &PostgresStore) -> (ProductVersion, Case, CaseVersion) {
    let product = store
        .create_product(
            NewProduct {
                name: unique("product"),
                description: String::new(),
            },
            vec![ProductVersionSpec {
                version: "1.0".to_string(),
                codename: String::new(),
            }],
        )
        .await
        .unwrap();
    let pv = store
        .list_productversions(&ProductVersionFilter::for_product(product.id), PageRequest::all())
        .await
        .unwrap()
        .items
        .remove(0);
    let case = store
        .create_case(NewCase {
            product_id: product.id,
        })
        .await
        .unwrap();
    let cv = store
        .create_caseversion(NewCaseVersion {
            case_id: case.id,
            productversion_id: pv.id,
            name: "original".to_string(),
            description: "kept".to_string(),
            status: CaseVersionStatus::Draft,
            created_by: None,
            steps: (1..=2)
                .map(|n| NewCaseStep {
                    number: n,
                    instruction: format!("instruction {}", n),
                    expected: format!("expected {}", n),
                })
                .collect(),
            tag_ids: vec![],
            environment_ids: vec![],
        })
        .await
        .unwrap();
    (pv, case, cv)
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_swapping_step_numbers_in_one_update() {
    let store = connect().await;
    let (_, _, cv) = fixture(&store).await;

    let desired = vec![
        StepDescriptor {
            id: Some(cv.steps[1].id),
            number: Some(1),
            ..Default::default()
        },
        StepDescriptor {
            id: Some(cv.steps[0].id),
            number: Some(2),
            ..Default::default()
        },
    ];
    let updated = store
        .update_caseversion(
            cv.id,
            CaseVersionUpdate {
                steps: Some(desired),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.steps[0].id, cv.steps[1].id);
    assert_eq!(updated.steps[0].number, 1);
    assert_eq!(updated.steps[0].instruction, "instruction 2");
    assert_eq!(updated.steps[1].id, cv.steps[0].id);
    assert_eq!(updated.steps[1].number, 2);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_update_keeps_omitted_fields_and_diffs_links() {
    let store = connect().await;
    let (_, _, cv) = fixture(&store).await;
    let smoke = store
        .create_tag(NewTag {
            name: unique("smoke"),
            description: String::new(),
            product_id: None,
        })
        .await
        .unwrap();
    let slow = store
        .create_tag(NewTag {
            name: unique("slow"),
            description: String::new(),
            product_id: None,
        })
        .await
        .unwrap();

    let updated = store
        .update_caseversion(
            cv.id,
            CaseVersionUpdate {
                status: Some(CaseVersionStatus::Active),
                tags: Some(diff_links(&[], &[smoke.id, slow.id])),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.name, "original");
    assert_eq!(updated.description, "kept");
    assert_eq!(updated.status, CaseVersionStatus::Active);
    assert_eq!(updated.steps, cv.steps);
    assert_eq!(updated.tag_ids, vec![smoke.id, slow.id]);

    let updated = store
        .update_caseversion(
            cv.id,
            CaseVersionUpdate {
                tags: Some(diff_links(&updated.tag_ids, &[slow.id])),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.tag_ids, vec![slow.id]);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_failed_step_reconciliation_rolls_back() {
    let store = connect().await;
    let (_, _, cv) = fixture(&store).await;
    let (_, _, other) = fixture(&store).await;

    let result = store
        .update_caseversion(
            cv.id,
            CaseVersionUpdate {
                name: Some("renamed".to_string()),
                steps: Some(vec![StepDescriptor::reference(other.steps[0].id)]),
                ..Default::default()
            },
        )
        .await;
    assert!(result.is_err());

    let stored = store.get_caseversion(cv.id).await.unwrap().unwrap();
    assert_eq!(stored.name, "original");
    assert_eq!(stored.steps, cv.steps);
    let untouched = store.get_caseversion(other.id).await.unwrap().unwrap();
    assert_eq!(untouched.steps, other.steps);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_product_versions_are_get_or_created() {
    let store = connect().await;
    let (pv, _, _) = fixture(&store).await;

    let spec = |version: &str| ProductVersionSpec {
        version: version.to_string(),
        codename: String::new(),
    };
    store
        .update_product(pv.product_id, ProductUpdate::default(), vec![spec("1.0"), spec("2.0")])
        .await
        .unwrap()
        .unwrap();

    let versions = store
        .list_productversions(&ProductVersionFilter::for_product(pv.product_id), PageRequest::all())
        .await
        .unwrap();
    let names: Vec<&str> = versions.items.iter().map(|v| v.version.as_str()).collect();
    assert_eq!(names, vec!["1.0", "2.0"]);
    assert_eq!(versions.items[0].id, pv.id);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_delete_product_cascades() {
    let store = connect().await;
    let (pv, case, cv) = fixture(&store).await;

    assert!(store.delete_product(pv.product_id).await.unwrap());
    assert!(store.get_productversion(pv.id).await.unwrap().is_none());
    assert!(store.get_case(case.id).await.unwrap().is_none());
    assert!(store.get_caseversion(cv.id).await.unwrap().is_none());
    assert!(store.get_casestep(cv.steps[0].id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_replace_api_keys_deactivates_old_keys() {
    let store = connect().await;
    let username = unique("admin");
    let user = store
        .upsert_user(NewUser {
            username: username.clone(),
            permissions: Default::default(),
            is_superuser: true,
        })
        .await
        .unwrap();
    let old = digest_api_key(&unique("old"));
    let new = digest_api_key(&unique("new"));

    store.add_api_key(user.id, &old).await.unwrap();
    store.replace_api_keys(user.id, &new).await.unwrap();

    assert!(store.find_user_by_api_key(&username, &old).await.unwrap().is_none());
    assert_eq!(
        store.find_user_by_api_key(&username, &new).await.unwrap().map(|u| u.id),
        Some(user.id)
    );
}

mod common;

use case_library::logic::Permission;
use case_library::{Case, Product, ProductVersion, ResourceKind};
use common::{id_from_uri, spawn_app, uri, TestApp};
use serde_json::{json, Value};

const STEPS_MESSAGE: &str = "'steps' must be a list containing at least one dict or resource uri.";

struct Fixture {
    product: Product,
    productversion: ProductVersion,
    case: Case,
}

async fn fixture(app: &TestApp) -> Fixture {
    let product = app.create_product("Firefox").await;
    let productversion = app.create_productversion(&product, "12.0").await;
    let case = app.create_case(&product).await;
    Fixture {
        product,
        productversion,
        case,
    }
}

fn new_caseversion(fixture: &Fixture, name: &str) -> Value {
    json!({
        "case": uri(ResourceKind::Case, fixture.case.id),
        "name": name,
        "description": format!("{} description", name),
        "productversion": uri(ResourceKind::ProductVersion, fixture.productversion.id),
        "status": "draft",
        "environments": [],
        "tags": [],
        "steps": [
            {"number": 1, "instruction": "instruction 1", "expected": "expected 1"},
            {"number": 2, "instruction": "instruction 2", "expected": "expected 2"}
        ]
    })
}

/// POST a case version and return its detail uri.
async fn create(app: &TestApp, payload: &Value) -> String {
    let response = app.post("/api/v1/caseversion/", payload).await;
    assert_eq!(response.status(), 201);
    response.headers()["location"].to_str().unwrap().to_string()
}

/// Steps as returned by the API, without their resource uris.
fn step_fields(caseversion: &Value) -> Vec<Value> {
    caseversion["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| json!({"number": s["number"], "instruction": s["instruction"], "expected": s["expected"]}))
        .collect()
}

fn step_uris(caseversion: &Value) -> Vec<String> {
    caseversion["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["resource_uri"].as_str().unwrap().to_string())
        .collect()
}

async fn expect_rejection(response: reqwest::Response, message: &str) {
    assert_eq!(response.status(), 400);
    assert_eq!(response.text().await.unwrap(), message);
}

#[tokio::test]
async fn test_create_and_read_back() {
    let app = spawn_app().await;
    let fixture = fixture(&app).await;
    let payload = new_caseversion(&fixture, "Open a tab");

    let location = create(&app, &payload).await;
    let id = id_from_uri(&location);
    let cv = app.get_json(&location).await;

    assert_eq!(cv["id"], id.to_string());
    assert_eq!(cv["name"], "Open a tab");
    assert_eq!(cv["case"], payload["case"]);
    assert_eq!(cv["productversion"], payload["productversion"]);
    assert_eq!(cv["status"], "draft");
    assert_eq!(cv["resource_uri"], format!("/api/v1/caseversion/{}/", id));
    assert_eq!(step_fields(&cv), payload["steps"].as_array().unwrap().clone());
    for step_uri in step_uris(&cv) {
        assert!(step_uri.starts_with("/api/v1/casestep/"));
        let step = app.get_json(&step_uri).await;
        assert_eq!(step["caseversion"], cv["resource_uri"]);
    }
}

#[tokio::test]
async fn test_steps_are_required_on_create() {
    let app = spawn_app().await;
    let fixture = fixture(&app).await;

    let mut payload = new_caseversion(&fixture, "no steps");
    payload["steps"] = json!([]);
    expect_rejection(app.post("/api/v1/caseversion/", &payload).await, STEPS_MESSAGE).await;

    payload.as_object_mut().unwrap().remove("steps");
    expect_rejection(app.post("/api/v1/caseversion/", &payload).await, STEPS_MESSAGE).await;

    payload["steps"] = json!({"number": 1, "instruction": "i", "expected": "e"});
    expect_rejection(app.post("/api/v1/caseversion/", &payload).await, STEPS_MESSAGE).await;

    let listed = app.get_json("/api/v1/caseversion/").await;
    assert_eq!(listed["meta"]["total_count"], 0);
}

#[tokio::test]
async fn test_steps_are_required_on_update() {
    let app = spawn_app().await;
    let fixture = fixture(&app).await;
    let mut payload = new_caseversion(&fixture, "cv");
    let location = create(&app, &payload).await;

    payload["steps"] = json!([]);
    expect_rejection(app.put(&location, &payload).await, STEPS_MESSAGE).await;

    let cv = app.get_json(&location).await;
    assert_eq!(step_fields(&cv).len(), 2);
}

#[tokio::test]
async fn test_productversion_must_match_case_product() {
    let app = spawn_app().await;
    let fixture = fixture(&app).await;
    let other_product = app.create_product("Thunderbird").await;
    let other_version = app.create_productversion(&other_product, "3.0").await;

    let mut payload = new_caseversion(&fixture, "mismatch");
    payload["productversion"] = json!(uri(ResourceKind::ProductVersion, other_version.id));

    expect_rejection(
        app.post("/api/v1/caseversion/", &payload).await,
        "productversion must match case's product",
    )
    .await;
}

#[tokio::test]
async fn test_case_and_productversion_are_create_only() {
    let app = spawn_app().await;
    let fixture = fixture(&app).await;
    let mut payload = new_caseversion(&fixture, "immutable");
    let location = create(&app, &payload).await;

    let other_version = app.create_productversion(&fixture.product, "13.0").await;
    let mut changed = payload.clone();
    changed["productversion"] = json!(uri(ResourceKind::ProductVersion, other_version.id));
    expect_rejection(
        app.put(&location, &changed).await,
        "productversion of an existing caseversion may not be changed.",
    )
    .await;

    let other_case = app.create_case(&fixture.product).await;
    let mut changed = payload.clone();
    changed["case"] = json!(uri(ResourceKind::Case, other_case.id));
    expect_rejection(
        app.put(&location, &changed).await,
        "case of an existing caseversion may not be changed.",
    )
    .await;

    // leaving both out is not a change
    let object = payload.as_object_mut().unwrap();
    object.remove("case");
    object.remove("productversion");
    object.insert("name".to_string(), json!("renamed"));
    let response = app.put(&location, &payload).await;
    assert_eq!(response.status(), 200);
    let cv = app.get_json(&location).await;
    assert_eq!(cv["name"], "renamed");
    assert_eq!(
        cv["productversion"],
        uri(ResourceKind::ProductVersion, fixture.productversion.id)
    );
}

#[tokio::test]
async fn test_add_step() {
    let app = spawn_app().await;
    let fixture = fixture(&app).await;
    let mut payload = new_caseversion(&fixture, "add");
    let location = create(&app, &payload).await;
    let before = step_uris(&app.get_json(&location).await);

    payload["steps"].as_array_mut().unwrap().push(json!({
        "instruction": "a third instruction",
        "expected": "a third expected",
        "number": 3
    }));
    assert_eq!(app.put(&location, &payload).await.status(), 200);

    let cv = app.get_json(&location).await;
    assert_eq!(step_fields(&cv), payload["steps"].as_array().unwrap().clone());
    assert_eq!(step_uris(&cv)[..2], before[..]);
}

#[tokio::test]
async fn test_edit_steps_in_place() {
    let app = spawn_app().await;
    let fixture = fixture(&app).await;
    let mut payload = new_caseversion(&fixture, "edit");
    let location = create(&app, &payload).await;
    let before = step_uris(&app.get_json(&location).await);

    payload["steps"][0]["instruction"] = json!("this is a new instruction");
    payload["steps"][1]["expected"] = json!("this is a new expected");
    assert_eq!(app.put(&location, &payload).await.status(), 200);

    let cv = app.get_json(&location).await;
    assert_eq!(step_fields(&cv), payload["steps"].as_array().unwrap().clone());
    assert_eq!(step_uris(&cv), before);
}

#[tokio::test]
async fn test_delete_step() {
    let app = spawn_app().await;
    let fixture = fixture(&app).await;
    let mut payload = new_caseversion(&fixture, "delete");
    let location = create(&app, &payload).await;
    let before = step_uris(&app.get_json(&location).await);

    payload["steps"].as_array_mut().unwrap().remove(0);
    assert_eq!(app.put(&location, &payload).await.status(), 200);

    let cv = app.get_json(&location).await;
    assert_eq!(
        step_fields(&cv),
        vec![json!({"number": 2, "instruction": "instruction 2", "expected": "expected 2"})]
    );
    assert_eq!(step_uris(&cv), vec![before[1].clone()]);
    assert_eq!(app.get(&before[0]).await.status(), 404);
}

#[tokio::test]
async fn test_identical_update_keeps_steps() {
    let app = spawn_app().await;
    let fixture = fixture(&app).await;
    let payload = new_caseversion(&fixture, "same");
    let location = create(&app, &payload).await;
    let before = app.get_json(&location).await;

    assert_eq!(app.put(&location, &payload).await.status(), 200);
    assert_eq!(app.put(&location, &payload).await.status(), 200);

    let after = app.get_json(&location).await;
    assert_eq!(after["steps"], before["steps"]);
}

#[tokio::test]
async fn test_step_changes_stay_within_one_caseversion() {
    let app = spawn_app().await;
    let fixture = fixture(&app).await;

    let mut locations = Vec::new();
    for name in ["first", "second", "third"] {
        locations.push(create(&app, &new_caseversion(&fixture, name)).await);
    }
    let untouched_before = [
        app.get_json(&locations[0]).await,
        app.get_json(&locations[2]).await,
    ];

    let mut payload = new_caseversion(&fixture, "second");
    payload["steps"] = json!([
        {"number": 1, "instruction": "edited", "expected": "expected 1"},
        {"number": 3, "instruction": "added", "expected": "added expected"}
    ]);
    assert_eq!(app.put(&locations[1], &payload).await.status(), 200);

    let edited = app.get_json(&locations[1]).await;
    assert_eq!(step_fields(&edited), payload["steps"].as_array().unwrap().clone());
    assert_eq!(app.get_json(&locations[0]).await["steps"], untouched_before[0]["steps"]);
    assert_eq!(app.get_json(&locations[2]).await["steps"], untouched_before[1]["steps"]);
}

#[tokio::test]
async fn test_steps_of_another_caseversion_are_rejected() {
    let app = spawn_app().await;
    let fixture = fixture(&app).await;
    let first = create(&app, &new_caseversion(&fixture, "first")).await;
    let mut payload = new_caseversion(&fixture, "second");
    let second = create(&app, &payload).await;

    let foreign = step_uris(&app.get_json(&first).await)[0].clone();
    payload["steps"] = json!([foreign.clone()]);
    expect_rejection(
        app.put(&second, &payload).await,
        &format!("casestep {} does not belong to this caseversion.", foreign),
    )
    .await;
}

#[tokio::test]
async fn test_tag_links_follow_the_payload() {
    let app = spawn_app().await;
    let fixture = fixture(&app).await;
    let tag = app.create_tag("smoke").await;
    let mut payload = new_caseversion(&fixture, "tagged");
    let location = create(&app, &payload).await;

    payload["tags"] = json!([uri(ResourceKind::Tag, tag.id)]);
    assert_eq!(app.put(&location, &payload).await.status(), 200);
    assert_eq!(
        app.get_json(&location).await["tags"],
        json!([uri(ResourceKind::Tag, tag.id)])
    );

    // omitted: links stay
    payload.as_object_mut().unwrap().remove("tags");
    assert_eq!(app.put(&location, &payload).await.status(), 200);
    assert_eq!(app.get_json(&location).await["tags"].as_array().unwrap().len(), 1);

    // empty list: links cleared, tag itself kept
    payload["tags"] = json!([]);
    assert_eq!(app.put(&location, &payload).await.status(), 200);
    assert_eq!(app.get_json(&location).await["tags"], json!([]));
    assert_eq!(
        app.get(&uri(ResourceKind::Tag, tag.id)).await.status(),
        200
    );
}

#[tokio::test]
async fn test_unknown_references_are_not_found() {
    let app = spawn_app().await;
    let fixture = fixture(&app).await;
    let mut payload = new_caseversion(&fixture, "dangling");
    payload["tags"] = json!(["/api/v1/tag/999/"]);

    let response = app.post("/api/v1/caseversion/", &payload).await;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "tag 999 not found");
}

#[tokio::test]
async fn test_delete_caseversion_removes_steps() {
    let app = spawn_app().await;
    let fixture = fixture(&app).await;
    let location = create(&app, &new_caseversion(&fixture, "doomed")).await;
    let steps = step_uris(&app.get_json(&location).await);

    assert_eq!(app.delete(&location).await.status(), 204);
    assert_eq!(app.get(&location).await.status(), 404);
    assert_eq!(app.get(&steps[0]).await.status(), 404);
    assert_eq!(app.delete(&location).await.status(), 404);
}

#[tokio::test]
async fn test_writes_need_permission() {
    let app = spawn_app().await;
    let fixture = fixture(&app).await;
    let payload = new_caseversion(&fixture, "guarded");

    let anonymous = app.post_anonymous("/api/v1/caseversion/", &payload).await;
    assert_eq!(anonymous.status(), 401);

    let key = app.add_user("tagger", &[Permission::ManageTags]).await;
    let forbidden = app
        .post_as("tagger", &key, "/api/v1/caseversion/", &payload)
        .await;
    assert_eq!(forbidden.status(), 403);

    let wrong_key = app
        .post_as("tagger", "not-the-key", "/api/v1/caseversion/", &payload)
        .await;
    assert_eq!(wrong_key.status(), 401);

    let allowed_key = app.add_user("librarian", &[Permission::ManageCases]).await;
    let allowed = app
        .post_as("librarian", &allowed_key, "/api/v1/caseversion/", &payload)
        .await;
    assert_eq!(allowed.status(), 201);
    let body: Value = allowed.json().await.unwrap();
    let selection = app
        .get_json(&uri(
            ResourceKind::CaseVersionSelection,
            body["id"].as_str().unwrap().parse().unwrap(),
        ))
        .await;
    assert_eq!(selection["created_by"], "librarian");

    assert_eq!(app.get("/api/v1/caseversion/").await.status(), 200);
    assert_eq!(
        app.get("/api/v1/caseversion/?username=tester&api_key=wrong")
            .await
            .status(),
        401
    );
}

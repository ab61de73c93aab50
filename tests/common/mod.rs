#![allow(dead_code)]

use case_library::config::ApiConfig;
use case_library::logic::{digest_api_key, Permission};
use case_library::store::{
    CaseStore, MemoryStore, ProductStore, ProductVersionStore, TagStore, UserStore,
};
use case_library::{
    AppState, Case, Id, NewCase, NewProduct, NewProductVersion, NewTag, NewUser, Product,
    ProductVersion, ResourceKind, Tag,
};
use reqwest::{Client, Response};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::net::TcpListener;

pub const USERNAME: &str = "tester";
pub const API_KEY: &str = "secret";

/// A running server plus a client that authenticates as a user holding
/// every permission.
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub base_url: String,
    client: Client,
}

pub async fn spawn_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let user = store
        .upsert_user(NewUser {
            username: USERNAME.to_string(),
            permissions: Permission::all()
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
            is_superuser: false,
        })
        .await
        .unwrap();
    store
        .add_api_key(user.id, &digest_api_key(API_KEY))
        .await
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let state = AppState::new(Arc::clone(&store), ApiConfig::default());
    tokio::spawn(async move {
        case_library::api::serve(listener, state).await.unwrap();
    });

    TestApp {
        store,
        base_url: format!("http://{}", address),
        client: Client::new(),
    }
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn credentials(&self) -> [(&'static str, &'static str); 2] {
        [("username", USERNAME), ("api_key", API_KEY)]
    }

    /// Unauthenticated request
    pub async fn get(&self, path: &str) -> Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    pub async fn get_json(&self, path: &str) -> Value {
        let response = self.get(path).await;
        assert_eq!(response.status(), 200, "GET {}", path);
        response.json().await.unwrap()
    }

    pub async fn post(&self, path: &str, body: &Value) -> Response {
        self.client
            .post(self.url(path))
            .query(&self.credentials())
            .json(body)
            .send()
            .await
            .unwrap()
    }

    pub async fn put(&self, path: &str, body: &Value) -> Response {
        self.client
            .put(self.url(path))
            .query(&self.credentials())
            .json(body)
            .send()
            .await
            .unwrap()
    }

    pub async fn delete(&self, path: &str) -> Response {
        self.client
            .delete(self.url(path))
            .query(&self.credentials())
            .send()
            .await
            .unwrap()
    }

    /// Request as another user, authenticating through the header.
    pub async fn post_as(&self, username: &str, api_key: &str, path: &str, body: &Value) -> Response {
        self.client
            .post(self.url(path))
            .header("Authorization", format!("ApiKey {}:{}", username, api_key))
            .json(body)
            .send()
            .await
            .unwrap()
    }

    pub async fn post_anonymous(&self, path: &str, body: &Value) -> Response {
        self.client.post(self.url(path)).json(body).send().await.unwrap()
    }

    /// Register a user holding only the given permissions; returns its key.
    pub async fn add_user(&self, username: &str, permissions: &[Permission]) -> String {
        let user = self
            .store
            .upsert_user(NewUser {
                username: username.to_string(),
                permissions: permissions
                    .iter()
                    .map(|p| p.as_str().to_string())
                    .collect::<BTreeSet<_>>(),
                is_superuser: false,
            })
            .await
            .unwrap();
        let key = format!("{}-key", username);
        self.store
            .add_api_key(user.id, &digest_api_key(&key))
            .await
            .unwrap();
        key
    }

    pub async fn create_product(&self, name: &str) -> Product {
        self.store
            .create_product(
                NewProduct {
                    name: name.to_string(),
                    description: String::new(),
                },
                vec![],
            )
            .await
            .unwrap()
    }

    pub async fn create_productversion(&self, product: &Product, version: &str) -> ProductVersion {
        self.store
            .create_productversion(NewProductVersion {
                product_id: product.id,
                version: version.to_string(),
                codename: String::new(),
                environment_ids: vec![],
            })
            .await
            .unwrap()
    }

    pub async fn create_case(&self, product: &Product) -> Case {
        self.store
            .create_case(NewCase {
                product_id: product.id,
            })
            .await
            .unwrap()
    }

    pub async fn create_tag(&self, name: &str) -> Tag {
        self.store
            .create_tag(NewTag {
                name: name.to_string(),
                description: String::new(),
                product_id: None,
            })
            .await
            .unwrap()
    }
}

pub fn uri(kind: ResourceKind, id: Id) -> String {
    kind.detail_uri(id)
}

/// Id at the end of a `Location` header or detail uri.
pub fn id_from_uri(uri: &str) -> Id {
    uri.trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|id| id.parse().ok())
        .unwrap()
}

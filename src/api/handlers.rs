use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;

use crate::api::{ApiError, ApiResult, ListMeta, ListResponse, PageParams};
use crate::config::ApiConfig;
use crate::logic::{Authorizer, Decision, Permission, PermissionAuthorizer};
use crate::model::{Caller, Id, Page, PageRequest, ResourceKind};
use crate::store::traits::Store;

/// Shared state of every handler.
pub struct AppState<S> {
    pub store: Arc<S>,
    pub authorizer: Arc<dyn Authorizer>,
    pub settings: ApiConfig,
}

impl<S> AppState<S> {
    pub fn new(store: Arc<S>, settings: ApiConfig) -> Self {
        Self {
            store,
            authorizer: Arc::new(PermissionAuthorizer),
            settings,
        }
    }

    pub fn page(&self, params: PageParams) -> PageRequest {
        self.settings.page(params.limit, params.offset)
    }

    /// Fail unless the caller may exercise `permission`.
    pub fn require(&self, caller: &Caller, permission: Permission) -> ApiResult<()> {
        match self.authorizer.check(caller, permission) {
            Decision::Allow => Ok(()),
            Decision::Unauthenticated => Err(ApiError::Unauthorized("authentication required")),
            Decision::Forbidden => {
                log::warn!(
                    "User {} lacks permission {}",
                    caller.username().unwrap_or_default(),
                    permission.as_str()
                );
                Err(ApiError::Forbidden(permission))
            }
        }
    }
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            authorizer: Arc::clone(&self.authorizer),
            settings: self.settings,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Unwrap a lookup result, answering 404 for a missing row.
pub fn found<T>(value: Option<T>, kind: ResourceKind, id: Id) -> ApiResult<T> {
    value.ok_or(ApiError::not_found(kind, id))
}

/// `201 Created` with the new resource's uri in `Location`.
pub fn created<T: Serialize>(kind: ResourceKind, id: Id, body: T) -> Response {
    (
        StatusCode::CREATED,
        [(header::LOCATION, kind.detail_uri(id))],
        Json(body),
    )
        .into_response()
}

pub fn deleted(existed: bool, kind: ResourceKind, id: Id) -> ApiResult<StatusCode> {
    if existed {
        log::info!("Deleted {} {}", kind, id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(kind, id))
    }
}

pub fn list_response<T>(
    kind: ResourceKind,
    raw_query: Option<&str>,
    page: PageRequest,
    result: Page<T>,
) -> Json<ListResponse<T>> {
    Json(ListResponse {
        meta: ListMeta::new(kind, raw_query, page, result.total_count),
        objects: result.items,
    })
}

/// Every id must name an existing tag.
pub async fn ensure_tags<S: Store>(store: &S, ids: &[Id]) -> ApiResult<()> {
    for id in ids {
        found(store.get_tag(*id).await?, ResourceKind::Tag, *id)?;
    }
    Ok(())
}

pub async fn ensure_environments<S: Store>(store: &S, ids: &[Id]) -> ApiResult<()> {
    for id in ids {
        found(store.get_environment(*id).await?, ResourceKind::Environment, *id)?;
    }
    Ok(())
}

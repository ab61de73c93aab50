use axum::{
    body::Bytes,
    extract::{Path, Query, RawQuery, State},
    http::StatusCode,
    response::{Json, Response},
};
use log::info;

use crate::api::{
    created, deleted, found, list_response, parse_payload, ApiResult, AppState,
    EnvironmentPayload, EnvironmentResponse, ListResponse, PageParams,
};
use crate::logic::{require, Permission};
use crate::model::{Caller, EnvironmentFilter, Id, NewEnvironment, ResourceKind};
use crate::store::traits::Store;

pub async fn list_environments<S: Store>(
    State(state): State<AppState<S>>,
    _caller: Caller,
    Query(filter): Query<EnvironmentFilter>,
    Query(params): Query<PageParams>,
    RawQuery(raw_query): RawQuery,
) -> ApiResult<Json<ListResponse<EnvironmentResponse>>> {
    let page = state.page(params);
    let environments = state.store.list_environments(&filter, page).await?;

    Ok(list_response(
        ResourceKind::Environment,
        raw_query.as_deref(),
        page,
        environments.map(|e| EnvironmentResponse::from(&e)),
    ))
}

pub async fn get_environment<S: Store>(
    State(state): State<AppState<S>>,
    _caller: Caller,
    Path(id): Path<Id>,
) -> ApiResult<Json<EnvironmentResponse>> {
    let environment = found(
        state.store.get_environment(id).await?,
        ResourceKind::Environment,
        id,
    )?;
    Ok(Json(EnvironmentResponse::from(&environment)))
}

fn new_environment(payload: EnvironmentPayload) -> ApiResult<NewEnvironment> {
    Ok(NewEnvironment {
        name: require(payload.name, "name")?,
        description: payload.description.unwrap_or_default(),
    })
}

pub async fn create_environment<S: Store>(
    State(state): State<AppState<S>>,
    caller: Caller,
    body: Bytes,
) -> ApiResult<Response> {
    state.require(&caller, Permission::ManageEnvironments)?;
    let payload: EnvironmentPayload = parse_payload(ResourceKind::Environment, &body)?;

    let environment = state
        .store
        .create_environment(new_environment(payload)?)
        .await?;
    info!("Created environment {} ({})", environment.id, environment.name);

    Ok(created(
        ResourceKind::Environment,
        environment.id,
        EnvironmentResponse::from(&environment),
    ))
}

pub async fn update_environment<S: Store>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<Id>,
    body: Bytes,
) -> ApiResult<Json<EnvironmentResponse>> {
    state.require(&caller, Permission::ManageEnvironments)?;
    let payload: EnvironmentPayload = parse_payload(ResourceKind::Environment, &body)?;

    let environment = found(
        state
            .store
            .update_environment(id, new_environment(payload)?)
            .await?,
        ResourceKind::Environment,
        id,
    )?;
    info!("Updated environment {}", id);

    Ok(Json(EnvironmentResponse::from(&environment)))
}

pub async fn delete_environment<S: Store>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<Id>,
) -> ApiResult<StatusCode> {
    state.require(&caller, Permission::ManageEnvironments)?;
    deleted(
        state.store.delete_environment(id).await?,
        ResourceKind::Environment,
        id,
    )
}

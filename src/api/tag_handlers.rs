use axum::{
    body::Bytes,
    extract::{Path, Query, RawQuery, State},
    http::StatusCode,
    response::{Json, Response},
};
use log::info;

use crate::api::{
    created, deleted, found, list_response, parse_payload, ApiResult, AppState, ListResponse,
    PageParams, TagPayload, TagResponse,
};
use crate::logic::{parse_ref, require, Permission};
use crate::model::{Caller, Id, NewTag, ResourceKind, TagFilter};
use crate::store::traits::Store;

pub async fn list_tags<S: Store>(
    State(state): State<AppState<S>>,
    _caller: Caller,
    Query(filter): Query<TagFilter>,
    Query(params): Query<PageParams>,
    RawQuery(raw_query): RawQuery,
) -> ApiResult<Json<ListResponse<TagResponse>>> {
    let page = state.page(params);
    let tags = state.store.list_tags(&filter, page).await?;

    Ok(list_response(
        ResourceKind::Tag,
        raw_query.as_deref(),
        page,
        tags.map(|t| TagResponse::from(&t)),
    ))
}

pub async fn get_tag<S: Store>(
    State(state): State<AppState<S>>,
    _caller: Caller,
    Path(id): Path<Id>,
) -> ApiResult<Json<TagResponse>> {
    let tag = found(state.store.get_tag(id).await?, ResourceKind::Tag, id)?;
    Ok(Json(TagResponse::from(&tag)))
}

/// Build a tag from a full payload; an absent `product` makes it global.
async fn new_tag<S: Store>(store: &S, payload: TagPayload) -> ApiResult<NewTag> {
    let name = require(payload.name, "name")?;
    let product_id = payload
        .product
        .as_deref()
        .map(|uri| parse_ref(ResourceKind::Product, uri))
        .transpose()?;
    if let Some(product_id) = product_id {
        found(store.get_product(product_id).await?, ResourceKind::Product, product_id)?;
    }

    Ok(NewTag {
        name,
        description: payload.description.unwrap_or_default(),
        product_id,
    })
}

pub async fn create_tag<S: Store>(
    State(state): State<AppState<S>>,
    caller: Caller,
    body: Bytes,
) -> ApiResult<Response> {
    state.require(&caller, Permission::ManageTags)?;
    let payload: TagPayload = parse_payload(ResourceKind::Tag, &body)?;

    let tag = state
        .store
        .create_tag(new_tag(state.store.as_ref(), payload).await?)
        .await?;
    info!("Created tag {} ({})", tag.id, tag.name);

    Ok(created(ResourceKind::Tag, tag.id, TagResponse::from(&tag)))
}

pub async fn update_tag<S: Store>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<Id>,
    body: Bytes,
) -> ApiResult<Json<TagResponse>> {
    state.require(&caller, Permission::ManageTags)?;
    found(state.store.get_tag(id).await?, ResourceKind::Tag, id)?;
    let payload: TagPayload = parse_payload(ResourceKind::Tag, &body)?;

    let replacement = new_tag(state.store.as_ref(), payload).await?;
    let tag = found(
        state.store.update_tag(id, replacement).await?,
        ResourceKind::Tag,
        id,
    )?;
    info!("Updated tag {}", id);

    Ok(Json(TagResponse::from(&tag)))
}

pub async fn delete_tag<S: Store>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<Id>,
) -> ApiResult<StatusCode> {
    state.require(&caller, Permission::ManageTags)?;
    deleted(state.store.delete_tag(id).await?, ResourceKind::Tag, id)
}

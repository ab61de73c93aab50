use axum::{
    body::Bytes,
    extract::{Path, Query, RawQuery, State},
    http::StatusCode,
    response::{Json, Response},
};
use log::info;

use crate::api::{
    created, deleted, ensure_environments, found, list_response, parse_payload, ApiResult,
    AppState, ListResponse, PageParams, ProductPayload, ProductResponse, ProductVersionEnvironmentsResponse,
    ProductVersionPayload, ProductVersionResponse,
};
use crate::logic::{
    check_productversion_product_unchanged, diff_links, parse_ref, parse_refs, require, Permission,
};
use crate::model::{
    Caller, Id, NewProduct, NewProductVersion, Page, PageRequest, Product, ProductFilter, ProductUpdate,
    ProductVersion, ProductVersionFilter, ProductVersionUpdate, ResourceKind,
};
use crate::store::traits::Store;

async fn product_response<S: Store>(store: &S, product: &Product) -> ApiResult<ProductResponse> {
    let versions = store
        .list_productversions(&ProductVersionFilter::for_product(product.id), PageRequest::all())
        .await?;
    Ok(ProductResponse::new(product, &versions.items))
}

pub async fn list_products<S: Store>(
    State(state): State<AppState<S>>,
    _caller: Caller,
    Query(filter): Query<ProductFilter>,
    Query(params): Query<PageParams>,
    RawQuery(raw_query): RawQuery,
) -> ApiResult<Json<ListResponse<ProductResponse>>> {
    let page = state.page(params);
    let products = state.store.list_products(&filter, page).await?;

    let mut objects = Vec::with_capacity(products.items.len());
    for product in &products.items {
        objects.push(product_response(state.store.as_ref(), product).await?);
    }
    let products = Page {
        items: objects,
        total_count: products.total_count,
    };
    Ok(list_response(ResourceKind::Product, raw_query.as_deref(), page, products))
}

pub async fn get_product<S: Store>(
    State(state): State<AppState<S>>,
    _caller: Caller,
    Path(id): Path<Id>,
) -> ApiResult<Json<ProductResponse>> {
    let product = found(state.store.get_product(id).await?, ResourceKind::Product, id)?;
    Ok(Json(product_response(state.store.as_ref(), &product).await?))
}

/// Create a product. Nested `productversions` are get-or-created.
pub async fn create_product<S: Store>(
    State(state): State<AppState<S>>,
    caller: Caller,
    body: Bytes,
) -> ApiResult<Response> {
    state.require(&caller, Permission::ManageProducts)?;
    let payload: ProductPayload = parse_payload(ResourceKind::Product, &body)?;
    let name = require(payload.name, "name")?;

    let product = state
        .store
        .create_product(
            NewProduct {
                name,
                description: payload.description.unwrap_or_default(),
            },
            payload.productversions,
        )
        .await?;
    info!("Created product {} ({})", product.id, product.name);

    let body = product_response(state.store.as_ref(), &product).await?;
    Ok(created(ResourceKind::Product, product.id, body))
}

/// Update a product. Supplied `productversions` are get-or-created;
/// versions already stored are never changed or removed here.
pub async fn update_product<S: Store>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<Id>,
    body: Bytes,
) -> ApiResult<Json<ProductResponse>> {
    state.require(&caller, Permission::ManageProducts)?;
    let payload: ProductPayload = parse_payload(ResourceKind::Product, &body)?;

    let update = ProductUpdate {
        name: payload.name,
        description: payload.description,
    };
    let product = found(
        state
            .store
            .update_product(id, update, payload.productversions)
            .await?,
        ResourceKind::Product,
        id,
    )?;
    info!("Updated product {}", id);

    Ok(Json(product_response(state.store.as_ref(), &product).await?))
}

pub async fn delete_product<S: Store>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<Id>,
) -> ApiResult<StatusCode> {
    state.require(&caller, Permission::ManageProducts)?;
    deleted(state.store.delete_product(id).await?, ResourceKind::Product, id)
}

pub async fn list_productversions<S: Store>(
    State(state): State<AppState<S>>,
    _caller: Caller,
    Query(filter): Query<ProductVersionFilter>,
    Query(params): Query<PageParams>,
    RawQuery(raw_query): RawQuery,
) -> ApiResult<Json<ListResponse<ProductVersionResponse>>> {
    let page = state.page(params);
    let productversions = state.store.list_productversions(&filter, page).await?;

    Ok(list_response(
        ResourceKind::ProductVersion,
        raw_query.as_deref(),
        page,
        productversions.map(|pv| ProductVersionResponse::from(&pv)),
    ))
}

pub async fn get_productversion<S: Store>(
    State(state): State<AppState<S>>,
    _caller: Caller,
    Path(id): Path<Id>,
) -> ApiResult<Json<ProductVersionResponse>> {
    let pv = found(
        state.store.get_productversion(id).await?,
        ResourceKind::ProductVersion,
        id,
    )?;
    Ok(Json(ProductVersionResponse::from(&pv)))
}

pub async fn create_productversion<S: Store>(
    State(state): State<AppState<S>>,
    caller: Caller,
    body: Bytes,
) -> ApiResult<Response> {
    state.require(&caller, Permission::ManageProducts)?;
    let payload: ProductVersionPayload = parse_payload(ResourceKind::ProductVersion, &body)?;

    let product_id = parse_ref(ResourceKind::Product, &require(payload.product, "product")?)?;
    let version = require(payload.version, "version")?;
    let environment_ids = parse_refs(
        ResourceKind::Environment,
        &payload.environments.unwrap_or_default(),
    )?;
    found(state.store.get_product(product_id).await?, ResourceKind::Product, product_id)?;
    ensure_environments(state.store.as_ref(), &environment_ids).await?;

    let pv = state
        .store
        .create_productversion(NewProductVersion {
            product_id,
            version,
            codename: payload.codename.unwrap_or_default(),
            environment_ids,
        })
        .await?;
    info!("Created productversion {} of product {}", pv.id, product_id);

    Ok(created(
        ResourceKind::ProductVersion,
        pv.id,
        ProductVersionResponse::from(&pv),
    ))
}

pub async fn update_productversion<S: Store>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<Id>,
    body: Bytes,
) -> ApiResult<Json<ProductVersionResponse>> {
    state.require(&caller, Permission::ManageProducts)?;
    let stored = found(
        state.store.get_productversion(id).await?,
        ResourceKind::ProductVersion,
        id,
    )?;
    let payload: ProductVersionPayload = parse_payload(ResourceKind::ProductVersion, &body)?;

    let product_id = payload
        .product
        .as_deref()
        .map(|uri| parse_ref(ResourceKind::Product, uri))
        .transpose()?;
    check_productversion_product_unchanged(&stored, product_id)?;

    let environments = match payload.environments {
        Some(uris) => {
            let desired = parse_refs(ResourceKind::Environment, &uris)?;
            ensure_environments(state.store.as_ref(), &desired).await?;
            let current: Vec<Id> = state
                .store
                .productversion_environments(id)
                .await?
                .iter()
                .map(|e| e.id)
                .collect();
            Some(diff_links(&current, &desired))
        }
        None => None,
    };

    let update = ProductVersionUpdate {
        version: payload.version,
        codename: payload.codename,
        environments,
    };
    let pv = found(
        state.store.update_productversion(id, update).await?,
        ResourceKind::ProductVersion,
        id,
    )?;
    info!("Updated productversion {}", id);

    Ok(Json(ProductVersionResponse::from(&pv)))
}

pub async fn delete_productversion<S: Store>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<Id>,
) -> ApiResult<StatusCode> {
    state.require(&caller, Permission::ManageProducts)?;
    deleted(
        state.store.delete_productversion(id).await?,
        ResourceKind::ProductVersion,
        id,
    )
}

async fn environments_response<S: Store>(
    store: &S,
    pv: &ProductVersion,
) -> ApiResult<ProductVersionEnvironmentsResponse> {
    let environments = store.productversion_environments(pv.id).await?;
    Ok(ProductVersionEnvironmentsResponse::new(pv, &environments))
}

pub async fn list_productversion_environments<S: Store>(
    State(state): State<AppState<S>>,
    _caller: Caller,
    Query(filter): Query<ProductVersionFilter>,
    Query(params): Query<PageParams>,
    RawQuery(raw_query): RawQuery,
) -> ApiResult<Json<ListResponse<ProductVersionEnvironmentsResponse>>> {
    let page = state.page(params);
    let productversions = state.store.list_productversions(&filter, page).await?;

    let mut objects = Vec::with_capacity(productversions.items.len());
    for pv in &productversions.items {
        objects.push(environments_response(state.store.as_ref(), pv).await?);
    }
    let rows = Page {
        items: objects,
        total_count: productversions.total_count,
    };
    Ok(list_response(
        ResourceKind::ProductVersionEnvironments,
        raw_query.as_deref(),
        page,
        rows,
    ))
}

pub async fn get_productversion_environments<S: Store>(
    State(state): State<AppState<S>>,
    _caller: Caller,
    Path(id): Path<Id>,
) -> ApiResult<Json<ProductVersionEnvironmentsResponse>> {
    let pv = found(
        state.store.get_productversion(id).await?,
        ResourceKind::ProductVersionEnvironments,
        id,
    )?;
    Ok(Json(environments_response(state.store.as_ref(), &pv).await?))
}

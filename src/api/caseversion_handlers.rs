use axum::{
    body::Bytes,
    extract::{Path, Query, RawQuery, State},
    http::StatusCode,
    response::{Json, Response},
};
use log::info;

use crate::api::{
    created, deleted, ensure_environments, ensure_tags, found, list_response, parse_payload,
    ApiResult, AppState, CasePayload, CaseResponse, CaseStepResponse, CaseVersionPayload,
    CaseVersionResponse, ListResponse, PageParams, SelectionResponse,
};
use crate::logic::{
    check_caseversion_refs_unchanged, check_product_match, diff_links, parse_ref, parse_refs,
    parse_status, parse_steps, reconcile_steps, require, Permission,
};
use crate::model::{
    Caller, CaseFilter, CaseVersionFilter, CaseVersionUpdate, Id, NewCase, NewCaseVersion,
    ResourceKind, SelectionFilter,
};
use crate::store::traits::Store;

pub async fn list_cases<S: Store>(
    State(state): State<AppState<S>>,
    _caller: Caller,
    Query(filter): Query<CaseFilter>,
    Query(params): Query<PageParams>,
    RawQuery(raw_query): RawQuery,
) -> ApiResult<Json<ListResponse<CaseResponse>>> {
    let page = state.page(params);
    let cases = state.store.list_cases(&filter, page).await?;

    Ok(list_response(
        ResourceKind::Case,
        raw_query.as_deref(),
        page,
        cases.map(|c| CaseResponse::from(&c)),
    ))
}

pub async fn get_case<S: Store>(
    State(state): State<AppState<S>>,
    _caller: Caller,
    Path(id): Path<Id>,
) -> ApiResult<Json<CaseResponse>> {
    let case = found(state.store.get_case(id).await?, ResourceKind::Case, id)?;
    Ok(Json(CaseResponse::from(&case)))
}

pub async fn create_case<S: Store>(
    State(state): State<AppState<S>>,
    caller: Caller,
    body: Bytes,
) -> ApiResult<Response> {
    state.require(&caller, Permission::ManageCases)?;
    let payload: CasePayload = parse_payload(ResourceKind::Case, &body)?;

    let product_id = parse_ref(ResourceKind::Product, &require(payload.product, "product")?)?;
    found(state.store.get_product(product_id).await?, ResourceKind::Product, product_id)?;

    let case = state.store.create_case(NewCase { product_id }).await?;
    info!("Created case {} for product {}", case.id, product_id);

    Ok(created(ResourceKind::Case, case.id, CaseResponse::from(&case)))
}

pub async fn delete_case<S: Store>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<Id>,
) -> ApiResult<StatusCode> {
    state.require(&caller, Permission::ManageCases)?;
    deleted(state.store.delete_case(id).await?, ResourceKind::Case, id)
}

pub async fn list_caseversions<S: Store>(
    State(state): State<AppState<S>>,
    _caller: Caller,
    Query(filter): Query<CaseVersionFilter>,
    Query(params): Query<PageParams>,
    RawQuery(raw_query): RawQuery,
) -> ApiResult<Json<ListResponse<CaseVersionResponse>>> {
    let page = state.page(params);
    let caseversions = state.store.list_caseversions(&filter, page).await?;

    Ok(list_response(
        ResourceKind::CaseVersion,
        raw_query.as_deref(),
        page,
        caseversions.map(|cv| CaseVersionResponse::from(&cv)),
    ))
}

pub async fn get_caseversion<S: Store>(
    State(state): State<AppState<S>>,
    _caller: Caller,
    Path(id): Path<Id>,
) -> ApiResult<Json<CaseVersionResponse>> {
    let cv = found(
        state.store.get_caseversion(id).await?,
        ResourceKind::CaseVersion,
        id,
    )?;
    Ok(Json(CaseVersionResponse::from(&cv)))
}

/// Create a case version with its steps and links.
///
/// Checks run in order: step list shape, required fields, referenced rows,
/// product consistency. Nothing is written unless all of them pass.
pub async fn create_caseversion<S: Store>(
    State(state): State<AppState<S>>,
    caller: Caller,
    body: Bytes,
) -> ApiResult<Response> {
    state.require(&caller, Permission::ManageCases)?;
    let payload: CaseVersionPayload = parse_payload(ResourceKind::CaseVersion, &body)?;

    let steps = parse_steps(payload.steps.as_ref())?;
    let case_id = parse_ref(ResourceKind::Case, &require(payload.case, "case")?)?;
    let productversion_id = parse_ref(
        ResourceKind::ProductVersion,
        &require(payload.productversion, "productversion")?,
    )?;
    let name = require(payload.name, "name")?;
    let status = payload
        .status
        .as_deref()
        .map(parse_status)
        .transpose()?
        .unwrap_or_default();
    let tag_ids = parse_refs(ResourceKind::Tag, &payload.tags.unwrap_or_default())?;
    let environment_ids = parse_refs(
        ResourceKind::Environment,
        &payload.environments.unwrap_or_default(),
    )?;

    let case = found(state.store.get_case(case_id).await?, ResourceKind::Case, case_id)?;
    let productversion = found(
        state.store.get_productversion(productversion_id).await?,
        ResourceKind::ProductVersion,
        productversion_id,
    )?;
    check_product_match(&case, &productversion)?;
    ensure_tags(state.store.as_ref(), &tag_ids).await?;
    ensure_environments(state.store.as_ref(), &environment_ids).await?;

    let plan = reconcile_steps(&[], &steps)?;
    let cv = state
        .store
        .create_caseversion(NewCaseVersion {
            case_id,
            productversion_id,
            name,
            description: payload.description.unwrap_or_default(),
            status,
            created_by: caller.username().map(str::to_string),
            steps: plan.create,
            tag_ids,
            environment_ids,
        })
        .await?;
    info!("Created caseversion {} of case {}", cv.id, case_id);

    Ok(created(
        ResourceKind::CaseVersion,
        cv.id,
        CaseVersionResponse::from(&cv),
    ))
}

/// Replace a case version's content. Steps are reconciled against the
/// stored ones inside the store's write, so concurrent updates of the same
/// case version never interleave; `case` and `productversion` may be
/// repeated but not changed.
pub async fn update_caseversion<S: Store>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<Id>,
    body: Bytes,
) -> ApiResult<Json<CaseVersionResponse>> {
    state.require(&caller, Permission::ManageCases)?;
    let stored = found(
        state.store.get_caseversion(id).await?,
        ResourceKind::CaseVersion,
        id,
    )?;
    let payload: CaseVersionPayload = parse_payload(ResourceKind::CaseVersion, &body)?;

    let steps = parse_steps(payload.steps.as_ref())?;
    let productversion_id = payload
        .productversion
        .as_deref()
        .map(|uri| parse_ref(ResourceKind::ProductVersion, uri))
        .transpose()?;
    let case_id = payload
        .case
        .as_deref()
        .map(|uri| parse_ref(ResourceKind::Case, uri))
        .transpose()?;
    check_caseversion_refs_unchanged(&stored, case_id, productversion_id)?;
    let status = payload.status.as_deref().map(parse_status).transpose()?;

    let tags = match payload.tags {
        Some(uris) => {
            let desired = parse_refs(ResourceKind::Tag, &uris)?;
            ensure_tags(state.store.as_ref(), &desired).await?;
            Some(diff_links(&stored.tag_ids, &desired))
        }
        None => None,
    };
    let environments = match payload.environments {
        Some(uris) => {
            let desired = parse_refs(ResourceKind::Environment, &uris)?;
            ensure_environments(state.store.as_ref(), &desired).await?;
            Some(diff_links(&stored.environment_ids, &desired))
        }
        None => None,
    };

    let update = CaseVersionUpdate {
        name: payload.name,
        description: payload.description,
        status,
        steps: Some(steps),
        tags,
        environments,
    };
    let cv = found(
        state.store.update_caseversion(id, update).await?,
        ResourceKind::CaseVersion,
        id,
    )?;
    info!("Updated caseversion {}", id);

    Ok(Json(CaseVersionResponse::from(&cv)))
}

pub async fn delete_caseversion<S: Store>(
    State(state): State<AppState<S>>,
    caller: Caller,
    Path(id): Path<Id>,
) -> ApiResult<StatusCode> {
    state.require(&caller, Permission::ManageCases)?;
    deleted(
        state.store.delete_caseversion(id).await?,
        ResourceKind::CaseVersion,
        id,
    )
}

pub async fn get_casestep<S: Store>(
    State(state): State<AppState<S>>,
    _caller: Caller,
    Path(id): Path<Id>,
) -> ApiResult<Json<CaseStepResponse>> {
    let step = found(state.store.get_casestep(id).await?, ResourceKind::CaseStep, id)?;
    Ok(Json(CaseStepResponse::from(&step)))
}

/// Case versions linked (`tags=<id>`) or not linked (`tags__ne=<id>`) to
/// a tag, with their product version and tags expanded.
pub async fn list_selections<S: Store>(
    State(state): State<AppState<S>>,
    _caller: Caller,
    Query(filter): Query<SelectionFilter>,
    Query(params): Query<PageParams>,
    RawQuery(raw_query): RawQuery,
) -> ApiResult<Json<ListResponse<SelectionResponse>>> {
    let page = state.page(params);
    let rows = state.store.list_selections(&filter, page).await?;

    Ok(list_response(
        ResourceKind::CaseVersionSelection,
        raw_query.as_deref(),
        page,
        rows.map(|row| SelectionResponse::from(&row)),
    ))
}

pub async fn get_selection<S: Store>(
    State(state): State<AppState<S>>,
    _caller: Caller,
    Path(id): Path<Id>,
) -> ApiResult<Json<SelectionResponse>> {
    let row = found(
        state.store.get_selection(id).await?,
        ResourceKind::CaseVersionSelection,
        id,
    )?;
    Ok(Json(SelectionResponse::from(&row)))
}

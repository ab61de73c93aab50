use axum::{
    extract::Request,
    routing::get,
    Router, ServiceExt,
};
use tokio::net::TcpListener;
use tower::Layer;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};

use crate::api::{
    caseversion_handlers, environment_handlers, handlers, product_handlers, tag_handlers, AppState,
};
use crate::store::traits::Store;

pub fn create_router<S: Store + 'static>() -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Products
        .route(
            "/api/v1/product",
            get(product_handlers::list_products::<S>).post(product_handlers::create_product::<S>),
        )
        .route(
            "/api/v1/product/:id",
            get(product_handlers::get_product::<S>)
                .put(product_handlers::update_product::<S>)
                .delete(product_handlers::delete_product::<S>),
        )
        .route(
            "/api/v1/productversion",
            get(product_handlers::list_productversions::<S>)
                .post(product_handlers::create_productversion::<S>),
        )
        .route(
            "/api/v1/productversion/:id",
            get(product_handlers::get_productversion::<S>)
                .put(product_handlers::update_productversion::<S>)
                .delete(product_handlers::delete_productversion::<S>),
        )
        .route(
            "/api/v1/productversionenvironments",
            get(product_handlers::list_productversion_environments::<S>),
        )
        .route(
            "/api/v1/productversionenvironments/:id",
            get(product_handlers::get_productversion_environments::<S>),
        )
        // Cases and case versions
        .route(
            "/api/v1/case",
            get(caseversion_handlers::list_cases::<S>).post(caseversion_handlers::create_case::<S>),
        )
        .route(
            "/api/v1/case/:id",
            get(caseversion_handlers::get_case::<S>).delete(caseversion_handlers::delete_case::<S>),
        )
        .route(
            "/api/v1/caseversion",
            get(caseversion_handlers::list_caseversions::<S>)
                .post(caseversion_handlers::create_caseversion::<S>),
        )
        .route(
            "/api/v1/caseversion/:id",
            get(caseversion_handlers::get_caseversion::<S>)
                .put(caseversion_handlers::update_caseversion::<S>)
                .delete(caseversion_handlers::delete_caseversion::<S>),
        )
        .route(
            "/api/v1/casestep/:id",
            get(caseversion_handlers::get_casestep::<S>),
        )
        .route(
            "/api/v1/caseversionselection",
            get(caseversion_handlers::list_selections::<S>),
        )
        .route(
            "/api/v1/caseversionselection/:id",
            get(caseversion_handlers::get_selection::<S>),
        )
        // Tags and environments
        .route(
            "/api/v1/tag",
            get(tag_handlers::list_tags::<S>).post(tag_handlers::create_tag::<S>),
        )
        .route(
            "/api/v1/tag/:id",
            get(tag_handlers::get_tag::<S>)
                .put(tag_handlers::update_tag::<S>)
                .delete(tag_handlers::delete_tag::<S>),
        )
        .route(
            "/api/v1/environment",
            get(environment_handlers::list_environments::<S>)
                .post(environment_handlers::create_environment::<S>),
        )
        .route(
            "/api/v1/environment/:id",
            get(environment_handlers::get_environment::<S>)
                .put(environment_handlers::update_environment::<S>)
                .delete(environment_handlers::delete_environment::<S>),
        )
}

/// The full application: routes bound to `state`, accepting paths with or
/// without a trailing slash.
pub fn app<S: Store + 'static>(state: AppState<S>) -> NormalizePath<Router> {
    NormalizePathLayer::trim_trailing_slash().layer(create_router().with_state(state))
}

pub async fn serve<S: Store + 'static>(listener: TcpListener, state: AppState<S>) -> anyhow::Result<()> {
    let app = app(state);
    axum::serve(listener, ServiceExt::<Request>::into_make_service(app)).await?;
    Ok(())
}

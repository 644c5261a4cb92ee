use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::Json,
    routing::{get, post, put},
    Router,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use shared::*;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub shop: Arc<dyn Shop>,
    pub app_name: String,
}

#[derive(Debug, Deserialize)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateCartItemRequest {
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub message: String,
    #[serde(serialize_with = "shared::price::serialize")]
    pub total_amount: BigDecimal,
    pub items_purchased: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn error_response(err: ShopError) -> ApiError {
    let status = match &err {
        ShopError::NotFound { .. } => StatusCode::NOT_FOUND,
        ShopError::Conflict(_)
        | ShopError::InsufficientStock { .. }
        | ShopError::InvalidState(_)
        | ShopError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ShopError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!("Request failed: {}", err);
    } else {
        tracing::debug!("Request rejected: {:?}", err);
    }

    (
        status,
        Json(ErrorResponse {
            detail: err.to_string(),
        }),
    )
}

/// Builds the CORS layer. An empty list or `*` allows any origin.
pub fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return Ok(layer.allow_origin(Any));
    }

    let origins = origins
        .iter()
        .map(|o| HeaderValue::from_str(o))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(layer.allow_origin(origins))
}

pub fn create_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/products", get(list_products).post(create_product))
        .route("/products/", get(list_products).post(create_product))
        .route(
            "/products/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route(
            "/cart",
            get(list_cart).post(add_to_cart).delete(clear_cart),
        )
        .route(
            "/cart/",
            get(list_cart).post(add_to_cart).delete(clear_cart),
        )
        .route("/cart/checkout", post(checkout))
        .route("/cart/:id", put(update_cart_item).delete(remove_cart_item))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn root(State(state): State<AppState>) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: format!("Welcome to {}", state.app_name),
    })
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn create_product(
    State(state): State<AppState>,
    Json(request): Json<NewProduct>,
) -> ApiResult<Product> {
    let product = state.shop.create_product(request).await.map_err(error_response)?;
    Ok(Json(product))
}

pub async fn list_products(State(state): State<AppState>) -> ApiResult<Vec<Product>> {
    let products = state.shop.list_products().await.map_err(error_response)?;
    Ok(Json(products))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Product> {
    let product = state.shop.get_product(id).await.map_err(error_response)?;
    Ok(Json(product))
}

pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ProductUpdate>,
) -> ApiResult<Product> {
    let product = state
        .shop
        .update_product(id, request)
        .await
        .map_err(error_response)?;
    Ok(Json(product))
}

pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<MessageResponse> {
    state.shop.delete_product(id).await.map_err(error_response)?;
    Ok(Json(MessageResponse {
        message: format!("Product with ID {} has been deleted", id),
    }))
}

pub async fn list_cart(State(state): State<AppState>) -> ApiResult<Vec<CartLine>> {
    let lines = state.shop.list_cart().await.map_err(error_response)?;
    Ok(Json(lines))
}

pub async fn add_to_cart(
    State(state): State<AppState>,
    Json(request): Json<AddToCartRequest>,
) -> ApiResult<CartLine> {
    let line = state
        .shop
        .add_to_cart(request.product_id, request.quantity)
        .await
        .map_err(error_response)?;
    Ok(Json(line))
}

pub async fn update_cart_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateCartItemRequest>,
) -> ApiResult<CartLine> {
    let line = state
        .shop
        .update_cart_item(id, request.quantity)
        .await
        .map_err(error_response)?;
    Ok(Json(line))
}

pub async fn remove_cart_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<MessageResponse> {
    state.shop.remove_cart_item(id).await.map_err(error_response)?;
    Ok(Json(MessageResponse {
        message: format!("Cart item with ID {} has been removed", id),
    }))
}

pub async fn clear_cart(State(state): State<AppState>) -> ApiResult<MessageResponse> {
    state.shop.clear_cart().await.map_err(error_response)?;
    Ok(Json(MessageResponse {
        message: "Cart has been cleared".to_string(),
    }))
}

pub async fn checkout(State(state): State<AppState>) -> ApiResult<CheckoutResponse> {
    let summary = state.shop.checkout().await.map_err(error_response)?;
    Ok(Json(CheckoutResponse {
        message: "Checkout completed successfully".to_string(),
        total_amount: summary.total_amount,
        items_purchased: summary.items_purchased,
    }))
}

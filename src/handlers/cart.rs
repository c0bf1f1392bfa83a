use axum::{
    Json,
    extract::{Path, State},
};
use uuid::Uuid;

use crate::{
    AppState,
    cart::CartOwner,
    error::{AppError, AppResult},
    models::{AddCartItemRequest, Cart, Product, UpdateCartItemRequest},
};

/// Loads a product that can be put in a cart.
async fn purchasable_product(state: &AppState, product_id: Uuid) -> AppResult<Product> {
    state
        .repo
        .get_product(product_id)
        .await?
        .filter(|product| product.is_active)
        .ok_or_else(|| AppError::NotFound("product not found".into()))
}

fn check_stock(product: &Product, wanted: i32) -> AppResult<()> {
    if wanted > product.stock {
        return Err(AppError::BadRequest(format!(
            "only {} of '{}' in stock",
            product.stock, product.name
        )));
    }
    Ok(())
}

/// get_cart
///
/// [Public Route] The caller's cart: the user's when authenticated, otherwise the
/// one keyed by `x-session-id`. Created empty on first access.
#[utoipa::path(
    get,
    path = "/cart",
    params(("x-session-id" = Option<String>, Header, description = "Guest cart identity")),
    responses(
        (status = 200, description = "Cart", body = Cart),
        (status = 400, description = "No session header and no credentials")
    )
)]
pub async fn get_cart(
    State(state): State<AppState>,
    CartOwner(identity): CartOwner,
) -> AppResult<Json<Cart>> {
    Ok(Json(state.repo.get_or_create_cart(&identity).await?))
}

#[utoipa::path(
    delete,
    path = "/cart",
    responses((status = 200, description = "Emptied cart", body = Cart))
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    CartOwner(identity): CartOwner,
) -> AppResult<Json<Cart>> {
    let cart = state.repo.get_or_create_cart(&identity).await?;
    state.repo.clear_cart(cart.id).await?;
    Ok(Json(state.repo.get_or_create_cart(&identity).await?))
}

/// add_cart_item
///
/// [Public Route] Adds `quantity` units; an existing line grows. Only validates
/// against stock, which is not reserved until checkout.
#[utoipa::path(
    post,
    path = "/cart/items",
    request_body = AddCartItemRequest,
    responses(
        (status = 200, description = "Updated cart", body = Cart),
        (status = 400, description = "Invalid quantity or not enough stock"),
        (status = 404, description = "Unknown or inactive product")
    )
)]
pub async fn add_cart_item(
    State(state): State<AppState>,
    CartOwner(identity): CartOwner,
    Json(payload): Json<AddCartItemRequest>,
) -> AppResult<Json<Cart>> {
    if payload.quantity < 1 {
        return Err(AppError::BadRequest("quantity must be at least 1".into()));
    }
    let product = purchasable_product(&state, payload.product_id).await?;
    let cart = state.repo.get_or_create_cart(&identity).await?;

    let in_cart = cart
        .items
        .iter()
        .find(|line| line.product_id == product.id)
        .map_or(0, |line| line.quantity);
    check_stock(&product, in_cart.saturating_add(payload.quantity))?;

    state
        .repo
        .add_cart_item(cart.id, product.id, payload.quantity)
        .await?;
    Ok(Json(state.repo.get_or_create_cart(&identity).await?))
}

/// update_cart_item
///
/// [Public Route] Sets a line's quantity; `0` removes the line.
#[utoipa::path(
    put,
    path = "/cart/items/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product ID")),
    request_body = UpdateCartItemRequest,
    responses(
        (status = 200, description = "Updated cart", body = Cart),
        (status = 404, description = "Product not in cart")
    )
)]
pub async fn update_cart_item(
    State(state): State<AppState>,
    CartOwner(identity): CartOwner,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<UpdateCartItemRequest>,
) -> AppResult<Json<Cart>> {
    if payload.quantity < 0 {
        return Err(AppError::BadRequest("quantity must not be negative".into()));
    }
    if payload.quantity > 0 {
        let product = purchasable_product(&state, product_id).await?;
        check_stock(&product, payload.quantity)?;
    }

    let cart = state.repo.get_or_create_cart(&identity).await?;
    if !state
        .repo
        .set_cart_item(cart.id, product_id, payload.quantity)
        .await?
    {
        return Err(AppError::NotFound("product is not in the cart".into()));
    }
    Ok(Json(state.repo.get_or_create_cart(&identity).await?))
}

#[utoipa::path(
    delete,
    path = "/cart/items/{product_id}",
    params(("product_id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Updated cart", body = Cart),
        (status = 404, description = "Product not in cart")
    )
)]
pub async fn remove_cart_item(
    State(state): State<AppState>,
    CartOwner(identity): CartOwner,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<Cart>> {
    let cart = state.repo.get_or_create_cart(&identity).await?;
    if !state.repo.remove_cart_item(cart.id, product_id).await? {
        return Err(AppError::NotFound("product is not in the cart".into()));
    }
    Ok(Json(state.repo.get_or_create_cart(&identity).await?))
}

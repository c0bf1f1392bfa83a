use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    AppState,
    auth::AuthUser,
    cart::CartIdentity,
    checkout::{OrderStatus, price_order},
    error::{AppError, AppResult},
    models::{NewOrder, Order, PaymentSession, PlaceOrderRequest, UpdateOrderStatusRequest},
};

const MAX_ADDRESS_LENGTH: usize = 500;

/// Loads an order owned by `user_id`. Other users' orders look missing.
async fn own_order(state: &AppState, user_id: Uuid, id: Uuid) -> AppResult<Order> {
    state
        .repo
        .get_order(id)
        .await?
        .filter(|order| order.user_id == user_id)
        .ok_or_else(|| AppError::NotFound("order not found".into()))
}

/// place_order
///
/// [Authenticated Route] Turns the caller's cart into a pending order. Prices come
/// from the current product rows; stock is decremented atomically with the insert.
#[utoipa::path(
    post,
    path = "/orders",
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Order placed", body = Order),
        (status = 400, description = "Empty cart, missing address or unusable coupon"),
        (status = 409, description = "Insufficient stock")
    )
)]
pub async fn place_order(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<PlaceOrderRequest>,
) -> AppResult<(StatusCode, Json<Order>)> {
    let shipping_address = payload.shipping_address.trim();
    if shipping_address.is_empty() || shipping_address.chars().count() > MAX_ADDRESS_LENGTH {
        return Err(AppError::BadRequest(format!(
            "shipping_address must be between 1 and {MAX_ADDRESS_LENGTH} characters"
        )));
    }

    let cart = state
        .repo
        .get_or_create_cart(&CartIdentity::User(user.id))
        .await?;
    if cart.items.is_empty() {
        return Err(AppError::BadRequest("cart is empty".into()));
    }

    let coupon = match payload
        .coupon_code
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
    {
        Some(code) => Some(
            state
                .repo
                .get_coupon_by_code(code)
                .await?
                .ok_or_else(|| AppError::BadRequest("unknown coupon code".into()))?,
        ),
        None => None,
    };

    let pricing = price_order(&cart.items, coupon.as_ref(), Utc::now())
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let order = state
        .repo
        .create_order(NewOrder {
            user_id: user.id,
            cart_id: cart.id,
            lines: cart.items,
            pricing,
            coupon_id: coupon.as_ref().map(|c| c.id),
            coupon_code: coupon.map(|c| c.code),
            shipping_address: shipping_address.to_string(),
        })
        .await?;

    tracing::info!(
        order_id = %order.id,
        user_id = %user.id,
        total_cents = order.total_cents,
        "order placed"
    );
    Ok((StatusCode::CREATED, Json(order)))
}

/// list_my_orders
///
/// [Authenticated Route] The caller's orders, newest first.
#[utoipa::path(
    get,
    path = "/orders",
    responses((status = 200, description = "My orders", body = [Order]))
)]
pub async fn list_my_orders(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Order>>> {
    Ok(Json(state.repo.list_orders_for_user(user.id).await?))
}

#[utoipa::path(
    get,
    path = "/orders/{id}",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Found", body = Order),
        (status = 404, description = "Not Found or Not Yours")
    )
)]
pub async fn get_my_order(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Order>> {
    Ok(Json(own_order(&state, user.id, id).await?))
}

/// cancel_my_order
///
/// [Authenticated Route] Cancels a pending or paid order and puts its units back
/// in stock.
#[utoipa::path(
    post,
    path = "/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Cancelled", body = Order),
        (status = 404, description = "Not Found or Not Yours"),
        (status = 409, description = "Already shipped, delivered or cancelled")
    )
)]
pub async fn cancel_my_order(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Order>> {
    let order = own_order(&state, user.id, id).await?;
    if !order.status.is_cancellable() {
        return Err(AppError::Conflict(format!(
            "a {} order can no longer be cancelled",
            order.status
        )));
    }

    let cancelled = state
        .repo
        .cancel_order(id)
        .await?
        .ok_or_else(|| AppError::Conflict("order can no longer be cancelled".into()))?;

    tracing::info!(order_id = %id, "order cancelled by customer");
    Ok(Json(cancelled))
}

/// pay_order
///
/// [Authenticated Route] Opens a hosted checkout for a pending order. The order
/// becomes `paid` only once the provider's signed callback confirms it.
#[utoipa::path(
    post,
    path = "/orders/{id}/pay",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Checkout session", body = PaymentSession),
        (status = 409, description = "Order is not pending"),
        (status = 502, description = "Payment provider failure")
    )
)]
pub async fn pay_order(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PaymentSession>> {
    let order = own_order(&state, user.id, id).await?;
    if order.status != OrderStatus::Pending {
        return Err(AppError::Conflict(format!(
            "order is {}, not awaiting payment",
            order.status
        )));
    }

    let base = state.config.public_url.trim_end_matches('/');
    let return_url = format!("{base}/orders/{id}");
    let callback_url = format!("{base}/payment/callback");

    let session = state
        .payments
        .create_checkout(&order, &return_url, &callback_url)
        .await
        .map_err(AppError::Payment)?;

    if !state
        .repo
        .set_payment_reference(id, &session.reference)
        .await?
    {
        return Err(AppError::Conflict("order is no longer awaiting payment".into()));
    }

    Ok(Json(session))
}

// --- Admin ---

#[utoipa::path(
    get,
    path = "/admin/orders",
    responses((status = 200, description = "All orders", body = [Order]))
)]
pub async fn admin_list_orders(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Order>>> {
    user.require_admin()?;
    Ok(Json(state.repo.list_orders().await?))
}

/// admin_update_order_status
///
/// [Admin Route] Moves an order along its lifecycle. Only forward transitions are
/// accepted; cancelling restores stock.
#[utoipa::path(
    put,
    path = "/admin/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Updated", body = Order),
        (status = 400, description = "Transition not allowed"),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Status changed concurrently")
    )
)]
pub async fn admin_update_order_status(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> AppResult<Json<Order>> {
    user.require_admin()?;

    let order = state
        .repo
        .get_order(id)
        .await?
        .ok_or_else(|| AppError::NotFound("order not found".into()))?;

    if !order.status.can_transition_to(payload.status) {
        return Err(AppError::BadRequest(format!(
            "cannot move an order from {} to {}",
            order.status, payload.status
        )));
    }

    let updated = if payload.status == OrderStatus::Cancelled {
        state.repo.cancel_order(id).await?
    } else {
        state
            .repo
            .update_order_status(id, order.status, payload.status)
            .await?
    };

    let updated =
        updated.ok_or_else(|| AppError::Conflict("order status changed concurrently".into()))?;
    tracing::info!(order_id = %id, from = %order.status, to = %updated.status, "order status updated");
    Ok(Json(updated))
}

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};

use crate::{
    AppState,
    error::{AppError, AppResult},
    models::{Order, PaymentCallback},
    payment::{PAYMENT_FAILED, PAYMENT_SUCCEEDED, SIGNATURE_HEADER, verify_signature},
};

/// payment_callback
///
/// [Public Route] Webhook the payment provider calls when a checkout settles. The raw
/// body must carry a valid HMAC in `x-signature`. A `succeeded` callback marks the
/// pending order paid, but only for the reference `/pay` stored on the order;
/// repeating it for an order already paid with that reference is accepted. A
/// `failed` callback leaves the order pending so the customer can retry.
#[utoipa::path(
    post,
    path = "/payment/callback",
    request_body = PaymentCallback,
    params(("x-signature" = String, Header, description = "Hex HMAC-SHA256 of the body")),
    responses(
        (status = 200, description = "Processed", body = Order),
        (status = 401, description = "Missing or invalid signature"),
        (status = 404, description = "Unknown order"),
        (status = 409, description = "Order not payable or reference mismatch")
    )
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Order>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing payment signature".into()))?;

    if !verify_signature(&state.config.payment_secret, &body, signature) {
        tracing::warn!("payment callback with invalid signature");
        return Err(AppError::Unauthorized("invalid payment signature".into()));
    }

    let callback: PaymentCallback = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid callback body: {e}")))?;

    let order = state
        .repo
        .get_order(callback.order_id)
        .await?
        .ok_or_else(|| AppError::NotFound("order not found".into()))?;

    match callback.status.as_str() {
        PAYMENT_SUCCEEDED => {
            if let Some(paid) = state
                .repo
                .mark_order_paid(order.id, &callback.reference)
                .await?
            {
                tracing::info!(order_id = %paid.id, reference = %callback.reference, "order paid");
                return Ok(Json(paid));
            }
            let same_reference =
                order.payment_reference.as_deref() == Some(callback.reference.as_str());
            // Providers retry webhooks; a replay of the settling callback is fine.
            if same_reference && order.status.is_settled() {
                return Ok(Json(order));
            }
            if !same_reference {
                tracing::warn!(
                    order_id = %order.id,
                    reference = %callback.reference,
                    "payment callback for a checkout the order did not start"
                );
                return Err(AppError::Conflict(
                    "payment reference does not match the order's checkout".into(),
                ));
            }
            Err(AppError::Conflict(format!(
                "order is {} and cannot be marked paid",
                order.status
            )))
        }
        PAYMENT_FAILED => {
            tracing::warn!(order_id = %order.id, reference = %callback.reference, "payment failed");
            Ok(Json(order))
        }
        other => Err(AppError::BadRequest(format!("unknown payment status '{other}'"))),
    }
}

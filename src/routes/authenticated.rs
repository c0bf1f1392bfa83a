use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Customer features that need an account. Every handler receives the `AuthUser`
/// and scopes its reads and writes to that user; orders belonging to someone else
/// answer 404.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /me
        .route("/me", get(handlers::get_me))
        // --- Orders ---
        // POST /orders
        // Checks out the caller's cart. Stock is reserved in the same transaction.
        .route(
            "/orders",
            post(handlers::place_order).get(handlers::list_my_orders),
        )
        .route("/orders/{id}", get(handlers::get_my_order))
        // POST /orders/{id}/cancel
        // Pending or paid orders only; stock is returned.
        .route("/orders/{id}/cancel", post(handlers::cancel_my_order))
        // POST /orders/{id}/pay
        // Opens a hosted checkout session with the payment provider.
        .route("/orders/{id}/pay", post(handlers::pay_order))
        // POST /products/{id}/reviews
        // Held for moderation until an admin approves it.
        .route("/products/{id}/reviews", post(handlers::create_review))
        // --- Support chat ---
        .route(
            "/chat",
            get(handlers::get_my_chat).post(handlers::send_chat_message),
        )
}

use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, post, put},
};

/// Admin Router Module
///
/// Back-office endpoints, nested under `/admin`. The router is wrapped in the
/// authentication layer; each handler then calls `require_admin`, so a customer
/// token gets 403 rather than 401.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/stats
        // Dashboard counters: users, products, orders, revenue, moderation queue.
        .route("/stats", get(handlers::get_admin_stats))
        .route("/users", get(handlers::admin_list_users))
        .route("/users/{id}/role", put(handlers::admin_set_user_role))
        // --- Catalog management ---
        // GET /admin/products lists inactive products too.
        .route(
            "/products",
            get(handlers::admin_list_products).post(handlers::create_product),
        )
        .route(
            "/products/{id}",
            put(handlers::update_product).delete(handlers::delete_product),
        )
        .route("/categories", post(handlers::create_category))
        .route(
            "/categories/{id}",
            put(handlers::update_category).delete(handlers::delete_category),
        )
        .route("/filters", post(handlers::create_filter))
        .route(
            "/filters/{id}",
            put(handlers::update_filter).delete(handlers::delete_filter),
        )
        // --- Fulfilment ---
        .route("/orders", get(handlers::admin_list_orders))
        // PUT /admin/orders/{id}/status
        // Forward-only lifecycle moves; cancelling restores stock.
        .route(
            "/orders/{id}/status",
            put(handlers::admin_update_order_status),
        )
        .route(
            "/coupons",
            get(handlers::list_coupons).post(handlers::create_coupon),
        )
        .route("/coupons/{id}", delete(handlers::delete_coupon))
        // --- Moderation ---
        .route("/reviews/pending", get(handlers::list_pending_reviews))
        .route(
            "/reviews/{id}/approval",
            put(handlers::set_review_approval),
        )
        .route("/reviews/{id}", delete(handlers::delete_review))
        // --- Support inbox ---
        .route("/chat", get(handlers::admin_list_chat_threads))
        .route(
            "/chat/{user_id}",
            get(handlers::admin_get_chat).post(handlers::admin_reply_chat),
        )
        // POST /admin/upload/presigned
        // 10-minute URL for a direct product image upload to the bucket.
        .route("/upload/presigned", post(handlers::get_presigned_url))
}

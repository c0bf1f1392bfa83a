use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Public Router Module
///
/// Endpoints open to any client. Catalog reads only ever return active products.
/// Cart endpoints serve guests (by `x-session-id`) and signed-in users alike; the
/// `CartOwner` extractor decides which cart a request addresses.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for the load balancer.
        .route("/health", get(|| async { "ok" }))
        // --- Identity ---
        // POST /auth/register
        .route("/auth/register", post(handlers::register))
        // POST /auth/login
        // Issues a token. A guest cart named by `x-session-id` is merged into the
        // user's cart.
        .route("/auth/login", post(handlers::login))
        // --- Catalog ---
        // GET /products?category=..&tags=..&price=..&search=..&sort=..&page=..
        .route("/products", get(handlers::list_products))
        .route("/products/{id}", get(handlers::get_product))
        // GET /products/{id}/reviews
        // Approved reviews only. POST lives in the authenticated router.
        .route("/products/{id}/reviews", get(handlers::list_product_reviews))
        .route("/categories", get(handlers::list_categories))
        // GET /filters
        // Facet definitions the storefront renders as filter controls.
        .route("/filters", get(handlers::list_filters))
        // --- Cart ---
        .route("/cart", get(handlers::get_cart).delete(handlers::clear_cart))
        .route("/cart/items", post(handlers::add_cart_item))
        .route(
            "/cart/items/{product_id}",
            put(handlers::update_cart_item).delete(handlers::remove_cart_item),
        )
        // POST /payment/callback
        // Authenticated by HMAC signature instead of a user token.
        .route("/payment/callback", post(handlers::payment_callback))
}

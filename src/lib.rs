use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Domain rules, independent of HTTP and storage.
pub mod auth;
pub mod cart;
pub mod catalog;
pub mod checkout;

// Services and plumbing.
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod payment;
pub mod repository;
pub mod storage;

// Routing segregation (Public, Authenticated, Admin).
pub mod routes;
use auth::AuthUser;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use payment::{HttpPaymentGateway, MockPaymentGateway, PaymentState};
pub use repository::{MemoryRepository, PostgresRepository, RepositoryState};
pub use storage::{MockStorageService, S3StorageClient, StorageState};

/// ApiDoc
///
/// OpenAPI document for every routed handler, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        // auth
        handlers::register, handlers::login, handlers::get_me,
        // catalog
        handlers::list_products, handlers::get_product, handlers::admin_list_products,
        handlers::create_product, handlers::update_product, handlers::delete_product,
        handlers::list_categories, handlers::create_category, handlers::update_category,
        handlers::delete_category, handlers::list_filters, handlers::create_filter,
        handlers::update_filter, handlers::delete_filter,
        // cart
        handlers::get_cart, handlers::clear_cart, handlers::add_cart_item,
        handlers::update_cart_item, handlers::remove_cart_item,
        // orders and payment
        handlers::place_order, handlers::list_my_orders, handlers::get_my_order,
        handlers::cancel_my_order, handlers::pay_order, handlers::admin_list_orders,
        handlers::admin_update_order_status, handlers::payment_callback,
        // reviews
        handlers::list_product_reviews, handlers::create_review, handlers::list_pending_reviews,
        handlers::set_review_approval, handlers::delete_review,
        // chat
        handlers::get_my_chat, handlers::send_chat_message, handlers::admin_list_chat_threads,
        handlers::admin_get_chat, handlers::admin_reply_chat,
        // admin
        handlers::get_admin_stats, handlers::admin_list_users, handlers::admin_set_user_role,
        handlers::list_coupons,
        handlers::create_coupon, handlers::delete_coupon, handlers::get_presigned_url
    ),
    components(
        schemas(
            models::User, models::UpdateUserRoleRequest, models::RegisterRequest, models::LoginRequest, models::AuthResponse,
            models::Category, models::CategoryRequest, models::Filter, models::FilterRequest,
            models::Product, models::CreateProductRequest, models::UpdateProductRequest,
            models::ProductPage, models::CartLine, models::Cart, models::AddCartItemRequest,
            models::UpdateCartItemRequest, models::Coupon, models::CreateCouponRequest,
            models::Order, models::OrderItem, models::PlaceOrderRequest,
            models::UpdateOrderStatusRequest, models::Review, models::CreateReviewRequest,
            models::ChatMessage, models::ChatRequest, models::ChatThread,
            models::PresignedUrlRequest, models::PresignedUrlResponse, models::PaymentSession,
            models::PaymentCallback, models::AdminDashboardStats,
            checkout::OrderStatus, error::ErrorBody,
        )
    ),
    tags(
        (name = "storefront", description = "Storefront catalog, cart and checkout API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single shared container of services and configuration, cloned per request.
#[derive(Clone)]
pub struct AppState {
    /// Persistence: Postgres in production, in-memory in tests.
    pub repo: RepositoryState,
    /// Product image storage and presigned URL generation.
    pub storage: StorageState,
    /// Hosted checkout provider.
    pub payments: PaymentState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for StorageState {
    fn from_ref(app_state: &AppState) -> StorageState {
        app_state.storage.clone()
    }
}

impl FromRef<AppState> for PaymentState {
    fn from_ref(app_state: &AppState) -> PaymentState {
        app_state.payments.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Rejects the request with 401 unless `AuthUser` resolves. Applied as a
/// `route_layer` so unknown paths still 404.
async fn auth_middleware(_auth_user: AuthUser, request: Request, next: Next) -> Response {
    next.run(request).await
}

/// create_router
///
/// Assembles the routing tree, scoped middleware and the observability stack.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS Configuration
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Public: catalog browsing, guest carts, login, payment webhook.
        .merge(public::public_routes())
        // Authenticated: any signed-in user.
        .merge(
            authenticated::authenticated_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        // Admin: authenticated here, role checked inside each handler.
        .nest(
            "/admin",
            admin::admin_routes().route_layer(middleware::from_fn_with_state(
                state.clone(),
                auth_middleware,
            )),
        )
        .with_state(state);

    // 3. Observability and Correlation Layers
    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span per request carrying method, URI and the `x-request-id` so every log line
/// of a request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    cart::CartIdentity,
    catalog::ProductQuery,
    checkout::OrderStatus,
    error::RepositoryError,
    models::{
        AdminDashboardStats, Cart, Category, CategoryRequest, ChatMessage, ChatThread, Coupon,
        CreateCouponRequest, CreateProductRequest, CreateReviewRequest, Filter, FilterRequest,
        NewOrder, NewUser, Order, Product, ProductPage, Review, UpdateProductRequest, User,
    },
};

mod memory;
mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Active products below this many units count as low stock on the dashboard.
pub const LOW_STOCK_THRESHOLD: i32 = 5;

/// Repository Trait
///
/// The persistence contract the handlers program against. Implemented by
/// `PostgresRepository` for the running service and by `MemoryRepository` for the
/// test suite.
///
/// Methods returning `Option` or `bool` use `None`/`false` for "no such row" (or a
/// conditional update that did not apply); `Err` is reserved for real failures and
/// constraint violations.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    // Conflict if the email is already registered.
    async fn create_user(&self, user: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>>;
    // The user together with its password hash, for login.
    async fn get_user_credentials(&self, email: &str) -> RepoResult<Option<(User, String)>>;
    async fn list_users(&self) -> RepoResult<Vec<User>>;
    // None if the user does not exist.
    async fn set_user_role(&self, id: Uuid, role: &str) -> RepoResult<Option<User>>;

    // --- Categories ---
    async fn list_categories(&self) -> RepoResult<Vec<Category>>;
    async fn create_category(&self, req: CategoryRequest) -> RepoResult<Category>;
    async fn update_category(&self, id: Uuid, req: CategoryRequest) -> RepoResult<Option<Category>>;
    // Products of a deleted category become uncategorized.
    async fn delete_category(&self, id: Uuid) -> RepoResult<bool>;

    // --- Filters (facets) ---
    async fn list_filters(&self) -> RepoResult<Vec<Filter>>;
    async fn create_filter(&self, req: FilterRequest) -> RepoResult<Filter>;
    async fn update_filter(&self, id: Uuid, req: FilterRequest) -> RepoResult<Option<Filter>>;
    async fn delete_filter(&self, id: Uuid) -> RepoResult<bool>;

    // --- Products ---
    async fn list_products(&self, query: &ProductQuery) -> RepoResult<ProductPage>;
    async fn get_product(&self, id: Uuid) -> RepoResult<Option<Product>>;
    async fn create_product(&self, req: CreateProductRequest) -> RepoResult<Product>;
    // Partial update: only `Some` fields change.
    async fn update_product(&self, id: Uuid, req: UpdateProductRequest) -> RepoResult<Option<Product>>;
    async fn delete_product(&self, id: Uuid) -> RepoResult<bool>;

    // --- Carts ---
    // Creates the cart on first use. Concurrent creation for the same identity
    // resolves to the single stored cart.
    async fn get_or_create_cart(&self, identity: &CartIdentity) -> RepoResult<Cart>;
    // Adds `quantity` to the line, creating it if needed.
    async fn add_cart_item(&self, cart_id: Uuid, product_id: Uuid, quantity: i32) -> RepoResult<()>;
    // Sets the line quantity; 0 removes the line. False if the line does not exist.
    async fn set_cart_item(&self, cart_id: Uuid, product_id: Uuid, quantity: i32) -> RepoResult<bool>;
    async fn remove_cart_item(&self, cart_id: Uuid, product_id: Uuid) -> RepoResult<bool>;
    async fn clear_cart(&self, cart_id: Uuid) -> RepoResult<()>;
    // Folds the guest cart of `session_id` into the user's cart and deletes it.
    async fn merge_guest_cart(&self, session_id: &str, user_id: Uuid) -> RepoResult<Cart>;

    // --- Coupons ---
    async fn list_coupons(&self) -> RepoResult<Vec<Coupon>>;
    // Codes are matched case-insensitively.
    async fn get_coupon_by_code(&self, code: &str) -> RepoResult<Option<Coupon>>;
    async fn create_coupon(&self, req: CreateCouponRequest) -> RepoResult<Coupon>;
    async fn delete_coupon(&self, id: Uuid) -> RepoResult<bool>;

    // --- Orders ---
    // Atomically: decrement stock per line (Unavailable for an inactive or deleted
    // product, InsufficientStock if a line cannot be covered), insert order and items,
    // count the coupon use, and take the ordered quantities out of the cart.
    async fn create_order(&self, order: NewOrder) -> RepoResult<Order>;
    async fn list_orders_for_user(&self, user_id: Uuid) -> RepoResult<Vec<Order>>;
    async fn list_orders(&self) -> RepoResult<Vec<Order>>;
    async fn get_order(&self, id: Uuid) -> RepoResult<Option<Order>>;
    // Cancels a pending or paid order and restores its stock. None if the order is
    // missing or no longer cancellable.
    async fn cancel_order(&self, id: Uuid) -> RepoResult<Option<Order>>;
    // Compare-and-set status change. None if the order is not currently `from`.
    async fn update_order_status(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> RepoResult<Option<Order>>;
    async fn set_payment_reference(&self, id: Uuid, reference: &str) -> RepoResult<bool>;
    // pending -> paid. None unless the order is pending and `reference` is the one
    // stored by `set_payment_reference`.
    async fn mark_order_paid(&self, id: Uuid, reference: &str) -> RepoResult<Option<Order>>;

    // --- Reviews ---
    // Conflict if the user already reviewed the product.
    async fn create_review(
        &self,
        product_id: Uuid,
        user_id: Uuid,
        req: CreateReviewRequest,
    ) -> RepoResult<Review>;
    // Approved reviews only, newest first.
    async fn list_product_reviews(&self, product_id: Uuid) -> RepoResult<Vec<Review>>;
    async fn list_pending_reviews(&self) -> RepoResult<Vec<Review>>;
    // Also refreshes the product's rating aggregates.
    async fn set_review_approval(&self, id: Uuid, approved: bool) -> RepoResult<Option<Review>>;
    async fn delete_review(&self, id: Uuid) -> RepoResult<bool>;

    // --- Chat ---
    async fn add_chat_message(
        &self,
        user_id: Uuid,
        sender_id: Uuid,
        from_admin: bool,
        body: String,
    ) -> RepoResult<ChatMessage>;
    // Oldest first.
    async fn list_chat_messages(&self, user_id: Uuid) -> RepoResult<Vec<ChatMessage>>;
    // Most recently active first.
    async fn list_chat_threads(&self) -> RepoResult<Vec<ChatThread>>;

    // --- Dashboard ---
    async fn get_stats(&self) -> RepoResult<AdminDashboardStats>;
}

/// RepositoryState
///
/// The shared handle to the persistence layer held in `AppState`.
pub type RepositoryState = Arc<dyn Repository>;

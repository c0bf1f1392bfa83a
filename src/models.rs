use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::checkout::{OrderPricing, OrderStatus};

// --- Identity ---

/// User
///
/// A registered account. The password hash never leaves the repository layer.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    // RBAC field: 'customer' or 'admin'.
    pub role: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// NewUser
///
/// Internal insert payload produced by the registration handler after hashing.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: String,
}

/// Admin payload for promoting or demoting an account.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateUserRoleRequest {
    #[schema(example = "admin")]
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RegisterRequest {
    #[schema(example = "ada@example.com")]
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// AuthResponse
///
/// Returned by login: the signed bearer token plus the resolved account.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

// --- Catalog ---

/// Category
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    // URL-safe unique handle, used by the `category` listing parameter.
    pub slug: String,
    pub description: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CategoryRequest {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
}

/// Filter
///
/// An admin-configured facet shown next to product listings. `kind = "tag"` facets
/// narrow by product tags `key:option`; `kind = "price"` facets offer price ranges
/// (`"0-50"`, `"100+"`) that are sent back through the `price` parameter.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Filter {
    pub id: Uuid,
    pub name: String,
    pub key: String,
    pub kind: String,
    pub options: Vec<String>,
    pub position: i32,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct FilterRequest {
    pub name: String,
    pub key: String,
    #[schema(example = "tag")]
    pub kind: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub position: i32,
}

/// Product
///
/// Prices are integer minor units (cents). Tags are lower-cased on write; faceted
/// tags use the `key:value` form (`brand:acme`).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price_cents: i64,
    pub stock: i32,
    pub category_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub images: Vec<String>,
    pub is_active: bool,
    // Aggregates over approved reviews, refreshed on moderation.
    pub rating_avg: f64,
    pub rating_count: i32,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price_cents: i64,
    pub stock: i32,
    pub category_id: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
    // Storage keys obtained from the presigned upload flow.
    #[serde(default)]
    pub images: Vec<String>,
    pub is_active: Option<bool>,
}

/// UpdateProductRequest
///
/// Partial update: only `Some` fields are written.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateProductRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// ProductPage
///
/// One page of a filtered listing. `total` counts every match, not just this page.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct ProductPage {
    pub items: Vec<Product>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

// --- Cart ---

/// CartLine
///
/// A cart item joined with its product's current name, price and stock.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct CartLine {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i32,
    pub stock: i32,
    pub image: Option<String>,
}

/// Cart
///
/// Exactly one of `user_id` / `session_id` is set.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Cart {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub items: Vec<CartLine>,
    pub subtotal_cents: i64,
    pub item_count: i64,
}

impl Cart {
    /// Builds the response shape, deriving the totals from the lines.
    pub fn assemble(
        id: Uuid,
        user_id: Option<Uuid>,
        session_id: Option<String>,
        items: Vec<CartLine>,
    ) -> Self {
        let subtotal_cents = items
            .iter()
            .map(|line| line.unit_price_cents * i64::from(line.quantity))
            .sum();
        let item_count = items.iter().map(|line| i64::from(line.quantity)).sum();
        Self {
            id,
            user_id,
            session_id,
            items,
            subtotal_cents,
            item_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateCartItemRequest {
    pub quantity: i32,
}

// --- Coupons ---

/// Coupon
///
/// `kind = "percent"` takes `value` as a percentage (1..=100); `kind = "fixed"`
/// takes `value` in cents.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub kind: String,
    pub value: i64,
    pub min_order_cents: i64,
    pub max_uses: Option<i32>,
    pub used_count: i32,
    #[ts(type = "string | null")]
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateCouponRequest {
    pub code: String,
    #[schema(example = "percent")]
    pub kind: String,
    pub value: i64,
    #[serde(default)]
    pub min_order_cents: i64,
    pub max_uses: Option<i32>,
    #[ts(type = "string | null")]
    pub expires_at: Option<DateTime<Utc>>,
}

// --- Orders ---

/// Order
///
/// Line items snapshot the product name and price at purchase time.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    #[sqlx(try_from = "String")]
    pub status: OrderStatus,
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub coupon_code: Option<String>,
    pub shipping_address: String,
    pub payment_reference: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct OrderItem {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i32,
}

/// NewOrder
///
/// Internal payload: a priced cart ready to be turned into an order. The repository
/// decrements stock for every line, inserts the order, bumps the coupon and empties
/// the cart in a single unit of work.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub cart_id: Uuid,
    pub lines: Vec<CartLine>,
    pub pricing: OrderPricing,
    pub coupon_id: Option<Uuid>,
    pub coupon_code: Option<String>,
    pub shipping_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PlaceOrderRequest {
    pub shipping_address: String,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

// --- Reviews ---

/// Review
///
/// New reviews wait for moderation (`is_approved = false`) before they are listed
/// or counted in the product rating.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Review {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    // Loaded via a join on users.
    pub author_name: String,
    pub rating: i32,
    pub comment: String,
    pub is_approved: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateReviewRequest {
    pub rating: i32,
    #[serde(default)]
    pub comment: String,
}

// --- Chat ---

/// ChatMessage
///
/// One message in a customer's support conversation. `user_id` is the customer who
/// owns the conversation; `sender_id` is whoever wrote this message.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct ChatMessage {
    pub id: Uuid,
    pub user_id: Uuid,
    pub sender_id: Uuid,
    pub from_admin: bool,
    pub body: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ChatRequest {
    pub body: String,
}

/// ChatThread
///
/// Admin inbox entry: one row per customer conversation.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct ChatThread {
    pub user_id: Uuid,
    pub email: String,
    pub message_count: i64,
    #[ts(type = "string")]
    pub last_message_at: DateTime<Utc>,
}

// --- Uploads ---

/// PresignedUrlRequest
///
/// Input for a short-lived product image upload URL.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, TS, Default)]
#[ts(export)]
pub struct PresignedUrlRequest {
    /// Original filename, used to derive the extension.
    #[schema(example = "mug-front.jpg")]
    pub filename: String,
    /// MIME type; the upload is constrained to it. Must be `image/*`.
    #[schema(example = "image/jpeg")]
    pub file_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, Default)]
#[ts(export)]
pub struct PresignedUrlResponse {
    pub upload_url: String,
    /// Object key to store in `Product.images`.
    pub resource_key: String,
}

// --- Payments ---

/// PaymentSession
///
/// Where to send the customer to pay, and the gateway's reference for the attempt.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS, Default)]
#[ts(export)]
pub struct PaymentSession {
    pub payment_url: String,
    pub reference: String,
}

/// PaymentCallback
///
/// Body the gateway posts to `/payment/callback`, signed in `x-signature`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, TS)]
#[ts(export)]
pub struct PaymentCallback {
    pub order_id: Uuid,
    pub reference: String,
    #[schema(example = "succeeded")]
    pub status: String,
}

// --- Dashboard ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct AdminDashboardStats {
    pub total_users: i64,
    pub total_products: i64,
    pub total_orders: i64,
    /// Sum of `total_cents` over paid, shipped and delivered orders.
    pub revenue_cents: i64,
    pub pending_reviews: i64,
    /// Active products with fewer than five units left.
    pub low_stock_products: i64,
}

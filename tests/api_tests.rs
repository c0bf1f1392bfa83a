use serde_json::{Value, json};
use std::sync::Arc;
use storefront_api::{
    AppConfig, AppState, MemoryRepository, MockPaymentGateway, MockStorageService, create_router,
    auth::{ROLE_ADMIN, hash_password},
    models::{
        AuthResponse, Cart, CategoryRequest, CreateProductRequest, Order, PaymentSession, Product,
        ProductPage, Review, User, NewUser,
    },
    payment::{PaymentState, SIGNATURE_HEADER, sign_payload},
    repository::{Repository, RepositoryState},
    storage::StorageState,
};
use tokio::net::TcpListener;
use uuid::Uuid;

pub struct TestApp {
    pub address: String,
    pub repo: Arc<MemoryRepository>,
    pub config: AppConfig,
    pub client: reqwest::Client,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }
}

async fn spawn_app() -> TestApp {
    spawn_app_with_config(AppConfig::default()).await
}

async fn spawn_app_with_config(config: AppConfig) -> TestApp {
    let repo = Arc::new(MemoryRepository::new());

    let state = AppState {
        repo: repo.clone() as RepositoryState,
        storage: Arc::new(MockStorageService::new()) as StorageState,
        payments: Arc::new(MockPaymentGateway::new()) as PaymentState,
        config: config.clone(),
    };
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp {
        address,
        repo,
        config,
        client: reqwest::Client::new(),
    }
}

// --- Seeding helpers ---

async fn seed_admin(app: &TestApp) -> User {
    app.repo
        .create_user(NewUser {
            email: format!("admin-{}@shop.test", Uuid::new_v4()),
            name: "Admin".into(),
            password_hash: hash_password("admin-password").unwrap(),
            role: ROLE_ADMIN.into(),
        })
        .await
        .unwrap()
}

async fn seed_product(app: &TestApp, name: &str, price_cents: i64, stock: i32) -> Product {
    app.repo
        .create_product(CreateProductRequest {
            name: name.into(),
            price_cents,
            stock,
            ..CreateProductRequest::default()
        })
        .await
        .unwrap()
}

/// Registers and logs in a customer, returning the bearer token.
async fn customer_token(app: &TestApp, email: &str) -> String {
    let response = app
        .client
        .post(app.url("/auth/register"))
        .json(&json!({"email": email, "name": "Customer", "password": "hunter2hunter2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    let response = app
        .client
        .post(app.url("/auth/login"))
        .json(&json!({"email": email, "password": "hunter2hunter2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.json::<AuthResponse>().await.unwrap().token
}

async fn add_to_cart(app: &TestApp, token: &str, product_id: Uuid, quantity: i32) -> reqwest::Response {
    app.client
        .post(app.url("/cart/items"))
        .bearer_auth(token)
        .json(&json!({"product_id": product_id, "quantity": quantity}))
        .send()
        .await
        .unwrap()
}

// --- Tests ---

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;
    let response = app.client.get(app.url("/health")).send().await.unwrap();
    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_register_login_and_me() {
    let app = spawn_app().await;
    let token = customer_token(&app, "Ada@Example.com").await;

    let me: User = app
        .client
        .get(app.url("/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me.email, "ada@example.com");
    assert_eq!(me.role, "customer");

    // Same email, different case.
    let duplicate = app
        .client
        .post(app.url("/auth/register"))
        .json(&json!({"email": "ADA@example.com", "name": "Ada", "password": "hunter2hunter2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), 409);

    let wrong_password = app
        .client
        .post(app.url("/auth/login"))
        .json(&json!({"email": "ada@example.com", "password": "not-the-password"}))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong_password.status(), 401);
}

#[tokio::test]
async fn test_configured_admin_email_registers_an_admin() {
    let app = spawn_app_with_config(AppConfig {
        admin_email: Some("owner@shop.test".into()),
        ..AppConfig::default()
    })
    .await;

    let owner_token = customer_token(&app, "Owner@Shop.test").await;
    let owner: User = app
        .client
        .get(app.url("/me"))
        .bearer_auth(&owner_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(owner.role, "admin");

    let stats = app
        .client
        .get(app.url("/admin/stats"))
        .bearer_auth(&owner_token)
        .send()
        .await
        .unwrap();
    assert_eq!(stats.status(), 200);

    // Everyone else still registers as a customer.
    let staff_token = customer_token(&app, "staff@shop.test").await;
    let staff: User = app
        .client
        .get(app.url("/me"))
        .bearer_auth(&staff_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(staff.role, "customer");

    // The first admin promotes the next one.
    let promote = |role: &'static str, target: Uuid| {
        let request = app
            .client
            .put(app.url(&format!("/admin/users/{target}/role")))
            .bearer_auth(&owner_token)
            .json(&json!({"role": role}));
        async move { request.send().await.unwrap() }
    };
    assert_eq!(promote("superuser", staff.id).await.status(), 400);
    assert_eq!(promote("admin", owner.id).await.status(), 400);
    assert_eq!(promote("admin", Uuid::new_v4()).await.status(), 404);

    let response = promote("Admin", staff.id).await;
    assert_eq!(response.status(), 200);
    let promoted: User = response.json().await.unwrap();
    assert_eq!(promoted.role, "admin");

    let response = app
        .client
        .get(app.url("/admin/users"))
        .bearer_auth(&staff_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_register_rejects_short_password() {
    let app = spawn_app().await;
    let response = app
        .client
        .post(app.url("/auth/register"))
        .json(&json!({"email": "bob@example.com", "name": "Bob", "password": "short"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("password"));
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let app = spawn_app().await;

    let me = app.client.get(app.url("/me")).send().await.unwrap();
    assert_eq!(me.status(), 401);

    let bad_token = app
        .client
        .get(app.url("/orders"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(bad_token.status(), 401);

    let admin = app.client.get(app.url("/admin/stats")).send().await.unwrap();
    assert_eq!(admin.status(), 401);
}

#[tokio::test]
async fn test_customer_cannot_reach_admin_routes() {
    let app = spawn_app().await;
    let token = customer_token(&app, "eve@example.com").await;

    let response = app
        .client
        .get(app.url("/admin/stats"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);

    let response = app
        .client
        .post(app.url("/admin/products"))
        .bearer_auth(&token)
        .json(&json!({"name": "Sneaky", "price_cents": 100, "stock": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_cart_requires_identity() {
    let app = spawn_app().await;
    let response = app.client.get(app.url("/cart")).send().await.unwrap();
    assert_eq!(response.status(), 400);

    let response = app
        .client
        .get(app.url("/cart"))
        .header("x-session-id", "not a valid id!")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_guest_cart_merges_on_login() {
    let app = spawn_app().await;
    let mug = seed_product(&app, "Mug", 1200, 5).await;
    let lamp = seed_product(&app, "Lamp", 4500, 2).await;
    let session = "guest-session-1";

    // Guest fills a cart.
    for (product_id, quantity) in [(mug.id, 2), (lamp.id, 1)] {
        let response = app
            .client
            .post(app.url("/cart/items"))
            .header("x-session-id", session)
            .json(&json!({"product_id": product_id, "quantity": quantity}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    // The account already holds one mug.
    let token = customer_token(&app, "merge@example.com").await;
    assert_eq!(add_to_cart(&app, &token, mug.id, 1).await.status(), 200);

    let login = app
        .client
        .post(app.url("/auth/login"))
        .header("x-session-id", session)
        .json(&json!({"email": "merge@example.com", "password": "hunter2hunter2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(login.status(), 200);

    let cart: Cart = app
        .client
        .get(app.url("/cart"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let quantity_of = |id: Uuid| cart.items.iter().find(|l| l.product_id == id).map(|l| l.quantity);
    assert_eq!(quantity_of(mug.id), Some(3));
    assert_eq!(quantity_of(lamp.id), Some(1));
    assert_eq!(cart.subtotal_cents, 3 * 1200 + 4500);

    // The guest cart is gone; the session now starts empty.
    let guest: Cart = app
        .client
        .get(app.url("/cart"))
        .header("x-session-id", session)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(guest.items.is_empty());
}

#[tokio::test]
async fn test_cart_quantity_limited_by_stock() {
    let app = spawn_app().await;
    let product = seed_product(&app, "Rare Print", 9900, 2).await;
    let token = customer_token(&app, "stock@example.com").await;

    assert_eq!(add_to_cart(&app, &token, product.id, 2).await.status(), 200);
    assert_eq!(add_to_cart(&app, &token, product.id, 1).await.status(), 400);
    assert_eq!(add_to_cart(&app, &token, product.id, 0).await.status(), 400);
    assert_eq!(add_to_cart(&app, &token, Uuid::new_v4(), 1).await.status(), 404);

    // Setting the quantity to zero removes the line.
    let response = app
        .client
        .put(app.url(&format!("/cart/items/{}", product.id)))
        .bearer_auth(&token)
        .json(&json!({"quantity": 0}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let cart: Cart = response.json().await.unwrap();
    assert!(cart.items.is_empty());
}

#[tokio::test]
async fn test_product_listing_filters() {
    let app = spawn_app().await;
    let mugs = app
        .repo
        .create_category(CategoryRequest {
            name: "Mugs".into(),
            slug: "mugs".into(),
            description: None,
        })
        .await
        .unwrap();

    let seed = |name: &str, price_cents: i64, tags: &[&str], category_id: Option<Uuid>, is_active: bool| {
        CreateProductRequest {
            name: name.into(),
            price_cents,
            stock: 10,
            category_id,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            is_active: Some(is_active),
            ..CreateProductRequest::default()
        }
    };
    for request in [
        seed("Acme Mug", 1000, &["brand:acme", "color:red"], Some(mugs.id), true),
        seed("Globex Mug", 2500, &["brand:globex", "color:blue"], Some(mugs.id), true),
        seed("Globex Lamp", 8000, &["brand:globex"], None, true),
        seed("Retired Mug", 500, &["brand:acme"], Some(mugs.id), false),
    ] {
        app.repo.create_product(request).await.unwrap();
    }

    let list = |query: &'static str| {
        let url = app.url(&format!("/products{query}"));
        let client = app.client.clone();
        async move { client.get(url).send().await.unwrap() }
    };

    let all: ProductPage = list("").await.json().await.unwrap();
    assert_eq!(all.total, 3, "inactive products are hidden");

    let in_category: ProductPage = list("?category=mugs").await.json().await.unwrap();
    assert_eq!(in_category.total, 2);

    // Facet params: OR within a group, AND across groups.
    let globex: ProductPage = list("?brand=globex").await.json().await.unwrap();
    assert_eq!(globex.total, 2);
    let globex_blue: ProductPage = list("?brand=globex,acme&color=blue").await.json().await.unwrap();
    assert_eq!(globex_blue.total, 1);
    assert_eq!(globex_blue.items[0].name, "Globex Mug");

    let cheap: ProductPage = list("?price=0-20").await.json().await.unwrap();
    assert_eq!(cheap.total, 1);
    assert_eq!(cheap.items[0].name, "Acme Mug");

    let sorted: ProductPage = list("?sort=price_desc&limit=2").await.json().await.unwrap();
    assert_eq!(sorted.total, 3);
    assert_eq!(sorted.items.len(), 2);
    assert_eq!(sorted.items[0].name, "Globex Lamp");

    let searched: ProductPage = list("?search=lamp").await.json().await.unwrap();
    assert_eq!(searched.total, 1);

    assert_eq!(list("?sort=cheapest").await.status(), 400);
    assert_eq!(list("?price=abc").await.status(), 400);
    assert_eq!(list("?limit=1000").await.status(), 400);
}

#[tokio::test]
async fn test_inactive_product_is_not_found() {
    let app = spawn_app().await;
    let product = app
        .repo
        .create_product(CreateProductRequest {
            name: "Hidden".into(),
            price_cents: 100,
            stock: 1,
            is_active: Some(false),
            ..CreateProductRequest::default()
        })
        .await
        .unwrap();

    let response = app
        .client
        .get(app.url(&format!("/products/{}", product.id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_order_reserves_stock_and_cancel_restores_it() {
    let app = spawn_app().await;
    let product = seed_product(&app, "Kettle", 1500, 3).await;
    let token = customer_token(&app, "buyer@example.com").await;

    assert_eq!(add_to_cart(&app, &token, product.id, 2).await.status(), 200);

    let response = app
        .client
        .post(app.url("/orders"))
        .bearer_auth(&token)
        .json(&json!({"shipping_address": "1 Main Street, Dublin"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let order: Order = response.json().await.unwrap();
    assert_eq!(order.total_cents, 3000);
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.status.as_str(), "pending");

    let stock = app.repo.get_product(product.id).await.unwrap().unwrap().stock;
    assert_eq!(stock, 1);

    let cart: Cart = app
        .client
        .get(app.url("/cart"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(cart.items.is_empty(), "checkout empties the cart");

    // Ordering again with an empty cart is rejected.
    let response = app
        .client
        .post(app.url("/orders"))
        .bearer_auth(&token)
        .json(&json!({"shipping_address": "1 Main Street, Dublin"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = app
        .client
        .post(app.url(&format!("/orders/{}/cancel", order.id)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let cancelled: Order = response.json().await.unwrap();
    assert_eq!(cancelled.status.as_str(), "cancelled");

    let stock = app.repo.get_product(product.id).await.unwrap().unwrap().stock;
    assert_eq!(stock, 3);

    let again = app
        .client
        .post(app.url(&format!("/orders/{}/cancel", order.id)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 409);
}

#[tokio::test]
async fn test_checkout_fails_when_stock_ran_out() {
    let app = spawn_app().await;
    let product = seed_product(&app, "Limited Vinyl", 3000, 2).await;
    let token = customer_token(&app, "late@example.com").await;
    assert_eq!(add_to_cart(&app, &token, product.id, 2).await.status(), 200);

    // Someone else bought one in the meantime.
    app.repo
        .update_product(
            product.id,
            storefront_api::models::UpdateProductRequest {
                stock: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let response = app
        .client
        .post(app.url("/orders"))
        .bearer_auth(&token)
        .json(&json!({"shipping_address": "2 High Street"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    let stock = app.repo.get_product(product.id).await.unwrap().unwrap().stock;
    assert_eq!(stock, 1);
}

#[tokio::test]
async fn test_checkout_of_deactivated_product_is_unavailable() {
    let app = spawn_app().await;
    let product = seed_product(&app, "Seasonal Scarf", 2500, 5).await;
    let token = customer_token(&app, "scarf@example.com").await;
    assert_eq!(add_to_cart(&app, &token, product.id, 1).await.status(), 200);

    app.repo
        .update_product(
            product.id,
            storefront_api::models::UpdateProductRequest {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let response = app
        .client
        .post(app.url("/orders"))
        .bearer_auth(&token)
        .json(&json!({"shipping_address": "3 Frost Lane"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Seasonal Scarf is no longer available");

    let stock = app.repo.get_product(product.id).await.unwrap().unwrap().stock;
    assert_eq!(stock, 5);
}

#[tokio::test]
async fn test_orders_are_private() {
    let app = spawn_app().await;
    let product = seed_product(&app, "Scarf", 2000, 5).await;
    let owner = customer_token(&app, "owner@example.com").await;
    let other = customer_token(&app, "other@example.com").await;

    add_to_cart(&app, &owner, product.id, 1).await;
    let order: Order = app
        .client
        .post(app.url("/orders"))
        .bearer_auth(&owner)
        .json(&json!({"shipping_address": "3 Quay Road"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let response = app
        .client
        .get(app.url(&format!("/orders/{}", order.id)))
        .bearer_auth(&other)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let mine: Vec<Order> = app
        .client
        .get(app.url("/orders"))
        .bearer_auth(&other)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(mine.is_empty());
}

#[tokio::test]
async fn test_coupon_discount_applies_at_checkout() {
    let app = spawn_app().await;
    let admin = seed_admin(&app).await;
    let product = seed_product(&app, "Backpack", 5000, 10).await;

    let response = app
        .client
        .post(app.url("/admin/coupons"))
        .header("x-user-id", admin.id.to_string())
        .json(&json!({"code": " spring10 ", "kind": "percent", "value": 10, "max_uses": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let coupon: Value = response.json().await.unwrap();
    assert_eq!(coupon["code"], "SPRING10");

    let token = customer_token(&app, "saver@example.com").await;
    add_to_cart(&app, &token, product.id, 2).await;
    let response = app
        .client
        .post(app.url("/orders"))
        .bearer_auth(&token)
        .json(&json!({"shipping_address": "4 Park Lane", "coupon_code": "spring10"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let order: Order = response.json().await.unwrap();
    assert_eq!(order.subtotal_cents, 10000);
    assert_eq!(order.discount_cents, 1000);
    assert_eq!(order.total_cents, 9000);
    assert_eq!(order.coupon_code.as_deref(), Some("SPRING10"));

    // Single use: the second order cannot redeem it.
    add_to_cart(&app, &token, product.id, 1).await;
    let response = app
        .client
        .post(app.url("/orders"))
        .bearer_auth(&token)
        .json(&json!({"shipping_address": "4 Park Lane", "coupon_code": "SPRING10"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let unknown = app
        .client
        .post(app.url("/orders"))
        .bearer_auth(&token)
        .json(&json!({"shipping_address": "4 Park Lane", "coupon_code": "NOPE"}))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), 400);
}

#[tokio::test]
async fn test_payment_flow_with_signed_callback() {
    let app = spawn_app().await;
    let product = seed_product(&app, "Headphones", 7900, 4).await;
    let token = customer_token(&app, "payer@example.com").await;
    add_to_cart(&app, &token, product.id, 1).await;

    let order: Order = app
        .client
        .post(app.url("/orders"))
        .bearer_auth(&token)
        .json(&json!({"shipping_address": "5 River Walk"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let session: PaymentSession = app
        .client
        .post(app.url(&format!("/orders/{}/pay", order.id)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session.reference, format!("mock-{}", order.id));

    let body = serde_json::to_vec(&json!({
        "order_id": order.id,
        "reference": session.reference,
        "status": "succeeded",
    }))
    .unwrap();

    // Tampered signature.
    let response = app
        .client
        .post(app.url("/payment/callback"))
        .header(SIGNATURE_HEADER, "00ff")
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let signature = sign_payload(&app.config.payment_secret, &body).unwrap();
    let response = app
        .client
        .post(app.url("/payment/callback"))
        .header(SIGNATURE_HEADER, &signature)
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let paid: Order = response.json().await.unwrap();
    assert_eq!(paid.status.as_str(), "paid");

    // Provider retries are accepted.
    let replay = app
        .client
        .post(app.url("/payment/callback"))
        .header(SIGNATURE_HEADER, &signature)
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(replay.status(), 200);

    // A paid order cannot start a new checkout.
    let response = app
        .client
        .post(app.url(&format!("/orders/{}/pay", order.id)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn test_callback_for_another_checkout_does_not_settle_order() {
    let app = spawn_app().await;
    let product = seed_product(&app, "Lamp", 4200, 2).await;
    let token = customer_token(&app, "lamp@example.com").await;
    add_to_cart(&app, &token, product.id, 1).await;

    let order: Order = app
        .client
        .post(app.url("/orders"))
        .bearer_auth(&token)
        .json(&json!({"shipping_address": "9 Quay Street"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let send_callback = |reference: String| {
        let body = serde_json::to_vec(&json!({
            "order_id": order.id,
            "reference": reference,
            "status": "succeeded",
        }))
        .unwrap();
        let signature = sign_payload(&app.config.payment_secret, &body).unwrap();
        let request = app
            .client
            .post(app.url("/payment/callback"))
            .header(SIGNATURE_HEADER, signature)
            .body(body);
        async move { request.send().await.unwrap() }
    };

    // No checkout was started yet.
    let response = send_callback("ref-from-nowhere".into()).await;
    assert_eq!(response.status(), 409);

    let session: PaymentSession = app
        .client
        .post(app.url(&format!("/orders/{}/pay", order.id)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let response = send_callback("not-the-session-ref".into()).await;
    assert_eq!(response.status(), 409);

    let stored = app.repo.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status.as_str(), "pending");
    assert_eq!(stored.payment_reference.as_deref(), Some(session.reference.as_str()));

    let response = send_callback(session.reference.clone()).await;
    assert_eq!(response.status(), 200);
    let paid: Order = response.json().await.unwrap();
    assert_eq!(paid.status.as_str(), "paid");
    assert_eq!(paid.payment_reference, Some(session.reference));
}

#[tokio::test]
async fn test_admin_moves_order_through_lifecycle() {
    let app = spawn_app().await;
    let admin = seed_admin(&app).await;
    let product = seed_product(&app, "Desk", 15000, 2).await;
    let token = customer_token(&app, "desk@example.com").await;
    add_to_cart(&app, &token, product.id, 1).await;
    let order: Order = app
        .client
        .post(app.url("/orders"))
        .bearer_auth(&token)
        .json(&json!({"shipping_address": "6 Mill Lane"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let set_status = |status: &'static str| {
        let url = app.url(&format!("/admin/orders/{}/status", order.id));
        let request = app
            .client
            .put(url)
            .header("x-user-id", admin.id.to_string())
            .json(&json!({"status": status}));
        async move { request.send().await.unwrap() }
    };

    // Unpaid orders cannot ship.
    assert_eq!(set_status("shipped").await.status(), 400);
    assert_eq!(set_status("paid").await.status(), 200);
    assert_eq!(set_status("shipped").await.status(), 200);
    // Shipped orders cannot go back.
    assert_eq!(set_status("paid").await.status(), 400);
    assert_eq!(set_status("cancelled").await.status(), 400);
    let delivered: Order = set_status("delivered").await.json().await.unwrap();
    assert_eq!(delivered.status.as_str(), "delivered");

    let stats: Value = app
        .client
        .get(app.url("/admin/stats"))
        .header("x-user-id", admin.id.to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_orders"], 1);
    assert_eq!(stats["revenue_cents"], 15000);
    assert_eq!(stats["low_stock_products"], 1);
}

#[tokio::test]
async fn test_review_moderation() {
    let app = spawn_app().await;
    let admin = seed_admin(&app).await;
    let product = seed_product(&app, "Teapot", 3500, 10).await;
    let token = customer_token(&app, "critic@example.com").await;
    let reviews_url = app.url(&format!("/products/{}/reviews", product.id));

    let invalid = app
        .client
        .post(&reviews_url)
        .bearer_auth(&token)
        .json(&json!({"rating": 6, "comment": "Too good"}))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), 400);

    let response = app
        .client
        .post(&reviews_url)
        .bearer_auth(&token)
        .json(&json!({"rating": 4, "comment": "Pours well"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let review: Review = response.json().await.unwrap();
    assert!(!review.is_approved);

    let duplicate = app
        .client
        .post(&reviews_url)
        .bearer_auth(&token)
        .json(&json!({"rating": 5}))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), 409);

    // Hidden until approved.
    let public: Vec<Review> = app.client.get(&reviews_url).send().await.unwrap().json().await.unwrap();
    assert!(public.is_empty());

    let response = app
        .client
        .put(app.url(&format!("/admin/reviews/{}/approval", review.id)))
        .header("x-user-id", admin.id.to_string())
        .json(&true)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let public: Vec<Review> = app.client.get(&reviews_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(public.len(), 1);
    assert_eq!(public[0].author_name, "Customer");

    let rated = app.repo.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(rated.rating_count, 1);
    assert!((rated.rating_avg - 4.0).abs() < f64::EPSILON);

    let response = app
        .client
        .delete(app.url(&format!("/admin/reviews/{}", review.id)))
        .header("x-user-id", admin.id.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    let unrated = app.repo.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(unrated.rating_count, 0);
}

#[tokio::test]
async fn test_support_chat_roundtrip() {
    let app = spawn_app().await;
    let admin = seed_admin(&app).await;
    let token = customer_token(&app, "help@example.com").await;

    let empty = app
        .client
        .post(app.url("/chat"))
        .bearer_auth(&token)
        .json(&json!({"body": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), 400);

    let response = app
        .client
        .post(app.url("/chat"))
        .bearer_auth(&token)
        .json(&json!({"body": "Where is my parcel?"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let question: Value = response.json().await.unwrap();
    let customer_id = question["user_id"].as_str().unwrap().to_string();

    let threads: Value = app
        .client
        .get(app.url("/admin/chat"))
        .header("x-user-id", admin.id.to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(threads.as_array().unwrap().len(), 1);
    assert_eq!(threads[0]["email"], "help@example.com");

    let reply = app
        .client
        .post(app.url(&format!("/admin/chat/{customer_id}")))
        .header("x-user-id", admin.id.to_string())
        .json(&json!({"body": "It ships tomorrow."}))
        .send()
        .await
        .unwrap();
    assert_eq!(reply.status(), 201);

    let conversation: Value = app
        .client
        .get(app.url("/chat"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let messages = conversation.as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["from_admin"], false);
    assert_eq!(messages[1]["from_admin"], true);
    assert_eq!(messages[1]["body"], "It ships tomorrow.");
}

#[tokio::test]
async fn test_admin_presigned_upload() {
    let app = spawn_app().await;
    let admin = seed_admin(&app).await;

    let response = app
        .client
        .post(app.url("/admin/upload/presigned"))
        .header("x-user-id", admin.id.to_string())
        .json(&json!({"filename": "front.PNG", "file_type": "image/png"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    let key = body["resource_key"].as_str().unwrap();
    assert!(key.starts_with("products/"));
    assert!(key.ends_with(".png"));
    assert!(body["upload_url"].as_str().unwrap().contains(key));

    let response = app
        .client
        .post(app.url("/admin/upload/presigned"))
        .header("x-user-id", admin.id.to_string())
        .json(&json!({"filename": "notes.pdf", "file_type": "application/pdf"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

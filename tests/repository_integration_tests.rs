//! Runs against a real Postgres. Start the database, export DATABASE_URL and run
//! `cargo test -- --ignored`.

use storefront_api::{
    cart::CartIdentity,
    catalog::ProductQuery,
    checkout::{OrderStatus, price_order},
    error::RepositoryError,
    models::{
        CategoryRequest, CreateCouponRequest, CreateProductRequest, CreateReviewRequest, NewOrder,
        NewUser, Product, UpdateProductRequest, User,
    },
    repository::{PostgresRepository, Repository},
};
use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::test;
use uuid::Uuid;

// --- Test Context and Setup ---

struct DbTestContext {
    pool: PgPool,
}

impl DbTestContext {
    async fn setup() -> Self {
        dotenv::dotenv().ok();

        let db_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set to run integration tests");

        let pool = PgPool::connect(&db_url)
            .await
            .expect("Failed to connect to database for integration tests.");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run database migrations.");

        DbTestContext { pool }
    }

    fn repository(&self) -> PostgresRepository {
        PostgresRepository::new(self.pool.clone())
    }
}

// --- Test Data Helpers ---

async fn create_test_user(repo: &PostgresRepository, role: &str) -> User {
    repo.create_user(NewUser {
        email: format!("{}-{}@test.com", role, Uuid::new_v4()),
        name: "Integration".into(),
        password_hash: "hash".into(),
        role: role.into(),
    })
    .await
    .expect("Failed to create test user")
}

async fn create_test_product(repo: &PostgresRepository, price_cents: i64, stock: i32) -> Product {
    repo.create_product(CreateProductRequest {
        name: format!("Product {}", Uuid::new_v4()),
        price_cents,
        stock,
        tags: vec![format!("batch:{}", Uuid::new_v4().simple())],
        ..CreateProductRequest::default()
    })
    .await
    .expect("Failed to create test product")
}

async fn order_from_cart(repo: &PostgresRepository, user: &User, coupon_code: Option<&str>) -> Result<storefront_api::models::Order, RepositoryError> {
    let cart = repo.get_or_create_cart(&CartIdentity::User(user.id)).await?;
    let coupon = match coupon_code {
        Some(code) => repo.get_coupon_by_code(code).await?,
        None => None,
    };
    let pricing = price_order(&cart.items, coupon.as_ref(), Utc::now()).expect("pricing");
    repo.create_order(NewOrder {
        user_id: user.id,
        cart_id: cart.id,
        lines: cart.items,
        pricing,
        coupon_id: coupon.as_ref().map(|c| c.id),
        coupon_code: coupon.map(|c| c.code),
        shipping_address: "1 Test Street".into(),
    })
    .await
}

// --- Tests ---

#[test]
#[ignore]
async fn test_duplicate_email_is_conflict() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let user = create_test_user(&repo, "customer").await;

    let result = repo
        .create_user(NewUser {
            email: user.email.clone(),
            name: "Again".into(),
            password_hash: "hash".into(),
            role: "customer".into(),
        })
        .await;
    assert!(matches!(result, Err(RepositoryError::Conflict(_))));

    let (found, hash) = repo
        .get_user_credentials(&user.email)
        .await
        .unwrap()
        .expect("credentials");
    assert_eq!(found.id, user.id);
    assert_eq!(hash, "hash");
}

#[test]
#[ignore]
async fn test_listing_filters_by_tag_and_category() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let slug = format!("cat-{}", Uuid::new_v4().simple());
    let category = repo
        .create_category(CategoryRequest {
            name: "Integration".into(),
            slug: slug.clone(),
            description: None,
        })
        .await
        .unwrap();

    let product = repo
        .create_product(CreateProductRequest {
            name: "Tagged".into(),
            price_cents: 1234,
            stock: 1,
            category_id: Some(category.id),
            tags: vec![format!("run:{slug}")],
            ..CreateProductRequest::default()
        })
        .await
        .unwrap();

    let params = HashMap::from([
        ("category".to_string(), slug.clone()),
        ("run".to_string(), slug.clone()),
        ("price".to_string(), "12-13".to_string()),
    ]);
    let query = ProductQuery::from_params(&params).unwrap();
    let page = repo.list_products(&query).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, product.id);

    // Deleting the category leaves the product uncategorized.
    assert!(repo.delete_category(category.id).await.unwrap());
    let product = repo.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(product.category_id, None);
}

#[test]
#[ignore]
async fn test_cart_is_unique_per_identity() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let session = CartIdentity::Session(format!("it-{}", Uuid::new_v4().simple()));

    let (first, second) = tokio::join!(
        repo.get_or_create_cart(&session),
        repo.get_or_create_cart(&session)
    );
    assert_eq!(first.unwrap().id, second.unwrap().id);
}

#[test]
#[ignore]
async fn test_merge_guest_cart_clamps_to_stock() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let user = create_test_user(&repo, "customer").await;
    let product = create_test_product(&repo, 500, 3).await;
    let session_id = format!("it-{}", Uuid::new_v4().simple());

    let guest = repo
        .get_or_create_cart(&CartIdentity::Session(session_id.clone()))
        .await
        .unwrap();
    repo.add_cart_item(guest.id, product.id, 2).await.unwrap();
    let own = repo
        .get_or_create_cart(&CartIdentity::User(user.id))
        .await
        .unwrap();
    repo.add_cart_item(own.id, product.id, 2).await.unwrap();

    let merged = repo.merge_guest_cart(&session_id, user.id).await.unwrap();
    assert_eq!(merged.id, own.id);
    assert_eq!(merged.items.len(), 1);
    assert_eq!(merged.items[0].quantity, 3);

    let fresh = repo
        .get_or_create_cart(&CartIdentity::Session(session_id))
        .await
        .unwrap();
    assert_ne!(fresh.id, guest.id);
    assert!(fresh.items.is_empty());
}

#[test]
#[ignore]
async fn test_order_is_all_or_nothing() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let user = create_test_user(&repo, "customer").await;
    let plenty = create_test_product(&repo, 1000, 10).await;
    let scarce = create_test_product(&repo, 2000, 1).await;

    let cart = repo
        .get_or_create_cart(&CartIdentity::User(user.id))
        .await
        .unwrap();
    repo.add_cart_item(cart.id, plenty.id, 2).await.unwrap();
    repo.add_cart_item(cart.id, scarce.id, 2).await.unwrap();

    let result = order_from_cart(&repo, &user, None).await;
    assert!(matches!(result, Err(RepositoryError::InsufficientStock(_))));

    // The first line's decrement rolled back with the transaction.
    let plenty_now = repo.get_product(plenty.id).await.unwrap().unwrap();
    assert_eq!(plenty_now.stock, 10);
    let cart = repo
        .get_or_create_cart(&CartIdentity::User(user.id))
        .await
        .unwrap();
    assert_eq!(cart.items.len(), 2);
}

#[test]
#[ignore]
async fn test_order_lifecycle_and_coupon_usage() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let user = create_test_user(&repo, "customer").await;
    let product = create_test_product(&repo, 4000, 5).await;
    let code = format!("IT{}", Uuid::new_v4().simple()).to_uppercase();
    let coupon = repo
        .create_coupon(CreateCouponRequest {
            code: code.clone(),
            kind: "fixed".into(),
            value: 500,
            max_uses: Some(1),
            ..CreateCouponRequest::default()
        })
        .await
        .unwrap();

    let cart = repo
        .get_or_create_cart(&CartIdentity::User(user.id))
        .await
        .unwrap();
    repo.add_cart_item(cart.id, product.id, 2).await.unwrap();

    let order = order_from_cart(&repo, &user, Some(&code.to_lowercase()))
        .await
        .unwrap();
    assert_eq!(order.total_cents, 7500);
    assert_eq!(order.items.len(), 1);
    assert_eq!(repo.get_product(product.id).await.unwrap().unwrap().stock, 3);

    let used = repo
        .list_coupons()
        .await
        .unwrap()
        .into_iter()
        .find(|c| c.id == coupon.id)
        .unwrap();
    assert_eq!(used.used_count, 1);

    assert!(repo.set_payment_reference(order.id, "ref-it").await.unwrap());
    // A callback for some other checkout does not settle the order.
    assert!(repo.mark_order_paid(order.id, "ref-other").await.unwrap().is_none());
    let paid = repo.mark_order_paid(order.id, "ref-it").await.unwrap().unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    assert!(repo.mark_order_paid(order.id, "ref-it").await.unwrap().is_none());

    // Compare-and-set: a stale `from` does not apply.
    let stale = repo
        .update_order_status(order.id, OrderStatus::Pending, OrderStatus::Shipped)
        .await
        .unwrap();
    assert!(stale.is_none());

    let cancelled = repo.cancel_order(order.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(repo.get_product(product.id).await.unwrap().unwrap().stock, 5);
    assert!(repo.cancel_order(order.id).await.unwrap().is_none());
}

#[test]
#[ignore]
async fn test_review_approval_updates_rating() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let product = create_test_product(&repo, 100, 1).await;
    let first = create_test_user(&repo, "customer").await;
    let second = create_test_user(&repo, "customer").await;

    let a = repo
        .create_review(product.id, first.id, CreateReviewRequest { rating: 5, comment: "Great".into() })
        .await
        .unwrap();
    let b = repo
        .create_review(product.id, second.id, CreateReviewRequest { rating: 2, comment: String::new() })
        .await
        .unwrap();

    let duplicate = repo
        .create_review(product.id, first.id, CreateReviewRequest { rating: 1, comment: String::new() })
        .await;
    assert!(matches!(duplicate, Err(RepositoryError::Conflict(_))));

    repo.set_review_approval(a.id, true).await.unwrap();
    repo.set_review_approval(b.id, true).await.unwrap();
    let rated = repo.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(rated.rating_count, 2);
    assert!((rated.rating_avg - 3.5).abs() < 1e-9);

    repo.set_review_approval(b.id, false).await.unwrap();
    let rated = repo.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(rated.rating_count, 1);
    assert!((rated.rating_avg - 5.0).abs() < 1e-9);

    let listed = repo.list_product_reviews(product.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].author_name, "Integration");
}

#[test]
#[ignore]
async fn test_chat_threads_group_by_customer() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let customer = create_test_user(&repo, "customer").await;
    let admin = create_test_user(&repo, "admin").await;

    repo.add_chat_message(customer.id, customer.id, false, "Hi".into())
        .await
        .unwrap();
    repo.add_chat_message(customer.id, admin.id, true, "Hello".into())
        .await
        .unwrap();

    let messages = repo.list_chat_messages(customer.id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert!(!messages[0].from_admin);

    let thread = repo
        .list_chat_threads()
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.user_id == customer.id)
        .expect("thread listed");
    assert_eq!(thread.message_count, 2);
    assert_eq!(thread.email, customer.email);
}

#[test]
#[ignore]
async fn test_concurrent_checkouts_with_shared_products_both_succeed() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let first_product = create_test_product(&repo, 100, 50).await;
    let second_product = create_test_product(&repo, 100, 50).await;

    for _ in 0..5 {
        let alice = create_test_user(&repo, "customer").await;
        let bob = create_test_user(&repo, "customer").await;

        // Opposite cart order for the two buyers.
        let cart = repo.get_or_create_cart(&CartIdentity::User(alice.id)).await.unwrap();
        repo.add_cart_item(cart.id, first_product.id, 1).await.unwrap();
        repo.add_cart_item(cart.id, second_product.id, 1).await.unwrap();
        let cart = repo.get_or_create_cart(&CartIdentity::User(bob.id)).await.unwrap();
        repo.add_cart_item(cart.id, second_product.id, 1).await.unwrap();
        repo.add_cart_item(cart.id, first_product.id, 1).await.unwrap();

        let (a, b) = tokio::join!(
            order_from_cart(&repo, &alice, None),
            order_from_cart(&repo, &bob, None)
        );
        assert!(a.is_ok(), "first checkout failed: {:?}", a.err());
        assert!(b.is_ok(), "second checkout failed: {:?}", b.err());
    }

    let stock = repo.get_product(first_product.id).await.unwrap().unwrap().stock;
    assert_eq!(stock, 40);
}

#[test]
#[ignore]
async fn test_checkout_keeps_lines_added_after_pricing() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let user = create_test_user(&repo, "customer").await;
    let priced_product = create_test_product(&repo, 300, 10).await;
    let late_product = create_test_product(&repo, 700, 10).await;

    let cart = repo.get_or_create_cart(&CartIdentity::User(user.id)).await.unwrap();
    repo.add_cart_item(cart.id, priced_product.id, 2).await.unwrap();
    let priced = repo.get_or_create_cart(&CartIdentity::User(user.id)).await.unwrap();

    repo.add_cart_item(cart.id, priced_product.id, 1).await.unwrap();
    repo.add_cart_item(cart.id, late_product.id, 1).await.unwrap();

    let pricing = price_order(&priced.items, None, Utc::now()).expect("pricing");
    repo.create_order(NewOrder {
        user_id: user.id,
        cart_id: cart.id,
        lines: priced.items,
        pricing,
        coupon_id: None,
        coupon_code: None,
        shipping_address: "1 Test Street".into(),
    })
    .await
    .unwrap();

    let left = repo.get_or_create_cart(&CartIdentity::User(user.id)).await.unwrap();
    assert_eq!(left.items.len(), 2);
    let leftover = left
        .items
        .iter()
        .find(|line| line.product_id == priced_product.id)
        .expect("remaining unit");
    assert_eq!(leftover.quantity, 1);
    assert!(left.items.iter().any(|line| line.product_id == late_product.id));
}

#[test]
#[ignore]
async fn test_deactivated_product_is_unavailable_at_checkout() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let user = create_test_user(&repo, "customer").await;
    let product = create_test_product(&repo, 900, 5).await;

    let cart = repo.get_or_create_cart(&CartIdentity::User(user.id)).await.unwrap();
    repo.add_cart_item(cart.id, product.id, 1).await.unwrap();
    repo.update_product(
        product.id,
        UpdateProductRequest {
            is_active: Some(false),
            ..UpdateProductRequest::default()
        },
    )
    .await
    .unwrap();

    let result = order_from_cart(&repo, &user, None).await;
    assert!(matches!(result, Err(RepositoryError::Unavailable(_))));
}

#[test]
#[ignore]
async fn test_set_user_role() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let user = create_test_user(&repo, "customer").await;

    let promoted = repo.set_user_role(user.id, "admin").await.unwrap().unwrap();
    assert_eq!(promoted.role, "admin");
    assert!(repo.set_user_role(Uuid::new_v4(), "admin").await.unwrap().is_none());
}

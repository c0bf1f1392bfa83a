use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres, postgres::PgExecutor, query_builder::QueryBuilder};
use uuid::Uuid;

use super::{LOW_STOCK_THRESHOLD, RepoResult, Repository};
use crate::{
    cart::{CartIdentity, clamp_to_stock, merge_lines},
    catalog::ProductQuery,
    checkout::OrderStatus,
    error::RepositoryError,
    models::{
        AdminDashboardStats, Cart, CartLine, Category, CategoryRequest, ChatMessage, ChatThread,
        Coupon, CreateCouponRequest, CreateProductRequest, CreateReviewRequest, Filter,
        FilterRequest, NewOrder, NewUser, Order, OrderItem, Product, ProductPage, Review,
        UpdateProductRequest, User,
    },
};

const USER_COLUMNS: &str = "id, email, name, role, created_at";

const PRODUCT_COLUMNS: &str = "id, name, description, price_cents, stock, category_id, tags, \
     images, is_active, rating_avg, rating_count, created_at, updated_at";

const PRODUCT_SELECT: &str = "SELECT p.id, p.name, p.description, p.price_cents, p.stock, \
     p.category_id, p.tags, p.images, p.is_active, p.rating_avg, p.rating_count, \
     p.created_at, p.updated_at FROM products p";

const ORDER_COLUMNS: &str = "id, user_id, status, subtotal_cents, discount_cents, total_cents, \
     coupon_code, shipping_address, payment_reference, created_at, updated_at";

const COUPON_COLUMNS: &str =
    "id, code, kind, value, min_order_cents, max_uses, used_count, expires_at, is_active, created_at";

const REVIEW_SELECT: &str = "SELECT r.id, r.product_id, r.user_id, u.name AS author_name, \
     r.rating, r.comment, r.is_approved, r.created_at \
     FROM reviews r JOIN users u ON u.id = r.user_id";

const CART_LINES: &str = "SELECT ci.product_id, p.name, p.price_cents AS unit_price_cents, \
     ci.quantity, p.stock, p.images[1] AS image \
     FROM cart_items ci JOIN products p ON p.id = ci.product_id \
     WHERE ci.cart_id = $1 ORDER BY ci.added_at, ci.product_id";

#[derive(FromRow)]
struct CartRow {
    id: Uuid,
    user_id: Option<Uuid>,
    session_id: Option<String>,
}

#[derive(FromRow)]
struct UserCredentials {
    #[sqlx(flatten)]
    user: User,
    password_hash: String,
}

/// PostgresRepository
///
/// The `Repository` backed by PostgreSQL. Every query goes through runtime-checked
/// `query_as`/`QueryBuilder` with bound parameters.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_cart(&self, identity: &CartIdentity) -> RepoResult<Option<CartRow>> {
        let row = match identity {
            CartIdentity::User(user_id) => {
                sqlx::query_as::<_, CartRow>(
                    "SELECT id, user_id, session_id FROM carts WHERE user_id = $1",
                )
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?
            }
            CartIdentity::Session(session_id) => {
                sqlx::query_as::<_, CartRow>(
                    "SELECT id, user_id, session_id FROM carts WHERE session_id = $1",
                )
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?
            }
        };
        Ok(row)
    }

    /// find_or_insert_cart
    ///
    /// Looks the cart up and inserts it when missing. Two first requests for the same
    /// identity can both miss the lookup; the loser of the insert hits the unique index
    /// and re-reads the winner's row instead of failing.
    async fn find_or_insert_cart(&self, identity: &CartIdentity) -> RepoResult<CartRow> {
        if let Some(row) = self.find_cart(identity).await? {
            return Ok(row);
        }

        let (user_id, session_id) = match identity {
            CartIdentity::User(id) => (Some(*id), None),
            CartIdentity::Session(session) => (None, Some(session.clone())),
        };

        let inserted = sqlx::query_as::<_, CartRow>(
            "INSERT INTO carts (id, user_id, session_id) VALUES ($1, $2, $3) \
             RETURNING id, user_id, session_id",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(session_id)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => Ok(row),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tracing::debug!(?identity, "concurrent cart creation, re-reading existing cart");
                self.find_cart(identity)
                    .await?
                    .ok_or_else(|| RepositoryError::NotFound("cart".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn attach_items(&self, mut orders: Vec<Order>) -> RepoResult<Vec<Order>> {
        if orders.is_empty() {
            return Ok(orders);
        }
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let items = sqlx::query_as::<_, OrderItem>(
            "SELECT order_id, product_id, name, unit_price_cents, quantity \
             FROM order_items WHERE order_id = ANY($1) ORDER BY name",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        for order in &mut orders {
            order.items = items
                .iter()
                .filter(|item| item.order_id == order.id)
                .cloned()
                .collect();
        }
        Ok(orders)
    }

    async fn get_review(&self, id: Uuid) -> RepoResult<Option<Review>> {
        let review = sqlx::query_as::<_, Review>(&format!("{REVIEW_SELECT} WHERE r.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(review)
    }
}

async fn cart_lines<'e>(executor: impl PgExecutor<'e>, cart_id: Uuid) -> RepoResult<Vec<CartLine>> {
    let lines = sqlx::query_as::<_, CartLine>(CART_LINES)
        .bind(cart_id)
        .fetch_all(executor)
        .await?;
    Ok(lines)
}

/// Recomputes a product's rating aggregates from its approved reviews.
async fn refresh_rating<'e>(executor: impl PgExecutor<'e>, product_id: Uuid) -> RepoResult<()> {
    sqlx::query(
        "UPDATE products SET \
             rating_avg = COALESCE((SELECT AVG(rating)::float8 FROM reviews \
                                    WHERE product_id = $1 AND is_approved), 0), \
             rating_count = (SELECT COUNT(*)::int FROM reviews \
                             WHERE product_id = $1 AND is_approved) \
         WHERE id = $1",
    )
    .bind(product_id)
    .execute(executor)
    .await?;
    Ok(())
}

/// Like `RepositoryError::from_unique`, also mapping foreign key violations to `NotFound`.
fn map_write_error(err: sqlx::Error, conflict: &str, missing: &str) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.is_foreign_key_violation()
    {
        return RepositoryError::NotFound(missing.to_owned());
    }
    RepositoryError::from_unique(err, conflict)
}

#[async_trait]
impl Repository for PostgresRepository {
    // --- Users ---

    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, email, name, password_hash, role) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(&user.role)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_unique(e, "email is already registered"))
    }

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn get_user_credentials(&self, email: &str) -> RepoResult<Option<(User, String)>> {
        let row = sqlx::query_as::<_, UserCredentials>(&format!(
            "SELECT {USER_COLUMNS}, password_hash FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| (r.user, r.password_hash)))
    }

    async fn list_users(&self) -> RepoResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn set_user_role(&self, id: Uuid, role: &str) -> RepoResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET role = $2 WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(role)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    // --- Categories ---

    async fn list_categories(&self) -> RepoResult<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>(
            "SELECT id, name, slug, description, created_at FROM categories ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(categories)
    }

    async fn create_category(&self, req: CategoryRequest) -> RepoResult<Category> {
        sqlx::query_as::<_, Category>(
            "INSERT INTO categories (id, name, slug, description) VALUES ($1, $2, $3, $4) \
             RETURNING id, name, slug, description, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(&req.name)
        .bind(&req.slug)
        .bind(&req.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_unique(e, "category slug already exists"))
    }

    async fn update_category(&self, id: Uuid, req: CategoryRequest) -> RepoResult<Option<Category>> {
        sqlx::query_as::<_, Category>(
            "UPDATE categories SET name = $2, slug = $3, description = $4 WHERE id = $1 \
             RETURNING id, name, slug, description, created_at",
        )
        .bind(id)
        .bind(&req.name)
        .bind(&req.slug)
        .bind(&req.description)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_unique(e, "category slug already exists"))
    }

    async fn delete_category(&self, id: Uuid) -> RepoResult<bool> {
        // products.category_id is ON DELETE SET NULL.
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- Filters ---

    async fn list_filters(&self) -> RepoResult<Vec<Filter>> {
        let filters = sqlx::query_as::<_, Filter>(
            "SELECT id, name, key, kind, options, position, created_at FROM filters \
             ORDER BY position, name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(filters)
    }

    async fn create_filter(&self, req: FilterRequest) -> RepoResult<Filter> {
        sqlx::query_as::<_, Filter>(
            "INSERT INTO filters (id, name, key, kind, options, position) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id, name, key, kind, options, position, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(&req.name)
        .bind(&req.key)
        .bind(&req.kind)
        .bind(&req.options)
        .bind(req.position)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_unique(e, "filter key already exists"))
    }

    async fn update_filter(&self, id: Uuid, req: FilterRequest) -> RepoResult<Option<Filter>> {
        sqlx::query_as::<_, Filter>(
            "UPDATE filters SET name = $2, key = $3, kind = $4, options = $5, position = $6 \
             WHERE id = $1 RETURNING id, name, key, kind, options, position, created_at",
        )
        .bind(id)
        .bind(&req.name)
        .bind(&req.key)
        .bind(&req.kind)
        .bind(&req.options)
        .bind(req.position)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_unique(e, "filter key already exists"))
    }

    async fn delete_filter(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM filters WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- Products ---

    /// list_products
    ///
    /// Runs the same rendered predicate twice: once under `COUNT(*)` for the total,
    /// once with ordering and pagination for the page itself.
    async fn list_products(&self, query: &ProductQuery) -> RepoResult<ProductPage> {
        let mut count: QueryBuilder<Postgres> = QueryBuilder::new("SELECT COUNT(*) FROM products p");
        query.push_conditions(&mut count);
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut select: QueryBuilder<Postgres> = QueryBuilder::new(PRODUCT_SELECT);
        query.push_conditions(&mut select);
        query.push_ordering(&mut select);
        let items = select
            .build_query_as::<Product>()
            .fetch_all(&self.pool)
            .await?;

        Ok(ProductPage {
            items,
            total,
            page: query.page,
            limit: query.limit,
        })
    }

    async fn get_product(&self, id: Uuid) -> RepoResult<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!("{PRODUCT_SELECT} WHERE p.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(product)
    }

    async fn create_product(&self, req: CreateProductRequest) -> RepoResult<Product> {
        sqlx::query_as::<_, Product>(&format!(
            "INSERT INTO products \
                 (id, name, description, price_cents, stock, category_id, tags, images, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&req.name)
        .bind(&req.description)
        .bind(req.price_cents)
        .bind(req.stock)
        .bind(req.category_id)
        .bind(&req.tags)
        .bind(&req.images)
        .bind(req.is_active.unwrap_or(true))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "product already exists", "category"))
    }

    async fn update_product(&self, id: Uuid, req: UpdateProductRequest) -> RepoResult<Option<Product>> {
        sqlx::query_as::<_, Product>(&format!(
            "UPDATE products SET \
                 name = COALESCE($2, name), \
                 description = COALESCE($3, description), \
                 price_cents = COALESCE($4, price_cents), \
                 stock = COALESCE($5, stock), \
                 category_id = COALESCE($6, category_id), \
                 tags = COALESCE($7, tags), \
                 images = COALESCE($8, images), \
                 is_active = COALESCE($9, is_active), \
                 updated_at = NOW() \
             WHERE id = $1 RETURNING {PRODUCT_COLUMNS}"
        ))
        .bind(id)
        .bind(req.name)
        .bind(req.description)
        .bind(req.price_cents)
        .bind(req.stock)
        .bind(req.category_id)
        .bind(req.tags)
        .bind(req.images)
        .bind(req.is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "product already exists", "category"))
    }

    async fn delete_product(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- Carts ---

    async fn get_or_create_cart(&self, identity: &CartIdentity) -> RepoResult<Cart> {
        let row = self.find_or_insert_cart(identity).await?;
        let lines = cart_lines(&self.pool, row.id).await?;
        Ok(Cart::assemble(row.id, row.user_id, row.session_id, lines))
    }

    async fn add_cart_item(&self, cart_id: Uuid, product_id: Uuid, quantity: i32) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO cart_items (cart_id, product_id, quantity) VALUES ($1, $2, $3) \
             ON CONFLICT (cart_id, product_id) \
             DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity",
        )
        .bind(cart_id)
        .bind(product_id)
        .bind(quantity)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "cart line already exists", "product"))?;

        sqlx::query("UPDATE carts SET updated_at = NOW() WHERE id = $1")
            .bind(cart_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_cart_item(&self, cart_id: Uuid, product_id: Uuid, quantity: i32) -> RepoResult<bool> {
        if quantity <= 0 {
            return self.remove_cart_item(cart_id, product_id).await;
        }
        let result = sqlx::query(
            "UPDATE cart_items SET quantity = $3 WHERE cart_id = $1 AND product_id = $2",
        )
        .bind(cart_id)
        .bind(product_id)
        .bind(quantity)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_cart_item(&self, cart_id: Uuid, product_id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM cart_items WHERE cart_id = $1 AND product_id = $2")
            .bind(cart_id)
            .bind(product_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_cart(&self, cart_id: Uuid) -> RepoResult<()> {
        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// merge_guest_cart
    ///
    /// Locks the guest cart, rewrites the user's lines as the stock-clamped union of
    /// both carts, then drops the guest cart. A missing guest cart is a no-op.
    async fn merge_guest_cart(&self, session_id: &str, user_id: Uuid) -> RepoResult<Cart> {
        let user_cart = self.find_or_insert_cart(&CartIdentity::User(user_id)).await?;

        let mut tx = self.pool.begin().await?;

        let guest_cart_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM carts WHERE session_id = $1 FOR UPDATE",
        )
        .bind(session_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(guest_cart_id) = guest_cart_id {
            sqlx::query("SELECT id FROM carts WHERE id = $1 FOR UPDATE")
                .bind(user_cart.id)
                .execute(&mut *tx)
                .await?;

            let user_lines = cart_lines(&mut *tx, user_cart.id).await?;
            let guest_lines = cart_lines(&mut *tx, guest_cart_id).await?;
            let merged = clamp_to_stock(merge_lines(&user_lines, &guest_lines));

            sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
                .bind(user_cart.id)
                .execute(&mut *tx)
                .await?;

            for line in &merged {
                sqlx::query(
                    "INSERT INTO cart_items (cart_id, product_id, quantity) VALUES ($1, $2, $3)",
                )
                .bind(user_cart.id)
                .bind(line.product_id)
                .bind(line.quantity)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query("DELETE FROM carts WHERE id = $1")
                .bind(guest_cart_id)
                .execute(&mut *tx)
                .await?;

            tracing::info!(
                %user_id,
                merged_lines = merged.len(),
                "merged guest cart into user cart"
            );
        }

        tx.commit().await?;

        let lines = cart_lines(&self.pool, user_cart.id).await?;
        Ok(Cart::assemble(user_cart.id, user_cart.user_id, None, lines))
    }

    // --- Coupons ---

    async fn list_coupons(&self) -> RepoResult<Vec<Coupon>> {
        let coupons = sqlx::query_as::<_, Coupon>(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(coupons)
    }

    async fn get_coupon_by_code(&self, code: &str) -> RepoResult<Option<Coupon>> {
        let coupon = sqlx::query_as::<_, Coupon>(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupons WHERE UPPER(code) = UPPER($1)"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(coupon)
    }

    async fn create_coupon(&self, req: CreateCouponRequest) -> RepoResult<Coupon> {
        sqlx::query_as::<_, Coupon>(&format!(
            "INSERT INTO coupons (id, code, kind, value, min_order_cents, max_uses, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {COUPON_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&req.code)
        .bind(&req.kind)
        .bind(req.value)
        .bind(req.min_order_cents)
        .bind(req.max_uses)
        .bind(req.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryError::from_unique(e, "coupon code already exists"))
    }

    async fn delete_coupon(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM coupons WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- Orders ---

    /// create_order
    ///
    /// One transaction. Each stock decrement is conditional on enough units being
    /// left, so concurrent checkouts can never drive stock negative; the first line
    /// that cannot be covered aborts the whole order. Product rows are locked in
    /// `product_id` order so two checkouts sharing products cannot deadlock.
    async fn create_order(&self, order: NewOrder) -> RepoResult<Order> {
        let mut tx = self.pool.begin().await?;

        let mut lines: Vec<_> = order.lines.iter().collect();
        lines.sort_by_key(|line| line.product_id);

        for line in lines {
            let updated = sqlx::query(
                "UPDATE products SET stock = stock - $2, updated_at = NOW() \
                 WHERE id = $1 AND is_active AND stock >= $2",
            )
            .bind(line.product_id)
            .bind(line.quantity)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                let active: Option<bool> =
                    sqlx::query_scalar("SELECT is_active FROM products WHERE id = $1")
                        .bind(line.product_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                return Err(match active {
                    Some(true) => RepositoryError::InsufficientStock(line.name.clone()),
                    _ => RepositoryError::Unavailable(line.name.clone()),
                });
            }
        }

        if let Some(coupon_id) = order.coupon_id {
            let claimed = sqlx::query(
                "UPDATE coupons SET used_count = used_count + 1 \
                 WHERE id = $1 AND is_active AND (max_uses IS NULL OR used_count < max_uses)",
            )
            .bind(coupon_id)
            .execute(&mut *tx)
            .await?;

            if claimed.rows_affected() == 0 {
                return Err(RepositoryError::Conflict("coupon usage limit reached".into()));
            }
        }

        let order_id = Uuid::new_v4();
        let mut created = sqlx::query_as::<_, Order>(&format!(
            "INSERT INTO orders \
                 (id, user_id, status, subtotal_cents, discount_cents, total_cents, \
                  coupon_code, shipping_address) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order_id)
        .bind(order.user_id)
        .bind(OrderStatus::Pending.as_str())
        .bind(order.pricing.subtotal_cents)
        .bind(order.pricing.discount_cents)
        .bind(order.pricing.total_cents)
        .bind(&order.coupon_code)
        .bind(&order.shipping_address)
        .fetch_one(&mut *tx)
        .await?;

        for line in &order.lines {
            let item = sqlx::query_as::<_, OrderItem>(
                "INSERT INTO order_items (order_id, product_id, name, unit_price_cents, quantity) \
                 VALUES ($1, $2, $3, $4, $5) \
                 RETURNING order_id, product_id, name, unit_price_cents, quantity",
            )
            .bind(order_id)
            .bind(line.product_id)
            .bind(&line.name)
            .bind(line.unit_price_cents)
            .bind(line.quantity)
            .fetch_one(&mut *tx)
            .await?;
            created.items.push(item);
        }

        // Only the ordered quantities leave the cart; a line added after the cart was
        // priced stays for the next checkout.
        for line in &order.lines {
            sqlx::query(
                "DELETE FROM cart_items WHERE cart_id = $1 AND product_id = $2 AND quantity <= $3",
            )
            .bind(order.cart_id)
            .bind(line.product_id)
            .bind(line.quantity)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "UPDATE cart_items SET quantity = quantity - $3 \
                 WHERE cart_id = $1 AND product_id = $2",
            )
            .bind(order.cart_id)
            .bind(line.product_id)
            .bind(line.quantity)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn list_orders_for_user(&self, user_id: Uuid) -> RepoResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        self.attach_items(orders).await
    }

    async fn list_orders(&self) -> RepoResult<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        self.attach_items(orders).await
    }

    async fn get_order(&self, id: Uuid) -> RepoResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match order {
            Some(order) => Ok(self.attach_items(vec![order]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn cancel_order(&self, id: Uuid) -> RepoResult<Option<Order>> {
        let mut tx = self.pool.begin().await?;

        let cancelled = sqlx::query_as::<_, Order>(&format!(
            "UPDATE orders SET status = 'cancelled', updated_at = NOW() \
             WHERE id = $1 AND status IN ('pending', 'paid') RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut order) = cancelled else {
            return Ok(None);
        };

        order.items = sqlx::query_as::<_, OrderItem>(
            "SELECT order_id, product_id, name, unit_price_cents, quantity \
             FROM order_items WHERE order_id = $1 ORDER BY name",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        // Same lock order as checkout. Products deleted since purchase match no row.
        let mut restock: Vec<_> = order.items.iter().collect();
        restock.sort_by_key(|item| item.product_id);
        for item in restock {
            sqlx::query(
                "UPDATE products SET stock = stock + $2, updated_at = NOW() WHERE id = $1",
            )
            .bind(item.product_id)
            .bind(item.quantity)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some(order))
    }

    async fn update_order_status(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> RepoResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "UPDATE orders SET status = $3, updated_at = NOW() \
             WHERE id = $1 AND status = $2 RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match order {
            Some(order) => Ok(self.attach_items(vec![order]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn set_payment_reference(&self, id: Uuid, reference: &str) -> RepoResult<bool> {
        let result = sqlx::query(
            "UPDATE orders SET payment_reference = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(reference)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_order_paid(&self, id: Uuid, reference: &str) -> RepoResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "UPDATE orders SET status = 'paid', updated_at = NOW() \
             WHERE id = $1 AND status = 'pending' AND payment_reference = $2 \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id)
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        match order {
            Some(order) => Ok(self.attach_items(vec![order]).await?.pop()),
            None => Ok(None),
        }
    }

    // --- Reviews ---

    async fn create_review(
        &self,
        product_id: Uuid,
        user_id: Uuid,
        req: CreateReviewRequest,
    ) -> RepoResult<Review> {
        sqlx::query_as::<_, Review>(
            "WITH inserted AS ( \
                 INSERT INTO reviews (id, product_id, user_id, rating, comment) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING * \
             ) \
             SELECT r.id, r.product_id, r.user_id, u.name AS author_name, \
                    r.rating, r.comment, r.is_approved, r.created_at \
             FROM inserted r JOIN users u ON u.id = r.user_id",
        )
        .bind(Uuid::new_v4())
        .bind(product_id)
        .bind(user_id)
        .bind(req.rating)
        .bind(&req.comment)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "you have already reviewed this product", "product"))
    }

    async fn list_product_reviews(&self, product_id: Uuid) -> RepoResult<Vec<Review>> {
        let reviews = sqlx::query_as::<_, Review>(&format!(
            "{REVIEW_SELECT} WHERE r.product_id = $1 AND r.is_approved ORDER BY r.created_at DESC"
        ))
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(reviews)
    }

    async fn list_pending_reviews(&self) -> RepoResult<Vec<Review>> {
        let reviews = sqlx::query_as::<_, Review>(&format!(
            "{REVIEW_SELECT} WHERE NOT r.is_approved ORDER BY r.created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(reviews)
    }

    async fn set_review_approval(&self, id: Uuid, approved: bool) -> RepoResult<Option<Review>> {
        let mut tx = self.pool.begin().await?;

        let product_id = sqlx::query_scalar::<_, Uuid>(
            "UPDATE reviews SET is_approved = $2 WHERE id = $1 RETURNING product_id",
        )
        .bind(id)
        .bind(approved)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(product_id) = product_id else {
            return Ok(None);
        };
        refresh_rating(&mut *tx, product_id).await?;
        tx.commit().await?;

        self.get_review(id).await
    }

    async fn delete_review(&self, id: Uuid) -> RepoResult<bool> {
        let mut tx = self.pool.begin().await?;

        let product_id = sqlx::query_scalar::<_, Uuid>(
            "DELETE FROM reviews WHERE id = $1 RETURNING product_id",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(product_id) = product_id else {
            return Ok(false);
        };
        refresh_rating(&mut *tx, product_id).await?;
        tx.commit().await?;
        Ok(true)
    }

    // --- Chat ---

    async fn add_chat_message(
        &self,
        user_id: Uuid,
        sender_id: Uuid,
        from_admin: bool,
        body: String,
    ) -> RepoResult<ChatMessage> {
        sqlx::query_as::<_, ChatMessage>(
            "INSERT INTO chat_messages (id, user_id, sender_id, from_admin, body) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, user_id, sender_id, from_admin, body, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(sender_id)
        .bind(from_admin)
        .bind(body)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, "duplicate message", "user"))
    }

    async fn list_chat_messages(&self, user_id: Uuid) -> RepoResult<Vec<ChatMessage>> {
        let messages = sqlx::query_as::<_, ChatMessage>(
            "SELECT id, user_id, sender_id, from_admin, body, created_at FROM chat_messages \
             WHERE user_id = $1 ORDER BY created_at, id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }

    async fn list_chat_threads(&self) -> RepoResult<Vec<ChatThread>> {
        let threads = sqlx::query_as::<_, ChatThread>(
            "SELECT m.user_id, u.email, COUNT(*) AS message_count, \
                    MAX(m.created_at) AS last_message_at \
             FROM chat_messages m JOIN users u ON u.id = m.user_id \
             GROUP BY m.user_id, u.email \
             ORDER BY last_message_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(threads)
    }

    // --- Dashboard ---

    async fn get_stats(&self) -> RepoResult<AdminDashboardStats> {
        let stats = sqlx::query_as::<_, AdminDashboardStats>(
            "SELECT \
                 (SELECT COUNT(*) FROM users) AS total_users, \
                 (SELECT COUNT(*) FROM products) AS total_products, \
                 (SELECT COUNT(*) FROM orders) AS total_orders, \
                 (SELECT COALESCE(SUM(total_cents), 0)::bigint FROM orders \
                  WHERE status IN ('paid', 'shipped', 'delivered')) AS revenue_cents, \
                 (SELECT COUNT(*) FROM reviews WHERE NOT is_approved) AS pending_reviews, \
                 (SELECT COUNT(*) FROM products WHERE is_active AND stock < $1) AS low_stock_products",
        )
        .bind(LOW_STOCK_THRESHOLD)
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }
}

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
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

struct StoredCart {
    id: Uuid,
    user_id: Option<Uuid>,
    session_id: Option<String>,
    // (product_id, quantity) in insertion order.
    items: Vec<(Uuid, i32)>,
}

#[derive(Default)]
struct Store {
    users: Vec<(User, String)>,
    categories: Vec<Category>,
    filters: Vec<Filter>,
    products: Vec<Product>,
    carts: Vec<StoredCart>,
    coupons: Vec<Coupon>,
    orders: Vec<Order>,
    reviews: Vec<Review>,
    messages: Vec<ChatMessage>,
}

impl Store {
    fn product(&self, id: Uuid) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    fn product_mut(&mut self, id: Uuid) -> Option<&mut Product> {
        self.products.iter_mut().find(|p| p.id == id)
    }

    fn cart_index(&self, identity: &CartIdentity) -> Option<usize> {
        self.carts.iter().position(|cart| match identity {
            CartIdentity::User(id) => cart.user_id == Some(*id),
            CartIdentity::Session(session) => cart.session_id.as_deref() == Some(session.as_str()),
        })
    }

    fn cart_index_or_insert(&mut self, identity: &CartIdentity) -> usize {
        if let Some(index) = self.cart_index(identity) {
            return index;
        }
        let (user_id, session_id) = match identity {
            CartIdentity::User(id) => (Some(*id), None),
            CartIdentity::Session(session) => (None, Some(session.clone())),
        };
        self.carts.push(StoredCart {
            id: Uuid::new_v4(),
            user_id,
            session_id,
            items: Vec::new(),
        });
        self.carts.len() - 1
    }

    fn cart_by_id_mut(&mut self, cart_id: Uuid) -> Option<&mut StoredCart> {
        self.carts.iter_mut().find(|cart| cart.id == cart_id)
    }

    /// Joins stored `(product, quantity)` pairs with the live product rows.
    fn lines(&self, items: &[(Uuid, i32)]) -> Vec<CartLine> {
        items
            .iter()
            .filter_map(|(product_id, quantity)| {
                self.product(*product_id).map(|product| CartLine {
                    product_id: product.id,
                    name: product.name.clone(),
                    unit_price_cents: product.price_cents,
                    quantity: *quantity,
                    stock: product.stock,
                    image: product.images.first().cloned(),
                })
            })
            .collect()
    }

    fn assemble(&self, index: usize) -> Cart {
        let cart = &self.carts[index];
        Cart::assemble(
            cart.id,
            cart.user_id,
            cart.session_id.clone(),
            self.lines(&cart.items),
        )
    }

    fn author_name(&self, user_id: Uuid) -> String {
        self.users
            .iter()
            .find(|(user, _)| user.id == user_id)
            .map(|(user, _)| user.name.clone())
            .unwrap_or_default()
    }

    fn refresh_rating(&mut self, product_id: Uuid) {
        let ratings: Vec<i32> = self
            .reviews
            .iter()
            .filter(|r| r.product_id == product_id && r.is_approved)
            .map(|r| r.rating)
            .collect();
        if let Some(product) = self.product_mut(product_id) {
            product.rating_count = ratings.len() as i32;
            product.rating_avg = if ratings.is_empty() {
                0.0
            } else {
                f64::from(ratings.iter().sum::<i32>()) / ratings.len() as f64
            };
        }
    }

    fn update_status(&mut self, id: Uuid, from: OrderStatus, to: OrderStatus) -> Option<Order> {
        let order = self
            .orders
            .iter_mut()
            .find(|o| o.id == id && o.status == from)?;
        order.status = to;
        order.updated_at = Utc::now();
        Some(order.clone())
    }
}

/// MemoryRepository
///
/// A `Repository` held entirely in process memory, backing the test suite. Every
/// operation runs under one lock, which makes the multi-step operations (checkout,
/// cart merge) atomic.
#[derive(Default)]
pub struct MemoryRepository {
    store: Mutex<Store>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    // The lock is never held across an await point.
    fn with_store<T>(&self, f: impl FnOnce(&mut Store) -> T) -> T {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut store)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    // --- Users ---

    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        self.with_store(|store| {
            if store.users.iter().any(|(u, _)| u.email == user.email) {
                return Err(RepositoryError::Conflict("email is already registered".into()));
            }
            let created = User {
                id: Uuid::new_v4(),
                email: user.email,
                name: user.name,
                role: user.role,
                created_at: Utc::now(),
            };
            store.users.push((created.clone(), user.password_hash));
            Ok(created)
        })
    }

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        Ok(self.with_store(|store| {
            store
                .users
                .iter()
                .find(|(user, _)| user.id == id)
                .map(|(user, _)| user.clone())
        }))
    }

    async fn get_user_credentials(&self, email: &str) -> RepoResult<Option<(User, String)>> {
        Ok(self.with_store(|store| {
            store
                .users
                .iter()
                .find(|(user, _)| user.email == email)
                .cloned()
        }))
    }

    async fn list_users(&self) -> RepoResult<Vec<User>> {
        Ok(self.with_store(|store| {
            let mut users: Vec<User> = store.users.iter().map(|(u, _)| u.clone()).collect();
            users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            users
        }))
    }

    async fn set_user_role(&self, id: Uuid, role: &str) -> RepoResult<Option<User>> {
        Ok(self.with_store(|store| {
            let (user, _) = store.users.iter_mut().find(|(user, _)| user.id == id)?;
            user.role = role.to_string();
            Some(user.clone())
        }))
    }

    // --- Categories ---

    async fn list_categories(&self) -> RepoResult<Vec<Category>> {
        Ok(self.with_store(|store| {
            let mut categories = store.categories.clone();
            categories.sort_by(|a, b| a.name.cmp(&b.name));
            categories
        }))
    }

    async fn create_category(&self, req: CategoryRequest) -> RepoResult<Category> {
        self.with_store(|store| {
            if store.categories.iter().any(|c| c.slug == req.slug) {
                return Err(RepositoryError::Conflict("category slug already exists".into()));
            }
            let category = Category {
                id: Uuid::new_v4(),
                name: req.name,
                slug: req.slug,
                description: req.description,
                created_at: Utc::now(),
            };
            store.categories.push(category.clone());
            Ok(category)
        })
    }

    async fn update_category(&self, id: Uuid, req: CategoryRequest) -> RepoResult<Option<Category>> {
        self.with_store(|store| {
            if store.categories.iter().any(|c| c.slug == req.slug && c.id != id) {
                return Err(RepositoryError::Conflict("category slug already exists".into()));
            }
            Ok(store.categories.iter_mut().find(|c| c.id == id).map(|c| {
                c.name = req.name;
                c.slug = req.slug;
                c.description = req.description;
                c.clone()
            }))
        })
    }

    async fn delete_category(&self, id: Uuid) -> RepoResult<bool> {
        Ok(self.with_store(|store| {
            let before = store.categories.len();
            store.categories.retain(|c| c.id != id);
            if store.categories.len() == before {
                return false;
            }
            for product in store.products.iter_mut().filter(|p| p.category_id == Some(id)) {
                product.category_id = None;
            }
            true
        }))
    }

    // --- Filters ---

    async fn list_filters(&self) -> RepoResult<Vec<Filter>> {
        Ok(self.with_store(|store| {
            let mut filters = store.filters.clone();
            filters.sort_by(|a, b| a.position.cmp(&b.position).then(a.name.cmp(&b.name)));
            filters
        }))
    }

    async fn create_filter(&self, req: FilterRequest) -> RepoResult<Filter> {
        self.with_store(|store| {
            if store.filters.iter().any(|f| f.key == req.key) {
                return Err(RepositoryError::Conflict("filter key already exists".into()));
            }
            let filter = Filter {
                id: Uuid::new_v4(),
                name: req.name,
                key: req.key,
                kind: req.kind,
                options: req.options,
                position: req.position,
                created_at: Utc::now(),
            };
            store.filters.push(filter.clone());
            Ok(filter)
        })
    }

    async fn update_filter(&self, id: Uuid, req: FilterRequest) -> RepoResult<Option<Filter>> {
        self.with_store(|store| {
            if store.filters.iter().any(|f| f.key == req.key && f.id != id) {
                return Err(RepositoryError::Conflict("filter key already exists".into()));
            }
            Ok(store.filters.iter_mut().find(|f| f.id == id).map(|f| {
                f.name = req.name;
                f.key = req.key;
                f.kind = req.kind;
                f.options = req.options;
                f.position = req.position;
                f.clone()
            }))
        })
    }

    async fn delete_filter(&self, id: Uuid) -> RepoResult<bool> {
        Ok(self.with_store(|store| {
            let before = store.filters.len();
            store.filters.retain(|f| f.id != id);
            store.filters.len() != before
        }))
    }

    // --- Products ---

    async fn list_products(&self, query: &ProductQuery) -> RepoResult<ProductPage> {
        Ok(self.with_store(|store| {
            let slug_of = |category_id: Option<Uuid>| {
                category_id.and_then(|id| {
                    store
                        .categories
                        .iter()
                        .find(|c| c.id == id)
                        .map(|c| c.slug.as_str())
                })
            };

            let mut matching: Vec<Product> = store
                .products
                .iter()
                .filter(|p| query.matches(p, slug_of(p.category_id)))
                .cloned()
                .collect();
            query.sort_products(&mut matching);

            let total = matching.len() as i64;
            let items = matching
                .into_iter()
                .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
                .take(usize::try_from(query.limit).unwrap_or(0))
                .collect();

            ProductPage {
                items,
                total,
                page: query.page,
                limit: query.limit,
            }
        }))
    }

    async fn get_product(&self, id: Uuid) -> RepoResult<Option<Product>> {
        Ok(self.with_store(|store| store.product(id).cloned()))
    }

    async fn create_product(&self, req: CreateProductRequest) -> RepoResult<Product> {
        self.with_store(|store| {
            if let Some(category_id) = req.category_id
                && !store.categories.iter().any(|c| c.id == category_id)
            {
                return Err(RepositoryError::NotFound("category".into()));
            }
            let now = Utc::now();
            let product = Product {
                id: Uuid::new_v4(),
                name: req.name,
                description: req.description,
                price_cents: req.price_cents,
                stock: req.stock,
                category_id: req.category_id,
                tags: req.tags,
                images: req.images,
                is_active: req.is_active.unwrap_or(true),
                rating_avg: 0.0,
                rating_count: 0,
                created_at: now,
                updated_at: now,
            };
            store.products.push(product.clone());
            Ok(product)
        })
    }

    async fn update_product(&self, id: Uuid, req: UpdateProductRequest) -> RepoResult<Option<Product>> {
        self.with_store(|store| {
            if let Some(category_id) = req.category_id
                && !store.categories.iter().any(|c| c.id == category_id)
            {
                return Err(RepositoryError::NotFound("category".into()));
            }
            let Some(product) = store.product_mut(id) else {
                return Ok(None);
            };
            if let Some(name) = req.name {
                product.name = name;
            }
            if let Some(description) = req.description {
                product.description = description;
            }
            if let Some(price_cents) = req.price_cents {
                product.price_cents = price_cents;
            }
            if let Some(stock) = req.stock {
                product.stock = stock;
            }
            if let Some(category_id) = req.category_id {
                product.category_id = Some(category_id);
            }
            if let Some(tags) = req.tags {
                product.tags = tags;
            }
            if let Some(images) = req.images {
                product.images = images;
            }
            if let Some(is_active) = req.is_active {
                product.is_active = is_active;
            }
            product.updated_at = Utc::now();
            Ok(Some(product.clone()))
        })
    }

    async fn delete_product(&self, id: Uuid) -> RepoResult<bool> {
        Ok(self.with_store(|store| {
            let before = store.products.len();
            store.products.retain(|p| p.id != id);
            if store.products.len() == before {
                return false;
            }
            for cart in &mut store.carts {
                cart.items.retain(|(product_id, _)| *product_id != id);
            }
            store.reviews.retain(|r| r.product_id != id);
            true
        }))
    }

    // --- Carts ---

    async fn get_or_create_cart(&self, identity: &CartIdentity) -> RepoResult<Cart> {
        Ok(self.with_store(|store| {
            let index = store.cart_index_or_insert(identity);
            store.assemble(index)
        }))
    }

    async fn add_cart_item(&self, cart_id: Uuid, product_id: Uuid, quantity: i32) -> RepoResult<()> {
        self.with_store(|store| {
            if store.product(product_id).is_none() {
                return Err(RepositoryError::NotFound("product".into()));
            }
            let cart = store
                .cart_by_id_mut(cart_id)
                .ok_or_else(|| RepositoryError::NotFound("cart".into()))?;
            match cart.items.iter_mut().find(|(id, _)| *id == product_id) {
                Some((_, existing)) => *existing = existing.saturating_add(quantity),
                None => cart.items.push((product_id, quantity)),
            }
            Ok(())
        })
    }

    async fn set_cart_item(&self, cart_id: Uuid, product_id: Uuid, quantity: i32) -> RepoResult<bool> {
        Ok(self.with_store(|store| {
            let Some(cart) = store.cart_by_id_mut(cart_id) else {
                return false;
            };
            let Some(position) = cart.items.iter().position(|(id, _)| *id == product_id) else {
                return false;
            };
            if quantity <= 0 {
                cart.items.remove(position);
            } else {
                cart.items[position].1 = quantity;
            }
            true
        }))
    }

    async fn remove_cart_item(&self, cart_id: Uuid, product_id: Uuid) -> RepoResult<bool> {
        Ok(self.with_store(|store| {
            let Some(cart) = store.cart_by_id_mut(cart_id) else {
                return false;
            };
            let before = cart.items.len();
            cart.items.retain(|(id, _)| *id != product_id);
            cart.items.len() != before
        }))
    }

    async fn clear_cart(&self, cart_id: Uuid) -> RepoResult<()> {
        self.with_store(|store| {
            if let Some(cart) = store.cart_by_id_mut(cart_id) {
                cart.items.clear();
            }
        });
        Ok(())
    }

    async fn merge_guest_cart(&self, session_id: &str, user_id: Uuid) -> RepoResult<Cart> {
        Ok(self.with_store(|store| {
            let user_index = store.cart_index_or_insert(&CartIdentity::User(user_id));
            let Some(guest_index) = store.cart_index(&CartIdentity::Session(session_id.to_string()))
            else {
                return store.assemble(user_index);
            };

            let user_lines = store.lines(&store.carts[user_index].items);
            let guest_lines = store.lines(&store.carts[guest_index].items);
            let merged = clamp_to_stock(merge_lines(&user_lines, &guest_lines));

            store.carts[user_index].items = merged
                .iter()
                .map(|line| (line.product_id, line.quantity))
                .collect();
            let user_cart_id = store.carts[user_index].id;
            store.carts.remove(guest_index);

            let index = store
                .carts
                .iter()
                .position(|cart| cart.id == user_cart_id)
                .unwrap_or(0);
            store.assemble(index)
        }))
    }

    // --- Coupons ---

    async fn list_coupons(&self) -> RepoResult<Vec<Coupon>> {
        Ok(self.with_store(|store| {
            let mut coupons = store.coupons.clone();
            coupons.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            coupons
        }))
    }

    async fn get_coupon_by_code(&self, code: &str) -> RepoResult<Option<Coupon>> {
        Ok(self.with_store(|store| {
            store
                .coupons
                .iter()
                .find(|c| c.code.eq_ignore_ascii_case(code))
                .cloned()
        }))
    }

    async fn create_coupon(&self, req: CreateCouponRequest) -> RepoResult<Coupon> {
        self.with_store(|store| {
            if store.coupons.iter().any(|c| c.code.eq_ignore_ascii_case(&req.code)) {
                return Err(RepositoryError::Conflict("coupon code already exists".into()));
            }
            let coupon = Coupon {
                id: Uuid::new_v4(),
                code: req.code,
                kind: req.kind,
                value: req.value,
                min_order_cents: req.min_order_cents,
                max_uses: req.max_uses,
                used_count: 0,
                expires_at: req.expires_at,
                is_active: true,
                created_at: Utc::now(),
            };
            store.coupons.push(coupon.clone());
            Ok(coupon)
        })
    }

    async fn delete_coupon(&self, id: Uuid) -> RepoResult<bool> {
        Ok(self.with_store(|store| {
            let before = store.coupons.len();
            store.coupons.retain(|c| c.id != id);
            store.coupons.len() != before
        }))
    }

    // --- Orders ---

    async fn create_order(&self, order: NewOrder) -> RepoResult<Order> {
        self.with_store(|store| {
            // Validate everything first so a failure leaves the store untouched.
            for line in &order.lines {
                match store.product(line.product_id) {
                    Some(p) if !p.is_active => {
                        return Err(RepositoryError::Unavailable(line.name.clone()));
                    }
                    None => return Err(RepositoryError::Unavailable(line.name.clone())),
                    Some(p) if p.stock < line.quantity => {
                        return Err(RepositoryError::InsufficientStock(line.name.clone()));
                    }
                    Some(_) => {}
                }
            }
            if let Some(coupon_id) = order.coupon_id {
                let claimable = store.coupons.iter().any(|c| {
                    c.id == coupon_id && c.is_active && c.max_uses.is_none_or(|max| c.used_count < max)
                });
                if !claimable {
                    return Err(RepositoryError::Conflict("coupon usage limit reached".into()));
                }
            }

            let now = Utc::now();
            for line in &order.lines {
                if let Some(product) = store.product_mut(line.product_id) {
                    product.stock -= line.quantity;
                    product.updated_at = now;
                }
            }
            if let Some(coupon) = order
                .coupon_id
                .and_then(|id| store.coupons.iter_mut().find(|c| c.id == id))
            {
                coupon.used_count += 1;
            }

            let id = Uuid::new_v4();
            let mut items: Vec<OrderItem> = order
                .lines
                .iter()
                .map(|line| OrderItem {
                    order_id: id,
                    product_id: line.product_id,
                    name: line.name.clone(),
                    unit_price_cents: line.unit_price_cents,
                    quantity: line.quantity,
                })
                .collect();
            items.sort_by(|a, b| a.name.cmp(&b.name));

            let created = Order {
                id,
                user_id: order.user_id,
                status: OrderStatus::Pending,
                subtotal_cents: order.pricing.subtotal_cents,
                discount_cents: order.pricing.discount_cents,
                total_cents: order.pricing.total_cents,
                coupon_code: order.coupon_code,
                shipping_address: order.shipping_address,
                payment_reference: None,
                created_at: now,
                updated_at: now,
                items,
            };
            store.orders.push(created.clone());

            // Only the ordered quantities leave the cart.
            if let Some(cart) = store.cart_by_id_mut(order.cart_id) {
                for line in &order.lines {
                    if let Some(item) = cart.items.iter_mut().find(|(id, _)| *id == line.product_id) {
                        item.1 -= line.quantity;
                    }
                }
                cart.items.retain(|(_, quantity)| *quantity > 0);
            }
            Ok(created)
        })
    }

    async fn list_orders_for_user(&self, user_id: Uuid) -> RepoResult<Vec<Order>> {
        Ok(self.with_store(|store| {
            let mut orders: Vec<Order> = store
                .orders
                .iter()
                .filter(|o| o.user_id == user_id)
                .cloned()
                .collect();
            orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            orders
        }))
    }

    async fn list_orders(&self) -> RepoResult<Vec<Order>> {
        Ok(self.with_store(|store| {
            let mut orders = store.orders.clone();
            orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            orders
        }))
    }

    async fn get_order(&self, id: Uuid) -> RepoResult<Option<Order>> {
        Ok(self.with_store(|store| store.orders.iter().find(|o| o.id == id).cloned()))
    }

    async fn cancel_order(&self, id: Uuid) -> RepoResult<Option<Order>> {
        Ok(self.with_store(|store| {
            let order = store
                .orders
                .iter_mut()
                .find(|o| o.id == id && o.status.is_cancellable())?;
            order.status = OrderStatus::Cancelled;
            order.updated_at = Utc::now();
            let cancelled = order.clone();

            for item in &cancelled.items {
                if let Some(product) = store.product_mut(item.product_id) {
                    product.stock += item.quantity;
                }
            }
            Some(cancelled)
        }))
    }

    async fn update_order_status(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> RepoResult<Option<Order>> {
        Ok(self.with_store(|store| store.update_status(id, from, to)))
    }

    async fn set_payment_reference(&self, id: Uuid, reference: &str) -> RepoResult<bool> {
        Ok(self.with_store(|store| {
            match store
                .orders
                .iter_mut()
                .find(|o| o.id == id && o.status == OrderStatus::Pending)
            {
                Some(order) => {
                    order.payment_reference = Some(reference.to_string());
                    true
                }
                None => false,
            }
        }))
    }

    async fn mark_order_paid(&self, id: Uuid, reference: &str) -> RepoResult<Option<Order>> {
        Ok(self.with_store(|store| {
            let order = store
                .orders
                .iter_mut()
                .find(|o| {
                    o.id == id
                        && o.status == OrderStatus::Pending
                        && o.payment_reference.as_deref() == Some(reference)
                })?;
            order.status = OrderStatus::Paid;
            order.updated_at = Utc::now();
            Some(order.clone())
        }))
    }

    // --- Reviews ---

    async fn create_review(
        &self,
        product_id: Uuid,
        user_id: Uuid,
        req: CreateReviewRequest,
    ) -> RepoResult<Review> {
        self.with_store(|store| {
            if store.product(product_id).is_none() {
                return Err(RepositoryError::NotFound("product".into()));
            }
            if store
                .reviews
                .iter()
                .any(|r| r.product_id == product_id && r.user_id == user_id)
            {
                return Err(RepositoryError::Conflict(
                    "you have already reviewed this product".into(),
                ));
            }
            let review = Review {
                id: Uuid::new_v4(),
                product_id,
                user_id,
                author_name: store.author_name(user_id),
                rating: req.rating,
                comment: req.comment,
                is_approved: false,
                created_at: Utc::now(),
            };
            store.reviews.push(review.clone());
            Ok(review)
        })
    }

    async fn list_product_reviews(&self, product_id: Uuid) -> RepoResult<Vec<Review>> {
        Ok(self.with_store(|store| {
            let mut reviews: Vec<Review> = store
                .reviews
                .iter()
                .filter(|r| r.product_id == product_id && r.is_approved)
                .cloned()
                .collect();
            reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            reviews
        }))
    }

    async fn list_pending_reviews(&self) -> RepoResult<Vec<Review>> {
        Ok(self.with_store(|store| {
            let mut reviews: Vec<Review> =
                store.reviews.iter().filter(|r| !r.is_approved).cloned().collect();
            reviews.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            reviews
        }))
    }

    async fn set_review_approval(&self, id: Uuid, approved: bool) -> RepoResult<Option<Review>> {
        Ok(self.with_store(|store| {
            let review = store.reviews.iter_mut().find(|r| r.id == id)?;
            review.is_approved = approved;
            let review = review.clone();
            store.refresh_rating(review.product_id);
            Some(review)
        }))
    }

    async fn delete_review(&self, id: Uuid) -> RepoResult<bool> {
        Ok(self.with_store(|store| {
            let Some(position) = store.reviews.iter().position(|r| r.id == id) else {
                return false;
            };
            let removed = store.reviews.remove(position);
            store.refresh_rating(removed.product_id);
            true
        }))
    }

    // --- Chat ---

    async fn add_chat_message(
        &self,
        user_id: Uuid,
        sender_id: Uuid,
        from_admin: bool,
        body: String,
    ) -> RepoResult<ChatMessage> {
        self.with_store(|store| {
            if !store.users.iter().any(|(u, _)| u.id == user_id) {
                return Err(RepositoryError::NotFound("user".into()));
            }
            let message = ChatMessage {
                id: Uuid::new_v4(),
                user_id,
                sender_id,
                from_admin,
                body,
                created_at: Utc::now(),
            };
            store.messages.push(message.clone());
            Ok(message)
        })
    }

    async fn list_chat_messages(&self, user_id: Uuid) -> RepoResult<Vec<ChatMessage>> {
        Ok(self.with_store(|store| {
            store
                .messages
                .iter()
                .filter(|m| m.user_id == user_id)
                .cloned()
                .collect()
        }))
    }

    async fn list_chat_threads(&self) -> RepoResult<Vec<ChatThread>> {
        Ok(self.with_store(|store| {
            let mut threads: Vec<ChatThread> = Vec::new();
            for message in &store.messages {
                match threads.iter_mut().find(|t| t.user_id == message.user_id) {
                    Some(thread) => {
                        thread.message_count += 1;
                        thread.last_message_at = thread.last_message_at.max(message.created_at);
                    }
                    None => threads.push(ChatThread {
                        user_id: message.user_id,
                        email: store
                            .users
                            .iter()
                            .find(|(u, _)| u.id == message.user_id)
                            .map(|(u, _)| u.email.clone())
                            .unwrap_or_default(),
                        message_count: 1,
                        last_message_at: message.created_at,
                    }),
                }
            }
            threads.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
            threads
        }))
    }

    // --- Dashboard ---

    async fn get_stats(&self) -> RepoResult<AdminDashboardStats> {
        Ok(self.with_store(|store| AdminDashboardStats {
            total_users: store.users.len() as i64,
            total_products: store.products.len() as i64,
            total_orders: store.orders.len() as i64,
            revenue_cents: store
                .orders
                .iter()
                .filter(|o| o.status.is_settled())
                .map(|o| o.total_cents)
                .sum(),
            pending_reviews: store.reviews.iter().filter(|r| !r.is_approved).count() as i64,
            low_stock_products: store
                .products
                .iter()
                .filter(|p| p.is_active && p.stock < LOW_STOCK_THRESHOLD)
                .count() as i64,
        }))
    }
}

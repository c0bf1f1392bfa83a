use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    AppState,
    auth::AuthUser,
    catalog::{FILTER_KIND_TAG, ProductQuery, normalize_tag, validate_filter_definition},
    error::{AppError, AppResult},
    models::{
        Category, CategoryRequest, CreateProductRequest, Filter, FilterRequest, Product,
        ProductPage, UpdateProductRequest,
    },
};

fn parse_listing(params: &HashMap<String, String>) -> AppResult<ProductQuery> {
    ProductQuery::from_params(params).map_err(|e| AppError::BadRequest(e.to_string()))
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags.iter().map(|t| normalize_tag(t)).filter(|t| !t.is_empty()) {
        if !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }
    normalized
}

fn validate_product_fields(
    name: Option<&str>,
    price_cents: Option<i64>,
    stock: Option<i32>,
) -> AppResult<()> {
    if name.is_some_and(|n| n.trim().is_empty()) {
        return Err(AppError::BadRequest("product name is required".into()));
    }
    if price_cents.is_some_and(|p| p < 0) {
        return Err(AppError::BadRequest("price_cents must not be negative".into()));
    }
    if stock.is_some_and(|s| s < 0) {
        return Err(AppError::BadRequest("stock must not be negative".into()));
    }
    Ok(())
}

// --- Products ---

/// list_products
///
/// [Public Route] Filtered, paginated product listing. Besides the documented
/// parameters, any other `key=v1,v2` parameter narrows by the `key:v1`/`key:v2`
/// tag group.
#[utoipa::path(
    get,
    path = "/products",
    params(
        ("search" = Option<String>, Query, description = "Substring of name or description"),
        ("category" = Option<String>, Query, description = "Comma-separated category slugs"),
        ("price" = Option<String>, Query, description = "Comma-separated ranges: 10-50, 100+, -20"),
        ("min_price" = Option<String>, Query, description = "Lower bound applied to every range"),
        ("max_price" = Option<String>, Query, description = "Upper bound applied to every range"),
        ("tags" = Option<String>, Query, description = "Comma-separated tags, key:value grouped by key"),
        ("in_stock" = Option<bool>, Query),
        ("sort" = Option<String>, Query, description = "newest | price_asc | price_desc | rating | name"),
        ("page" = Option<i64>, Query),
        ("limit" = Option<i64>, Query, description = "1..=100, default 20")
    ),
    responses(
        (status = 200, description = "One page of matching products", body = ProductPage),
        (status = 400, description = "Malformed filter parameter")
    )
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<ProductPage>> {
    let query = parse_listing(&params)?;
    Ok(Json(state.repo.list_products(&query).await?))
}

/// get_product
///
/// [Public Route] A single active product.
#[utoipa::path(
    get,
    path = "/products/{id}",
    params(("id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Found", body = Product),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Product>> {
    state
        .repo
        .get_product(id)
        .await?
        .filter(|product| product.is_active)
        .map(Json)
        .ok_or_else(|| AppError::NotFound("product not found".into()))
}

/// admin_list_products
///
/// [Admin Route] Same filters as the public listing, inactive products included.
#[utoipa::path(
    get,
    path = "/admin/products",
    responses((status = 200, description = "All products", body = ProductPage))
)]
pub async fn admin_list_products(
    user: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Json<ProductPage>> {
    user.require_admin()?;
    let query = ProductQuery {
        include_inactive: true,
        ..parse_listing(&params)?
    };
    Ok(Json(state.repo.list_products(&query).await?))
}

/// create_product
///
/// [Admin Route] Tags are lower-cased and de-duplicated before storage.
#[utoipa::path(
    post,
    path = "/admin/products",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Created", body = Product),
        (status = 400, description = "Invalid fields")
    )
)]
pub async fn create_product(
    user: AuthUser,
    State(state): State<AppState>,
    Json(mut payload): Json<CreateProductRequest>,
) -> AppResult<(StatusCode, Json<Product>)> {
    user.require_admin()?;
    validate_product_fields(Some(&payload.name), Some(payload.price_cents), Some(payload.stock))?;

    payload.name = payload.name.trim().to_string();
    payload.tags = normalize_tags(payload.tags);

    let product = state.repo.create_product(payload).await?;
    tracing::info!(product_id = %product.id, "product created");
    Ok((StatusCode::CREATED, Json(product)))
}

/// update_product
///
/// [Admin Route] Partial update.
#[utoipa::path(
    put,
    path = "/admin/products/{id}",
    params(("id" = Uuid, Path, description = "Product ID")),
    request_body = UpdateProductRequest,
    responses(
        (status = 200, description = "Updated", body = Product),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_product(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(mut payload): Json<UpdateProductRequest>,
) -> AppResult<Json<Product>> {
    user.require_admin()?;
    validate_product_fields(payload.name.as_deref(), payload.price_cents, payload.stock)?;

    payload.name = payload.name.map(|n| n.trim().to_string());
    payload.tags = payload.tags.map(normalize_tags);

    state
        .repo
        .update_product(id, payload)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("product not found".into()))
}

#[utoipa::path(
    delete,
    path = "/admin/products/{id}",
    params(("id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_product(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    if state.repo.delete_product(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("product not found".into()))
    }
}

// --- Categories ---

fn validate_category(req: &mut CategoryRequest) -> AppResult<()> {
    req.name = req.name.trim().to_string();
    req.slug = req.slug.trim().to_lowercase();
    if req.name.is_empty() {
        return Err(AppError::BadRequest("category name is required".into()));
    }
    let slug_ok = !req.slug.is_empty()
        && req
            .slug
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if !slug_ok {
        return Err(AppError::BadRequest(
            "slug may only contain lowercase letters, digits and '-'".into(),
        ));
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/categories",
    responses((status = 200, description = "Categories", body = [Category]))
)]
pub async fn list_categories(State(state): State<AppState>) -> AppResult<Json<Vec<Category>>> {
    Ok(Json(state.repo.list_categories().await?))
}

#[utoipa::path(
    post,
    path = "/admin/categories",
    request_body = CategoryRequest,
    responses(
        (status = 201, description = "Created", body = Category),
        (status = 409, description = "Slug taken")
    )
)]
pub async fn create_category(
    user: AuthUser,
    State(state): State<AppState>,
    Json(mut payload): Json<CategoryRequest>,
) -> AppResult<(StatusCode, Json<Category>)> {
    user.require_admin()?;
    validate_category(&mut payload)?;
    let category = state.repo.create_category(payload).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

#[utoipa::path(
    put,
    path = "/admin/categories/{id}",
    params(("id" = Uuid, Path, description = "Category ID")),
    request_body = CategoryRequest,
    responses(
        (status = 200, description = "Updated", body = Category),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_category(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(mut payload): Json<CategoryRequest>,
) -> AppResult<Json<Category>> {
    user.require_admin()?;
    validate_category(&mut payload)?;
    state
        .repo
        .update_category(id, payload)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("category not found".into()))
}

/// delete_category
///
/// [Admin Route] Products in the category are kept and become uncategorized.
#[utoipa::path(
    delete,
    path = "/admin/categories/{id}",
    params(("id" = Uuid, Path, description = "Category ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_category(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    if state.repo.delete_category(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("category not found".into()))
    }
}

// --- Filters ---

fn validate_filter(req: &mut FilterRequest) -> AppResult<()> {
    req.name = req.name.trim().to_string();
    req.key = req.key.trim().to_lowercase();
    req.kind = req.kind.trim().to_lowercase();
    req.options = req
        .options
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty())
        .map(|o| {
            if req.kind == FILTER_KIND_TAG {
                o.to_lowercase()
            } else {
                o.to_string()
            }
        })
        .collect();

    if req.name.is_empty() {
        return Err(AppError::BadRequest("filter name is required".into()));
    }
    validate_filter_definition(&req.kind, &req.key, &req.options).map_err(AppError::BadRequest)
}

/// list_filters
///
/// [Public Route] The facets a storefront shows next to the listing, in display order.
#[utoipa::path(
    get,
    path = "/filters",
    responses((status = 200, description = "Facets", body = [Filter]))
)]
pub async fn list_filters(State(state): State<AppState>) -> AppResult<Json<Vec<Filter>>> {
    Ok(Json(state.repo.list_filters().await?))
}

#[utoipa::path(
    post,
    path = "/admin/filters",
    request_body = FilterRequest,
    responses(
        (status = 201, description = "Created", body = Filter),
        (status = 400, description = "Invalid definition"),
        (status = 409, description = "Key taken")
    )
)]
pub async fn create_filter(
    user: AuthUser,
    State(state): State<AppState>,
    Json(mut payload): Json<FilterRequest>,
) -> AppResult<(StatusCode, Json<Filter>)> {
    user.require_admin()?;
    validate_filter(&mut payload)?;
    let filter = state.repo.create_filter(payload).await?;
    Ok((StatusCode::CREATED, Json(filter)))
}

#[utoipa::path(
    put,
    path = "/admin/filters/{id}",
    params(("id" = Uuid, Path, description = "Filter ID")),
    request_body = FilterRequest,
    responses(
        (status = 200, description = "Updated", body = Filter),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_filter(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(mut payload): Json<FilterRequest>,
) -> AppResult<Json<Filter>> {
    user.require_admin()?;
    validate_filter(&mut payload)?;
    state
        .repo
        .update_filter(id, payload)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("filter not found".into()))
}

#[utoipa::path(
    delete,
    path = "/admin/filters/{id}",
    params(("id" = Uuid, Path, description = "Filter ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_filter(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    if state.repo.delete_filter(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("filter not found".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_normalized_and_deduplicated() {
        let tags = normalize_tags(vec![
            "Brand: Acme".into(),
            "brand:acme".into(),
            "  ".into(),
            "SALE".into(),
        ]);
        assert_eq!(tags, vec!["brand:acme".to_string(), "sale".into()]);
    }

    #[test]
    fn category_slugs_are_checked() {
        let mut ok = CategoryRequest {
            name: " Kitchen ".into(),
            slug: "Kitchen-Tools".into(),
            description: None,
        };
        assert!(validate_category(&mut ok).is_ok());
        assert_eq!(ok.slug, "kitchen-tools");
        assert_eq!(ok.name, "Kitchen");

        let mut bad = CategoryRequest {
            name: "Kitchen".into(),
            slug: "kitchen tools".into(),
            description: None,
        };
        assert!(validate_category(&mut bad).is_err());
    }

    #[test]
    fn tag_filter_options_are_lower_cased() {
        let mut req = FilterRequest {
            name: "Brand".into(),
            key: " Brand ".into(),
            kind: "tag".into(),
            options: vec!["Acme".into(), "".into()],
            position: 0,
        };
        validate_filter(&mut req).unwrap();
        assert_eq!(req.key, "brand");
        assert_eq!(req.options, vec!["acme".to_string()]);
    }
}

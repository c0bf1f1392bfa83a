use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    AppState,
    auth::{AuthUser, ROLE_ADMIN, ROLE_CUSTOMER},
    checkout::validate_coupon_definition,
    error::{AppError, AppResult},
    models::{
        AdminDashboardStats, Coupon, CreateCouponRequest, PresignedUrlRequest,
        PresignedUrlResponse, UpdateUserRoleRequest, User,
    },
    storage::product_image_key,
};

/// get_admin_stats
///
/// [Admin Route] Dashboard counters.
#[utoipa::path(
    get,
    path = "/admin/stats",
    responses((status = 200, description = "Stats", body = AdminDashboardStats))
)]
pub async fn get_admin_stats(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<AdminDashboardStats>> {
    user.require_admin()?;
    Ok(Json(state.repo.get_stats().await?))
}

#[utoipa::path(
    get,
    path = "/admin/users",
    responses((status = 200, description = "All accounts", body = [User]))
)]
pub async fn admin_list_users(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<User>>> {
    user.require_admin()?;
    Ok(Json(state.repo.list_users().await?))
}

/// admin_set_user_role
///
/// [Admin Route] Promotes a customer to admin or demotes an admin. Admins cannot
/// change their own role, so the acting admin always remains.
#[utoipa::path(
    put,
    path = "/admin/users/{id}/role",
    request_body = UpdateUserRoleRequest,
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Updated account", body = User),
        (status = 400, description = "Unknown role or own account"),
        (status = 404, description = "User not found")
    )
)]
pub async fn admin_set_user_role(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRoleRequest>,
) -> AppResult<Json<User>> {
    user.require_admin()?;

    let role = payload.role.trim().to_lowercase();
    if role != ROLE_ADMIN && role != ROLE_CUSTOMER {
        return Err(AppError::BadRequest(format!(
            "role must be '{ROLE_ADMIN}' or '{ROLE_CUSTOMER}'"
        )));
    }
    if id == user.id {
        return Err(AppError::BadRequest("you cannot change your own role".into()));
    }

    let updated = state
        .repo
        .set_user_role(id, &role)
        .await?
        .ok_or_else(|| AppError::NotFound("user not found".into()))?;

    tracing::info!(admin_id = %user.id, user_id = %updated.id, role = %updated.role, "user role changed");
    Ok(Json(updated))
}

// --- Coupons ---

#[utoipa::path(
    get,
    path = "/admin/coupons",
    responses((status = 200, description = "Coupons", body = [Coupon]))
)]
pub async fn list_coupons(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Coupon>>> {
    user.require_admin()?;
    Ok(Json(state.repo.list_coupons().await?))
}

/// create_coupon
///
/// [Admin Route] Codes are stored upper-cased and matched case-insensitively.
#[utoipa::path(
    post,
    path = "/admin/coupons",
    request_body = CreateCouponRequest,
    responses(
        (status = 201, description = "Created", body = Coupon),
        (status = 400, description = "Invalid definition"),
        (status = 409, description = "Code taken")
    )
)]
pub async fn create_coupon(
    user: AuthUser,
    State(state): State<AppState>,
    Json(mut payload): Json<CreateCouponRequest>,
) -> AppResult<(StatusCode, Json<Coupon>)> {
    user.require_admin()?;

    payload.code = payload.code.trim().to_uppercase();
    payload.kind = payload.kind.trim().to_lowercase();
    if payload.code.is_empty() || payload.code.contains(char::is_whitespace) {
        return Err(AppError::BadRequest("coupon code must be a single word".into()));
    }
    validate_coupon_definition(&payload.kind, payload.value).map_err(AppError::BadRequest)?;
    if payload.min_order_cents < 0 {
        return Err(AppError::BadRequest("min_order_cents must not be negative".into()));
    }
    if payload.max_uses.is_some_and(|max| max < 1) {
        return Err(AppError::BadRequest("max_uses must be at least 1".into()));
    }

    let coupon = state.repo.create_coupon(payload).await?;
    tracing::info!(code = %coupon.code, "coupon created");
    Ok((StatusCode::CREATED, Json(coupon)))
}

#[utoipa::path(
    delete,
    path = "/admin/coupons/{id}",
    params(("id" = Uuid, Path, description = "Coupon ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_coupon(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    if state.repo.delete_coupon(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("coupon not found".into()))
    }
}

// --- Uploads ---

/// get_presigned_url
///
/// [Admin Route] A 10-minute URL for uploading one product image straight to the
/// bucket. The returned `resource_key` goes into `Product.images`.
#[utoipa::path(
    post,
    path = "/admin/upload/presigned",
    request_body = PresignedUrlRequest,
    responses(
        (status = 200, description = "URL", body = PresignedUrlResponse),
        (status = 400, description = "Not an image"),
        (status = 502, description = "Storage failure")
    )
)]
pub async fn get_presigned_url(
    user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<PresignedUrlRequest>,
) -> AppResult<Json<PresignedUrlResponse>> {
    user.require_admin()?;

    let object_key =
        product_image_key(&payload.filename, &payload.file_type).map_err(AppError::BadRequest)?;

    let upload_url = state
        .storage
        .get_presigned_upload_url(&object_key, &payload.file_type)
        .await
        .map_err(AppError::Storage)?;

    Ok(Json(PresignedUrlResponse {
        upload_url,
        resource_key: object_key,
    }))
}

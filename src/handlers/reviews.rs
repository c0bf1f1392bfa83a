use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    AppState,
    auth::AuthUser,
    error::{AppError, AppResult},
    models::{CreateReviewRequest, Review},
};

const MAX_COMMENT_LENGTH: usize = 2000;

/// list_product_reviews
///
/// [Public Route] Approved reviews of a product, newest first.
#[utoipa::path(
    get,
    path = "/products/{id}/reviews",
    params(("id" = Uuid, Path, description = "Product ID")),
    responses(
        (status = 200, description = "Reviews", body = [Review]),
        (status = 404, description = "Unknown product")
    )
)]
pub async fn list_product_reviews(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<Vec<Review>>> {
    if state.repo.get_product(product_id).await?.is_none() {
        return Err(AppError::NotFound("product not found".into()));
    }
    Ok(Json(state.repo.list_product_reviews(product_id).await?))
}

/// create_review
///
/// [Authenticated Route] One review per user and product. It stays hidden until an
/// admin approves it.
#[utoipa::path(
    post,
    path = "/products/{id}/reviews",
    params(("id" = Uuid, Path, description = "Product ID")),
    request_body = CreateReviewRequest,
    responses(
        (status = 201, description = "Submitted for moderation", body = Review),
        (status = 400, description = "Rating outside 1..=5"),
        (status = 409, description = "Already reviewed")
    )
)]
pub async fn create_review(
    user: AuthUser,
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Json(mut payload): Json<CreateReviewRequest>,
) -> AppResult<(StatusCode, Json<Review>)> {
    if !(1..=5).contains(&payload.rating) {
        return Err(AppError::BadRequest("rating must be between 1 and 5".into()));
    }
    payload.comment = payload.comment.trim().to_string();
    if payload.comment.chars().count() > MAX_COMMENT_LENGTH {
        return Err(AppError::BadRequest(format!(
            "comment must be at most {MAX_COMMENT_LENGTH} characters"
        )));
    }

    let product_visible = state
        .repo
        .get_product(product_id)
        .await?
        .is_some_and(|product| product.is_active);
    if !product_visible {
        return Err(AppError::NotFound("product not found".into()));
    }

    let review = state
        .repo
        .create_review(product_id, user.id, payload)
        .await?;
    Ok((StatusCode::CREATED, Json(review)))
}

// --- Moderation ---

#[utoipa::path(
    get,
    path = "/admin/reviews/pending",
    responses((status = 200, description = "Awaiting moderation", body = [Review]))
)]
pub async fn list_pending_reviews(
    user: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Review>>> {
    user.require_admin()?;
    Ok(Json(state.repo.list_pending_reviews().await?))
}

/// set_review_approval
///
/// [Admin Route] Publishes (`true`) or hides (`false`) a review. The product's
/// rating aggregates follow.
#[utoipa::path(
    put,
    path = "/admin/reviews/{id}/approval",
    params(("id" = Uuid, Path, description = "Review ID")),
    request_body = bool,
    responses(
        (status = 200, description = "Updated", body = Review),
        (status = 404, description = "Not Found")
    )
)]
pub async fn set_review_approval(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(approved): Json<bool>,
) -> AppResult<Json<Review>> {
    user.require_admin()?;
    state
        .repo
        .set_review_approval(id, approved)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("review not found".into()))
}

#[utoipa::path(
    delete,
    path = "/admin/reviews/{id}",
    params(("id" = Uuid, Path, description = "Review ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_review(
    user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    user.require_admin()?;
    if state.repo.delete_review(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("review not found".into()))
    }
}

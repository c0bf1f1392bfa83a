use axum::{Json, extract::State, http::StatusCode};

use crate::{
    AppState,
    auth::{
        AuthUser, MIN_PASSWORD_LENGTH, ROLE_ADMIN, ROLE_CUSTOMER, hash_password, issue_token,
        verify_password,
    },
    cart::GuestSession,
    error::{AppError, AppResult},
    models::{AuthResponse, LoginRequest, NewUser, RegisterRequest, User},
};

const MAX_NAME_LENGTH: usize = 100;

/// Lower-cases and sanity-checks an email address.
pub(crate) fn normalize_email(raw: &str) -> AppResult<String> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(AppError::BadRequest("a valid email address is required".into()))
    }
}

/// register
///
/// [Public Route] Creates a customer account. Passwords are stored as argon2 hashes;
/// the response never includes them. The address configured as `ADMIN_EMAIL` is
/// registered as an admin instead.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered", body = User),
        (status = 400, description = "Invalid email, name or password"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    let email = normalize_email(&payload.email)?;

    let name = payload.name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LENGTH {
        return Err(AppError::BadRequest(format!(
            "name must be between 1 and {MAX_NAME_LENGTH} characters"
        )));
    }
    if payload.password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }

    let role = if state.config.admin_email.as_deref() == Some(email.as_str()) {
        ROLE_ADMIN
    } else {
        ROLE_CUSTOMER
    };

    let user = state
        .repo
        .create_user(NewUser {
            email,
            name: name.to_string(),
            password_hash: hash_password(&payload.password)?,
            role: role.to_string(),
        })
        .await?;

    tracing::info!(user_id = %user.id, role = %user.role, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

/// login
///
/// [Public Route] Exchanges credentials for a bearer token. When the request still
/// carries the guest `x-session-id`, the guest cart is merged into the user's cart.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    params(("x-session-id" = Option<String>, Header, description = "Guest cart to merge")),
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    GuestSession(session_id): GuestSession,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    // Same answer for unknown email and wrong password.
    let invalid = || AppError::Unauthorized("invalid email or password".into());

    let email = payload.email.trim().to_lowercase();
    let (user, password_hash) = state
        .repo
        .get_user_credentials(&email)
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&payload.password, &password_hash) {
        tracing::debug!(user_id = %user.id, "password mismatch");
        return Err(invalid());
    }

    if let Some(session_id) = session_id {
        state.repo.merge_guest_cart(&session_id, user.id).await?;
    }

    let token = issue_token(&user, &state.config)?;
    Ok(Json(AuthResponse { token, user }))
}

/// get_me
///
/// [Authenticated Route] The caller's account.
#[utoipa::path(
    get,
    path = "/me",
    responses((status = 200, description = "Profile", body = User))
)]
pub async fn get_me(user: AuthUser, State(state): State<AppState>) -> AppResult<Json<User>> {
    state
        .repo
        .get_user(user.id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("user not found".into()))
}

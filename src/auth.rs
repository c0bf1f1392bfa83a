use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::{AppConfig, Env},
    error::AppError,
    models::User,
    repository::RepositoryState,
};

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_CUSTOMER: &str = "customer";

/// Minimum password length accepted at registration.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Header accepted in `Env::Local` to act as an existing user without a token.
pub const DEV_USER_HEADER: &str = "x-user-id";

/// Claims
///
/// Payload of the access tokens this service issues.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: Uuid,
    /// Role at issue time. Authorization re-reads the role from the database.
    pub role: String,
    pub exp: usize,
    pub iat: usize,
}

/// issue_token
///
/// Signs an HS256 access token for `user`, valid for `config.jwt_ttl_hours`.
pub fn issue_token(user: &User, config: &AppConfig) -> Result<String, AppError> {
    let now = Utc::now();
    let expires = now + Duration::hours(config.jwt_ttl_hours);
    let claims = Claims {
        sub: user.id,
        role: user.role.clone(),
        exp: usize::try_from(expires.timestamp())
            .map_err(|_| AppError::Internal("token expiry out of range".into()))?,
        iat: usize::try_from(now.timestamp())
            .map_err(|_| AppError::Internal("token issue time out of range".into()))?,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("failed to sign token: {e}")))
}

/// Decodes and validates a token, checking signature and expiry.
pub fn decode_token(token: &str, config: &AppConfig) -> Option<Claims> {
    let mut validation = Validation::default();
    validation.validate_exp = true;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .ok()
}

/// Hashes a password into a PHC string with a random salt.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("failed to hash password: {e}")))
}

/// Checks a password against a stored PHC hash. Malformed hashes never verify.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    PasswordHash::new(password_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

/// AuthUser
///
/// The resolved identity of an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    /// Rejects non-admin callers with 403.
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden("admin role required".into()))
        }
    }
}

/// Whether the request carries any credential `AuthUser` would inspect.
pub fn has_credentials(parts: &Parts, config: &AppConfig) -> bool {
    parts.headers.contains_key(header::AUTHORIZATION)
        || (config.env == Env::Local && parts.headers.contains_key(DEV_USER_HEADER))
}

/// AuthUser Extractor
///
/// 1. Local bypass: in `Env::Local`, an `x-user-id` header naming an existing user.
/// 2. `Authorization: Bearer <token>`, decoded and expiry-checked.
/// 3. The user is re-read so deleted accounts and role changes take effect at once.
///
/// Any failure rejects with 401.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        if config.env == Env::Local
            && let Some(user_id) = parts
                .headers
                .get(DEV_USER_HEADER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| Uuid::parse_str(value).ok())
            && let Some(user) = repo.get_user(user_id).await?
        {
            return Ok(AuthUser {
                id: user.id,
                role: user.role,
            });
        }

        let unauthorized = || AppError::Unauthorized("missing or invalid credentials".into());

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(unauthorized)?;

        let claims = decode_token(token, &config).ok_or_else(unauthorized)?;

        let user = repo.get_user(claims.sub).await?.ok_or_else(unauthorized)?;

        Ok(AuthUser {
            id: user.id,
            role: user.role,
        })
    }
}

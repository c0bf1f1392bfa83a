//! Cart identity resolution and guest-cart merging.
//!
//! A cart belongs either to a user or to an anonymous session. Guests identify
//! themselves with the `x-session-id` header; once they log in with that header
//! still set, the session cart is folded into the user's cart.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use uuid::Uuid;

use crate::{
    auth::{AuthUser, has_credentials},
    config::AppConfig,
    error::AppError,
    models::CartLine,
    repository::RepositoryState,
};

pub const SESSION_HEADER: &str = "x-session-id";
const MAX_SESSION_ID_LEN: usize = 128;

/// CartIdentity
///
/// The key a cart is looked up by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartIdentity {
    User(Uuid),
    Session(String),
}

/// Validates a guest session id: 1..=128 characters of `[A-Za-z0-9_-]`.
pub fn parse_session_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let valid = !raw.is_empty()
        && raw.len() <= MAX_SESSION_ID_LEN
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    valid.then(|| raw.to_string())
}

/// Reads and validates the guest session header, if present.
pub fn session_from_parts(parts: &Parts) -> Result<Option<String>, AppError> {
    match parts.headers.get(SESSION_HEADER) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(parse_session_id)
            .map(Some)
            .ok_or_else(|| AppError::BadRequest(format!("invalid {SESSION_HEADER} header"))),
    }
}

/// CartOwner
///
/// Resolves the cart identity of a request. Requests carrying credentials must
/// authenticate and use the user's cart; anonymous requests need a session header.
#[derive(Debug, Clone)]
pub struct CartOwner(pub CartIdentity);

impl<S> FromRequestParts<S> for CartOwner
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = AppConfig::from_ref(state);

        if has_credentials(parts, &config) {
            let user = AuthUser::from_request_parts(parts, state).await?;
            return Ok(CartOwner(CartIdentity::User(user.id)));
        }

        match session_from_parts(parts)? {
            Some(session_id) => Ok(CartOwner(CartIdentity::Session(session_id))),
            None => Err(AppError::BadRequest(format!(
                "sign in or send an {SESSION_HEADER} header to use a cart"
            ))),
        }
    }
}

/// GuestSession
///
/// Optional session header, used by login to find the cart to merge.
#[derive(Debug, Clone, Default)]
pub struct GuestSession(pub Option<String>);

impl<S> FromRequestParts<S> for GuestSession
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        session_from_parts(parts).map(GuestSession)
    }
}

/// merge_lines
///
/// Folds guest lines into user lines. Quantities of products present in both are
/// summed; order is user lines first, then guest-only lines, each in their
/// original order.
pub fn merge_lines(user_lines: &[CartLine], guest_lines: &[CartLine]) -> Vec<CartLine> {
    let mut merged: Vec<CartLine> = user_lines.to_vec();
    for guest in guest_lines {
        match merged.iter_mut().find(|line| line.product_id == guest.product_id) {
            Some(line) => line.quantity = line.quantity.saturating_add(guest.quantity),
            None => merged.push(guest.clone()),
        }
    }
    merged
}

/// Caps every merged quantity at the product's current stock, dropping lines with none left.
pub fn clamp_to_stock(lines: Vec<CartLine>) -> Vec<CartLine> {
    lines
        .into_iter()
        .filter_map(|mut line| {
            line.quantity = line.quantity.min(line.stock);
            (line.quantity > 0).then_some(line)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product_id: Uuid, quantity: i32, stock: i32) -> CartLine {
        CartLine {
            product_id,
            name: "Item".into(),
            unit_price_cents: 100,
            quantity,
            stock,
            image: None,
        }
    }

    #[test]
    fn merge_sums_shared_products_and_keeps_the_rest() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let user = vec![line(a, 1, 10), line(b, 2, 10)];
        let guest = vec![line(b, 3, 10), line(c, 1, 10)];

        let merged = merge_lines(&user, &guest);

        let quantities: Vec<(Uuid, i32)> =
            merged.iter().map(|l| (l.product_id, l.quantity)).collect();
        assert_eq!(quantities, vec![(a, 1), (b, 5), (c, 1)]);
    }

    #[test]
    fn merge_with_empty_sides() {
        let a = Uuid::new_v4();
        assert_eq!(merge_lines(&[], &[line(a, 2, 5)]), vec![line(a, 2, 5)]);
        assert_eq!(merge_lines(&[line(a, 2, 5)], &[]), vec![line(a, 2, 5)]);
    }

    #[test]
    fn clamp_caps_at_stock_and_drops_sold_out() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let clamped = clamp_to_stock(vec![line(a, 7, 4), line(b, 1, 0)]);
        assert_eq!(clamped, vec![line(a, 4, 4)]);
    }

    #[test]
    fn session_ids_are_validated() {
        assert_eq!(parse_session_id(" guest_123-abc "), Some("guest_123-abc".into()));
        assert_eq!(parse_session_id(""), None);
        assert_eq!(parse_session_id("has space"), None);
        assert_eq!(parse_session_id("../etc"), None);
        assert_eq!(parse_session_id(&"x".repeat(129)), None);
    }
}

/// Router Module Index
///
/// Routes are split by who may call them. Access control is attached per module
/// in `create_router`, so a handler's placement decides its protection.

/// Anonymous access: catalog, guest carts, login, payment webhook.
pub mod public;

/// Requires a resolved `AuthUser`.
pub mod authenticated;

/// Requires a resolved `AuthUser` with the admin role.
pub mod admin;

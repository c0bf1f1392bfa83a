//! HTTP handlers, grouped by area.
//!
//! Every handler returns `AppResult`, so failures render through `AppError`.
//! Admin handlers run behind the authentication layer and additionally call
//! `AuthUser::require_admin` before touching the repository.

mod admin;
mod auth;
mod cart;
mod catalog;
mod chat;
mod orders;
mod payment;
mod reviews;

pub use admin::*;
pub use auth::*;
pub use cart::*;
pub use catalog::*;
pub use chat::*;
pub use orders::*;
pub use payment::*;
pub use reviews::*;

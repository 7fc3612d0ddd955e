//! Request middleware and extractors

pub mod auth;
pub mod request_meta;

pub use auth::{auth_middleware, AuthUser, CurrentUser};
pub use request_meta::RequestMeta;

//! Tokens, password hashing and the request guard.

pub mod extract;
pub mod jwt;
pub mod password;

pub use extract::{session_guard, AuthUser};
pub use jwt::{JwtKeys, TokenLifetimes};

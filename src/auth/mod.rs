//! Token issuance and verification, password hashing and the request guard.

pub mod claims;
pub mod cookie;
pub mod extractors;
pub mod jwt;
pub mod password;

pub use claims::TokenKind;
pub use extractors::CurrentUser;
pub use jwt::{JwtKeys, TokenError};

//! Authentication: JWT verification and the request guard middleware.
//!
//! Session issuance lives in the account service; this server only
//! verifies bearer tokens it is handed.

mod jwt;
mod middleware;

pub use jwt::{Claims, JwtManager};
pub use middleware::{require_auth, AuthUser};

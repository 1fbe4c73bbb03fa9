// Public API - what other modules can use
pub use middleware::bearer_auth;
pub use token::{JwtTokenValidator, TokenValidator};
pub use types::{AuthUser, Claims};

// Internal modules
mod middleware;
mod token;
mod types;

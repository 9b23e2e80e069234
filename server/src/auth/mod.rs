pub mod authenticator;
pub mod token;

pub use authenticator::{Authenticator, Identity};
pub use token::{JwtVerifier, TokenVerifier};

//! Authentication against ADFS.
//!
//! Implements the OAuth2/OIDC implicit flow by driving a real browser
//! through the interactive login form and extracting tokens from the
//! redirect fragment.

pub mod error;
pub mod fragment;
pub mod orchestrator;
pub mod request;
pub mod tokens;

pub use error::{AuthError, AuthResult};
pub use tokens::TokenSet;

//! Identity-provider token verification.
//!
//! - `keys` - key-set fetching and caching by key identifier
//! - `verifier` - signature and claim checks producing a [`VerifiedIdentity`]
//! - `error` - failure kinds for both

pub mod error;
pub mod keys;
pub mod verifier;

pub use error::{KeyResolveError, VerifierConfigError, VerifyError};
pub use keys::{KeyResolver, SigningKey};
pub use verifier::{TokenVerifier, VerifiedIdentity};

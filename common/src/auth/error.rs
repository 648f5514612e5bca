//! Error types for key resolution and token verification.

use thiserror::Error;

/// Failure to obtain a signing key for a key identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyResolveError {
    /// The key set was fetched but holds no key with this identifier.
    #[error("Signing key not found: {kid}")]
    KeyNotFound {
        /// Key identifier that was looked up.
        kid: String,
    },

    /// The key set could not be fetched or parsed.
    #[error("Key set fetch failed: {0}")]
    KeyFetchFailed(String),
}

/// Reasons a presented token is not accepted.
///
/// These kinds are for diagnostics only. Peers see a single collapsed reason.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// Token structure, encoding or required claims are broken.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// No signing key exists for the token's key identifier.
    #[error("Unknown signing key: {0}")]
    UnknownKey(String),

    /// Signature mismatch, or a declared algorithm other than the required one.
    #[error("Invalid signature: {0}")]
    SignatureInvalid(String),

    /// The expiration claim has passed.
    #[error("Token expired")]
    Expired,

    /// The key set could not be fetched.
    #[error("Key fetch failed: {0}")]
    FetchFailed(String),

    /// Issuer or audience does not match the pinned value.
    #[error("Claim mismatch: {0}")]
    ClaimMismatch(String),
}

/// Identity settings that cannot produce a working verifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifierConfigError {
    /// Unknown algorithm name, or a symmetric one.
    #[error("Unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The key resolver could not be built.
    #[error("Key resolver setup failed: {0}")]
    Resolver(#[from] KeyResolveError),
}

impl From<KeyResolveError> for VerifyError {
    fn from(err: KeyResolveError) -> Self {
        match err {
            KeyResolveError::KeyNotFound { kid } => VerifyError::UnknownKey(kid),
            KeyResolveError::KeyFetchFailed(reason) => VerifyError::FetchFailed(reason),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for VerifyError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => VerifyError::Expired,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::InvalidEcdsaKey => VerifyError::SignatureInvalid(err.to_string()),
            ErrorKind::InvalidIssuer
            | ErrorKind::InvalidAudience
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature => VerifyError::ClaimMismatch(err.to_string()),
            _ => VerifyError::MalformedToken(err.to_string()),
        }
    }
}

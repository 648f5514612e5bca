//! Signed token verification against the identity provider's key set.

use std::str::FromStr;
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde_json::{Map, Value};

use super::error::{VerifierConfigError, VerifyError};
use super::keys::KeyResolver;
use crate::config::IdentityConfig;

/// Identity extracted from a token whose signature and claims checked out.
///
/// Only [`TokenVerifier::verify`] constructs this.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedIdentity {
    subject: String,
    issued_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
    raw_claims: Map<String, Value>,
}

impl VerifiedIdentity {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn raw_claims(&self) -> &Map<String, Value> {
        &self.raw_claims
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.raw_claims.get(name)
    }
}

/// Verifies tokens with a single pinned asymmetric algorithm.
pub struct TokenVerifier {
    resolver: Arc<KeyResolver>,
    algorithm: Algorithm,
    leeway_secs: u64,
    issuer: Option<String>,
    audience: Option<String>,
}

impl TokenVerifier {
    pub fn new(resolver: Arc<KeyResolver>, algorithm: Algorithm) -> Self {
        Self {
            resolver,
            algorithm,
            leeway_secs: 0,
            issuer: None,
            audience: None,
        }
    }

    /// Build a verifier and its key resolver from identity settings.
    pub fn from_config(config: &IdentityConfig) -> Result<Self, VerifierConfigError> {
        let algorithm = Algorithm::from_str(&config.algorithm)
            .map_err(|_| VerifierConfigError::UnsupportedAlgorithm(config.algorithm.clone()))?;
        if !is_asymmetric(algorithm) {
            return Err(VerifierConfigError::UnsupportedAlgorithm(config.algorithm.clone()));
        }

        let resolver = KeyResolver::new(config.jwks_url(), config.fetch_timeout())?;

        let mut verifier = Self::new(Arc::new(resolver), algorithm).with_leeway(config.leeway_secs);
        if let Some(issuer) = &config.issuer {
            verifier = verifier.with_issuer(issuer.clone());
        }
        if let Some(audience) = &config.audience {
            verifier = verifier.with_audience(audience.clone());
        }
        Ok(verifier)
    }

    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn resolver(&self) -> &Arc<KeyResolver> {
        &self.resolver
    }

    /// Verify `token` and return the identity it carries.
    ///
    /// The key is obtained before any signature work; if it cannot be, the
    /// result is `UnknownKey` or `FetchFailed` regardless of the signature.
    pub async fn verify(&self, token: &str) -> Result<VerifiedIdentity, VerifyError> {
        check_structure(token)?;

        let header = decode_header(token).map_err(|e| VerifyError::MalformedToken(e.to_string()))?;
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| VerifyError::UnknownKey("token header has no kid".to_string()))?;

        let key = self.resolver.resolve(kid).await?;

        if header.alg != self.algorithm {
            return Err(VerifyError::SignatureInvalid(format!(
                "token declares {:?}, required {:?}",
                header.alg, self.algorithm
            )));
        }
        if let Some(key_alg) = key.algorithm {
            if key_alg != self.algorithm {
                return Err(VerifyError::SignatureInvalid(format!(
                    "key {} is published for {:?}",
                    key.key_id, key_alg
                )));
            }
        }

        let data = decode::<Map<String, Value>>(token, &key.decoding_key, &self.validation())?;
        let identity = identity_from_claims(data.claims)?;

        // jsonwebtoken only rejects once exp is strictly in the past
        let leeway = i64::try_from(self.leeway_secs).unwrap_or(i64::MAX);
        if identity.expires_at.timestamp().saturating_add(leeway) <= Utc::now().timestamp() {
            return Err(VerifyError::Expired);
        }
        Ok(identity)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = self.leeway_secs;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

fn is_asymmetric(algorithm: Algorithm) -> bool {
    !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// Decode header and payload without trusting either.
fn check_structure(token: &str) -> Result<(), VerifyError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(VerifyError::MalformedToken(format!(
            "expected 3 non-empty segments, found {}",
            parts.len()
        )));
    }

    for (name, segment) in [("header", parts[0]), ("payload", parts[1])] {
        let bytes = URL_SAFE_NO_PAD
            .decode(segment)
            .map_err(|e| VerifyError::MalformedToken(format!("{} is not base64url: {}", name, e)))?;
        serde_json::from_slice::<Map<String, Value>>(&bytes)
            .map_err(|e| VerifyError::MalformedToken(format!("{} is not a JSON object: {}", name, e)))?;
    }
    Ok(())
}

fn identity_from_claims(claims: Map<String, Value>) -> Result<VerifiedIdentity, VerifyError> {
    let subject = claims
        .get("sub")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| VerifyError::MalformedToken("sub claim missing or not a string".to_string()))?
        .to_string();

    let expires_at = claims
        .get("exp")
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .ok_or_else(|| VerifyError::MalformedToken("exp claim is not a timestamp".to_string()))?;

    let issued_at = claims
        .get("iat")
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

    Ok(VerifiedIdentity {
        subject,
        issued_at,
        expires_at,
        raw_claims: claims,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PRIMARY_PEM: &[u8] = include_bytes!("../../../testdata/primary.pem");
    const ROGUE_PEM: &[u8] = include_bytes!("../../../testdata/rogue.pem");
    const JWKS: &str = include_str!("../../../testdata/jwks.json");

    fn sign(pem: &[u8], kid: Option<&str>, claims: Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(str::to_string);
        encode(&header, &claims, &EncodingKey::from_rsa_pem(pem).unwrap()).unwrap()
    }

    fn claims_for(sub: &str, exp_offset: i64) -> Value {
        let now = Utc::now().timestamp();
        json!({ "sub": sub, "iat": now, "exp": now + exp_offset, "token_use": "id" })
    }

    async fn jwks_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::from_str::<Value>(JWKS).unwrap()))
            .mount(&server)
            .await;
        server
    }

    fn verifier_for(server: &MockServer) -> TokenVerifier {
        let resolver = KeyResolver::new(server.uri(), Duration::from_secs(2)).unwrap();
        TokenVerifier::new(Arc::new(resolver), Algorithm::RS256)
    }

    #[tokio::test]
    async fn test_valid_token_yields_identity() {
        let server = jwks_server().await;
        let verifier = verifier_for(&server);
        let token = sign(PRIMARY_PEM, Some("primary-key"), claims_for("user-123", 600));

        let identity = verifier.verify(&token).await.unwrap();
        assert_eq!(identity.subject(), "user-123");
        assert!(identity.issued_at().is_some());
        assert!(identity.expires_at() > Utc::now());
        assert_eq!(identity.claim("token_use"), Some(&json!("id")));
    }

    #[tokio::test]
    async fn test_unknown_kid_is_unknown_key_not_bad_signature() {
        let server = jwks_server().await;
        let verifier = verifier_for(&server);
        let token = sign(ROGUE_PEM, Some("rogue-key"), claims_for("user-123", 600));

        let err = verifier.verify(&token).await.unwrap_err();
        assert_eq!(err, VerifyError::UnknownKey("rogue-key".to_string()));
    }

    #[tokio::test]
    async fn test_missing_kid_is_unknown_key() {
        let server = jwks_server().await;
        let verifier = verifier_for(&server);
        let token = sign(PRIMARY_PEM, None, claims_for("user-123", 600));

        assert!(matches!(verifier.verify(&token).await, Err(VerifyError::UnknownKey(_))));
    }

    #[tokio::test]
    async fn test_forged_signature_under_known_kid() {
        let server = jwks_server().await;
        let verifier = verifier_for(&server);
        let token = sign(ROGUE_PEM, Some("primary-key"), claims_for("user-123", 600));

        assert!(matches!(verifier.verify(&token).await, Err(VerifyError::SignatureInvalid(_))));
    }

    #[tokio::test]
    async fn test_expired_token_with_valid_signature() {
        let server = jwks_server().await;
        let verifier = verifier_for(&server);
        let token = sign(PRIMARY_PEM, Some("primary-key"), claims_for("user-123", -30));

        assert_eq!(verifier.verify(&token).await.unwrap_err(), VerifyError::Expired);
    }

    #[tokio::test]
    async fn test_token_expiring_this_second_is_expired() {
        let server = jwks_server().await;
        let verifier = verifier_for(&server);
        let token = sign(PRIMARY_PEM, Some("primary-key"), claims_for("user-123", 0));

        assert_eq!(verifier.verify(&token).await.unwrap_err(), VerifyError::Expired);
    }

    #[tokio::test]
    async fn test_leeway_extends_expiry() {
        let server = jwks_server().await;
        let verifier = verifier_for(&server).with_leeway(60);
        let token = sign(PRIMARY_PEM, Some("primary-key"), claims_for("user-123", -30));

        assert!(verifier.verify(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_symmetric_algorithm_is_rejected() {
        let server = jwks_server().await;
        let verifier = verifier_for(&server);
        let mut header = Header::new(Algorithm::HS256);
        header.kid = Some("primary-key".to_string());
        let token = encode(
            &header,
            &claims_for("user-123", 600),
            &EncodingKey::from_secret(JWKS.as_bytes()),
        )
        .unwrap();

        assert!(matches!(verifier.verify(&token).await, Err(VerifyError::SignatureInvalid(_))));
    }

    #[tokio::test]
    async fn test_fetch_failure_surfaces_as_fetch_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let verifier = verifier_for(&server);
        let token = sign(PRIMARY_PEM, Some("primary-key"), claims_for("user-123", 600));

        assert!(matches!(verifier.verify(&token).await, Err(VerifyError::FetchFailed(_))));
    }

    #[tokio::test]
    async fn test_malformed_tokens_never_fetch_keys() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::from_str::<Value>(JWKS).unwrap()))
            .expect(0)
            .mount(&server)
            .await;
        let verifier = verifier_for(&server);

        for token in ["", "abc", "a.b", "a.b.c", "!!!.???.sig", "e30.bm90LWpzb24.sig"] {
            let err = verifier.verify(token).await.unwrap_err();
            assert!(matches!(err, VerifyError::MalformedToken(_)), "token {:?} gave {:?}", token, err);
        }
    }

    #[tokio::test]
    async fn test_missing_subject_is_malformed() {
        let server = jwks_server().await;
        let verifier = verifier_for(&server);
        let exp = Utc::now().timestamp() + 600;
        let token = sign(PRIMARY_PEM, Some("primary-key"), json!({ "exp": exp }));

        assert!(matches!(verifier.verify(&token).await, Err(VerifyError::MalformedToken(_))));
    }

    #[tokio::test]
    async fn test_audience_is_ignored_unless_pinned() {
        let server = jwks_server().await;
        let mut claims = claims_for("user-123", 600);
        claims["aud"] = json!("some-app-client");
        let token = sign(PRIMARY_PEM, Some("primary-key"), claims);

        assert!(verifier_for(&server).verify(&token).await.is_ok());

        let pinned = verifier_for(&server).with_audience("other-client");
        assert!(matches!(pinned.verify(&token).await, Err(VerifyError::ClaimMismatch(_))));
    }

    #[tokio::test]
    async fn test_issuer_pinning() {
        let server = jwks_server().await;
        let mut claims = claims_for("user-123", 600);
        claims["iss"] = json!("https://issuer.example");
        let token = sign(PRIMARY_PEM, Some("primary-key"), claims);

        let ok = verifier_for(&server).with_issuer("https://issuer.example");
        assert!(ok.verify(&token).await.is_ok());

        let wrong = verifier_for(&server).with_issuer("https://elsewhere.example");
        assert!(matches!(wrong.verify(&token).await, Err(VerifyError::ClaimMismatch(_))));
    }

    #[test]
    fn test_from_config_refuses_symmetric_algorithm() {
        let config = IdentityConfig {
            algorithm: "HS256".to_string(),
            ..IdentityConfig::default()
        };
        assert!(matches!(
            TokenVerifier::from_config(&config),
            Err(VerifierConfigError::UnsupportedAlgorithm(alg)) if alg == "HS256"
        ));
    }

    #[test]
    fn test_from_config_refuses_unknown_algorithm() {
        let config = IdentityConfig {
            algorithm: "RS999".to_string(),
            ..IdentityConfig::default()
        };
        assert!(matches!(
            TokenVerifier::from_config(&config),
            Err(VerifierConfigError::UnsupportedAlgorithm(_))
        ));
    }
}

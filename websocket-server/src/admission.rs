// websocket-server/src/admission.rs
use async_trait::async_trait;
use common::auth::{TokenVerifier, VerifiedIdentity, VerifyError};
use common::{ConnectionRecord, RegistryConfig};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::registry::{ConnectionRegistry, RegistryError};

/// Anything able to turn a presented token into a verified identity
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, VerifyError>;
}

#[async_trait]
impl IdentityVerifier for TokenVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, VerifyError> {
        TokenVerifier::verify(self, token).await
    }
}

/// Why a connection was refused, as told to the peer.
///
/// Verifier and registry detail stays in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("Unauthorized: token missing")]
    MissingToken,
    #[error("Unauthorized: invalid token")]
    InvalidToken,
    #[error("Service Unavailable: registration failed")]
    RegistrationFailed,
}

impl RejectReason {
    pub fn status_code(&self) -> u16 {
        match self {
            RejectReason::MissingToken | RejectReason::InvalidToken => 401,
            RejectReason::RegistrationFailed => 503,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Accepted(ConnectionRecord),
    Rejected(RejectReason),
}

impl AdmissionOutcome {
    pub fn status_code(&self) -> u16 {
        match self {
            AdmissionOutcome::Accepted(_) => 200,
            AdmissionOutcome::Rejected(reason) => reason.status_code(),
        }
    }

    pub fn body(&self) -> String {
        match self {
            AdmissionOutcome::Accepted(_) => "Connected.".to_string(),
            AdmissionOutcome::Rejected(reason) => reason.to_string(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, AdmissionOutcome::Accepted(_))
    }
}

/// How often and how patiently to retry an unavailable registry
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each further retry
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Accept/reject decision for a freshly established connection.
///
/// Holds no per-connection state, so one handler serves all admissions concurrently.
pub struct AdmissionHandler {
    verifier: Arc<dyn IdentityVerifier>,
    registry: ConnectionRegistry,
    lease: Duration,
    retry: RetryPolicy,
}

impl AdmissionHandler {
    pub fn new(verifier: Arc<dyn IdentityVerifier>, registry: ConnectionRegistry, lease: Duration) -> Self {
        Self {
            verifier,
            registry,
            lease,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_config(
        verifier: Arc<dyn IdentityVerifier>,
        registry: ConnectionRegistry,
        config: &RegistryConfig,
    ) -> Self {
        Self::new(verifier, registry, config.lease()).with_retry(RetryPolicy {
            max_retries: config.max_retries,
            backoff: config.retry_backoff(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    /// Decide whether `connection_id`, presenting `token`, may stay connected
    pub async fn admit(&self, connection_id: &str, token: Option<&str>) -> AdmissionOutcome {
        let token = match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => token,
            None => {
                tracing::warn!("Connection {} presented no token", connection_id);
                return AdmissionOutcome::Rejected(RejectReason::MissingToken);
            },
        };

        let identity = match self.verifier.verify(token).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!("Connection {} rejected, token verification failed: {}", connection_id, e);
                return AdmissionOutcome::Rejected(RejectReason::InvalidToken);
            },
        };

        match self.register_with_retry(connection_id, identity.subject()).await {
            Ok(record) => AdmissionOutcome::Accepted(record),
            Err(e) => {
                tracing::error!("Connection {} rejected, registration failed: {}", connection_id, e);
                AdmissionOutcome::Rejected(RejectReason::RegistrationFailed)
            },
        }
    }

    async fn register_with_retry(
        &self,
        connection_id: &str,
        user_id: &str,
    ) -> Result<ConnectionRecord, RegistryError> {
        let mut attempt = 0;
        let mut backoff = self.retry.backoff;

        loop {
            match self.registry.register(connection_id, user_id, self.lease).await {
                Ok(record) => return Ok(record),
                Err(e) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "Registering {} failed ({}), retry {}/{} in {:?}",
                        connection_id,
                        e,
                        attempt,
                        self.retry.max_retries,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                },
                Err(e) => return Err(e),
            }
        }
    }
}

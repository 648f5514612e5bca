// websocket-server/src/registry.rs
use actix::{Addr, MailboxError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{now_whole_seconds, ConnectionRecord};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::actors::connection_store::{
    ConnectionStoreActor, CountConnections, GetConnection, PutConnection, RemoveConnection,
};

/// The backing store could not be reached in time
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Connection store unavailable: {0}")]
pub struct StoreError(pub String);

impl From<MailboxError> for StoreError {
    fn from(err: MailboxError) -> Self {
        StoreError(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Retryable: the store did not acknowledge the operation
    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),
}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        RegistryError::RegistryUnavailable(err.0)
    }
}

/// Key-value persistence for connection records, atomic per connection id
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Insert or replace the record stored under its connection id
    async fn put(&self, record: ConnectionRecord) -> Result<(), StoreError>;

    async fn get(&self, connection_id: &str) -> Result<Option<ConnectionRecord>, StoreError>;

    async fn remove(&self, connection_id: &str) -> Result<bool, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

/// [`ConnectionStore`] backed by a [`ConnectionStoreActor`] mailbox.
///
/// Every operation is bounded by `timeout`; a full or closed mailbox and an
/// elapsed timeout both surface as [`StoreError`].
#[derive(Clone)]
pub struct ActorConnectionStore {
    addr: Addr<ConnectionStoreActor>,
    timeout: Duration,
}

impl ActorConnectionStore {
    pub fn new(addr: Addr<ConnectionStoreActor>, timeout: Duration) -> Self {
        Self { addr, timeout }
    }
}

#[async_trait]
impl ConnectionStore for ActorConnectionStore {
    async fn put(&self, record: ConnectionRecord) -> Result<(), StoreError> {
        self.addr
            .send(PutConnection { record })
            .timeout(self.timeout)
            .await
            .map_err(StoreError::from)
    }

    async fn get(&self, connection_id: &str) -> Result<Option<ConnectionRecord>, StoreError> {
        let msg = GetConnection { connection_id: connection_id.to_string() };
        self.addr.send(msg).timeout(self.timeout).await.map_err(StoreError::from)
    }

    async fn remove(&self, connection_id: &str) -> Result<bool, StoreError> {
        let msg = RemoveConnection { connection_id: connection_id.to_string() };
        self.addr.send(msg).timeout(self.timeout).await.map_err(StoreError::from)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.addr
            .send(CountConnections)
            .timeout(self.timeout)
            .await
            .map_err(StoreError::from)
    }
}

/// Maps transport connection ids to authenticated users for a fixed lease
#[derive(Clone)]
pub struct ConnectionRegistry {
    store: Arc<dyn ConnectionStore>,
}

impl ConnectionRegistry {
    pub fn new(store: Arc<dyn ConnectionStore>) -> Self {
        Self { store }
    }

    /// Record `connection_id` as owned by `user_id` starting now.
    ///
    /// Overwrites any earlier record with the same connection id.
    pub async fn register(
        &self,
        connection_id: &str,
        user_id: &str,
        lease: Duration,
    ) -> Result<ConnectionRecord, RegistryError> {
        let record = ConnectionRecord::new(connection_id, user_id, now_whole_seconds(), lease);
        self.store.put(record.clone()).await?;

        tracing::info!(
            "Registered connection {} for user {} until {}",
            record.connection_id,
            record.user_id,
            record.expires_at
        );
        Ok(record)
    }

    pub fn is_expired(record: &ConnectionRecord, now: DateTime<Utc>) -> bool {
        record.is_expired(now)
    }

    pub async fn lookup(&self, connection_id: &str) -> Result<Option<ConnectionRecord>, RegistryError> {
        Ok(self.store.get(connection_id).await?)
    }

    pub async fn unregister(&self, connection_id: &str) -> Result<bool, RegistryError> {
        let removed = self.store.remove(connection_id).await?;
        if removed {
            tracing::info!("Unregistered connection {}", connection_id);
        }
        Ok(removed)
    }

    pub async fn live_count(&self) -> Result<usize, RegistryError> {
        Ok(self.store.count().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix::{Actor, Context, Handler, Message};

    fn registry() -> ConnectionRegistry {
        let addr = ConnectionStoreActor::new().start();
        ConnectionRegistry::new(Arc::new(ActorConnectionStore::new(addr, Duration::from_secs(1))))
    }

    #[actix::test]
    async fn test_register_applies_exact_lease() {
        let registry = registry();
        let record = registry
            .register("c-1", "user-123", Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(record.user_id, "user-123");
        assert_eq!((record.expires_at - record.connected_at).num_seconds(), 3600);
        assert!(!ConnectionRegistry::is_expired(&record, Utc::now()));
        assert!(ConnectionRegistry::is_expired(&record, record.expires_at));
    }

    #[actix::test]
    async fn test_register_twice_overwrites() {
        let registry = registry();
        registry.register("c-1", "alice", Duration::from_secs(60)).await.unwrap();
        registry.register("c-1", "bob", Duration::from_secs(60)).await.unwrap();

        assert_eq!(registry.live_count().await.unwrap(), 1);
        let stored = registry.lookup("c-1").await.unwrap().unwrap();
        assert_eq!(stored.user_id, "bob");
    }

    #[actix::test]
    async fn test_unregister() {
        let registry = registry();
        registry.register("c-1", "alice", Duration::from_secs(60)).await.unwrap();

        assert!(registry.unregister("c-1").await.unwrap());
        assert!(!registry.unregister("c-1").await.unwrap());
        assert!(registry.lookup("c-1").await.unwrap().is_none());
    }

    #[actix::test]
    async fn test_unresponsive_store_is_unavailable() {
        let registry = ConnectionRegistry::new(Arc::new(StalledStore {
            addr: StalledActor.start(),
            timeout: Duration::from_millis(30),
        }));

        let err = registry
            .register("c-1", "alice", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::RegistryUnavailable(_)));
    }

    // An actor whose handler sleeps far longer than the store timeout
    struct StalledActor;

    impl Actor for StalledActor {
        type Context = Context<Self>;
    }

    #[derive(Message)]
    #[rtype(result = "()")]
    struct Stall;

    impl Handler<Stall> for StalledActor {
        type Result = actix::ResponseFuture<()>;

        fn handle(&mut self, _msg: Stall, _ctx: &mut Self::Context) -> Self::Result {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
            })
        }
    }

    struct StalledStore {
        addr: actix::Addr<StalledActor>,
        timeout: Duration,
    }

    #[async_trait]
    impl ConnectionStore for StalledStore {
        async fn put(&self, _record: ConnectionRecord) -> Result<(), StoreError> {
            self.addr.send(Stall).timeout(self.timeout).await.map_err(StoreError::from)
        }

        async fn get(&self, _connection_id: &str) -> Result<Option<ConnectionRecord>, StoreError> {
            Ok(None)
        }

        async fn remove(&self, _connection_id: &str) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn count(&self) -> Result<usize, StoreError> {
            Ok(0)
        }
    }
}

// websocket-server/src/actors/connection_store.rs
use actix::{Actor, AsyncContext, Context, Handler, Message, MessageResult};
use chrono::{DateTime, Utc};
use common::ConnectionRecord;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

// Sweep expired records every minute unless configured otherwise
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Actor message: Insert or replace the record for its connection id
#[derive(Message)]
#[rtype(result = "()")]
pub struct PutConnection {
    pub record: ConnectionRecord,
}

/// Actor message: Fetch a live record by connection id
#[derive(Message)]
#[rtype(result = "Option<ConnectionRecord>")]
pub struct GetConnection {
    pub connection_id: String,
}

/// Actor message: Delete a record, returning whether one existed
#[derive(Message)]
#[rtype(result = "bool")]
pub struct RemoveConnection {
    pub connection_id: String,
}

/// Actor message: Delete every record whose lease ended at or before `now`
#[derive(Message)]
#[rtype(result = "usize")]
pub struct PurgeExpired {
    pub now: DateTime<Utc>,
}

/// Actor message: Count live records
#[derive(Message)]
#[rtype(result = "usize")]
pub struct CountConnections;

/// In-memory key-value store of connection records with time-indexed expiry.
///
/// Records are keyed by connection id. A secondary index ordered by
/// `expires_at` lets the periodic sweep delete elapsed leases without
/// scanning every record.
pub struct ConnectionStoreActor {
    records: HashMap<String, ConnectionRecord>,
    expiry_index: BTreeSet<(DateTime<Utc>, String)>,
    sweep_interval: Duration,
    expired_total: usize,
}

impl Default for ConnectionStoreActor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStoreActor {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            expiry_index: BTreeSet::new(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            expired_total: 0,
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    fn put(&mut self, record: ConnectionRecord) {
        if let Some(previous) = self.records.remove(&record.connection_id) {
            self.expiry_index.remove(&(previous.expires_at, previous.connection_id));
            tracing::debug!("Replacing record for connection: {}", record.connection_id);
        }

        self.expiry_index.insert((record.expires_at, record.connection_id.clone()));
        self.records.insert(record.connection_id.clone(), record);
    }

    fn remove(&mut self, connection_id: &str) -> bool {
        match self.records.remove(connection_id) {
            Some(record) => {
                self.expiry_index.remove(&(record.expires_at, record.connection_id));
                true
            },
            None => false,
        }
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let mut expired = Vec::new();
        for (expires_at, connection_id) in self.expiry_index.iter() {
            if *expires_at > now {
                break;
            }
            expired.push((*expires_at, connection_id.clone()));
        }

        for key in &expired {
            self.expiry_index.remove(key);
            self.records.remove(&key.1);
        }

        self.expired_total += expired.len();
        expired.len()
    }
}

impl Actor for ConnectionStoreActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!("ConnectionStoreActor started, sweeping every {:?}", self.sweep_interval);

        ctx.run_interval(self.sweep_interval, |act, _ctx| {
            let expired_count = act.purge_expired(Utc::now());
            if expired_count > 0 {
                tracing::info!("Expired {} connection records", expired_count);
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(
            "ConnectionStoreActor stopped. {} live records, {} expired during lifetime",
            self.records.len(),
            self.expired_total
        );
    }
}

impl Handler<PutConnection> for ConnectionStoreActor {
    type Result = ();

    fn handle(&mut self, msg: PutConnection, _ctx: &mut Self::Context) -> Self::Result {
        self.put(msg.record);
    }
}

impl Handler<GetConnection> for ConnectionStoreActor {
    type Result = MessageResult<GetConnection>;

    fn handle(&mut self, msg: GetConnection, _ctx: &mut Self::Context) -> Self::Result {
        // Elapsed leases are invisible even before the sweep deletes them
        let now = Utc::now();
        let record = self
            .records
            .get(&msg.connection_id)
            .filter(|record| !record.is_expired(now))
            .cloned();

        MessageResult(record)
    }
}

impl Handler<RemoveConnection> for ConnectionStoreActor {
    type Result = MessageResult<RemoveConnection>;

    fn handle(&mut self, msg: RemoveConnection, _ctx: &mut Self::Context) -> Self::Result {
        let removed = self.remove(&msg.connection_id);
        if removed {
            tracing::debug!("Removed record for connection: {}", msg.connection_id);
        }
        MessageResult(removed)
    }
}

impl Handler<PurgeExpired> for ConnectionStoreActor {
    type Result = MessageResult<PurgeExpired>;

    fn handle(&mut self, msg: PurgeExpired, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.purge_expired(msg.now))
    }
}

impl Handler<CountConnections> for ConnectionStoreActor {
    type Result = MessageResult<CountConnections>;

    fn handle(&mut self, _msg: CountConnections, _ctx: &mut Self::Context) -> Self::Result {
        let now = Utc::now();
        let live = self.records.values().filter(|record| !record.is_expired(now)).count();
        MessageResult(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix::Actor;
    use common::from_epoch_seconds;

    fn record(id: &str, user: &str, start: i64, lease_secs: u64) -> ConnectionRecord {
        ConnectionRecord::new(id, user, from_epoch_seconds(start), Duration::from_secs(lease_secs))
    }

    #[test]
    fn test_put_replaces_and_reindexes() {
        let mut store = ConnectionStoreActor::new();
        store.put(record("c-1", "alice", 100, 10));
        store.put(record("c-1", "bob", 200, 10));

        assert_eq!(store.records.len(), 1);
        assert_eq!(store.expiry_index.len(), 1);
        assert_eq!(store.records["c-1"].user_id, "bob");
    }

    #[test]
    fn test_purge_only_elapsed_leases() {
        let mut store = ConnectionStoreActor::new();
        store.put(record("early", "a", 100, 10));
        store.put(record("edge", "b", 105, 10));
        store.put(record("late", "c", 200, 10));

        let purged = store.purge_expired(from_epoch_seconds(115));
        assert_eq!(purged, 2);
        assert!(store.records.contains_key("late"));
        assert_eq!(store.expiry_index.len(), 1);
        assert_eq!(store.expired_total, 2);
    }

    #[test]
    fn test_remove_clears_index() {
        let mut store = ConnectionStoreActor::new();
        store.put(record("c-1", "a", 100, 10));
        assert!(store.remove("c-1"));
        assert!(!store.remove("c-1"));
        assert!(store.expiry_index.is_empty());
    }

    #[actix::test]
    async fn test_get_hides_elapsed_records() {
        let addr = ConnectionStoreActor::new().start();
        let past = Utc::now().timestamp() - 100;
        addr.send(PutConnection { record: record("old", "a", past, 10) }).await.unwrap();
        addr.send(PutConnection { record: record("new", "b", Utc::now().timestamp(), 3600) }).await.unwrap();

        let old = addr.send(GetConnection { connection_id: "old".to_string() }).await.unwrap();
        let new = addr.send(GetConnection { connection_id: "new".to_string() }).await.unwrap();
        assert!(old.is_none());
        assert_eq!(new.map(|r| r.user_id), Some("b".to_string()));
    }

    #[actix::test]
    async fn test_periodic_sweep_deletes_elapsed_records() {
        let addr = ConnectionStoreActor::new()
            .with_sweep_interval(Duration::from_millis(20))
            .start();
        let past = Utc::now().timestamp() - 100;
        addr.send(PutConnection { record: record("old", "a", past, 10) }).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        // Nothing left for an explicit purge to delete
        let purged = addr.send(PurgeExpired { now: Utc::now() }).await.unwrap();
        assert_eq!(purged, 0);
    }

    #[actix::test]
    async fn test_count_skips_elapsed_records_before_sweep() {
        let addr = ConnectionStoreActor::new().start();
        let now = Utc::now().timestamp();
        addr.send(PutConnection { record: record("old", "a", now - 100, 10) }).await.unwrap();
        addr.send(PutConnection { record: record("new", "b", now, 3600) }).await.unwrap();

        assert_eq!(addr.send(CountConnections).await.unwrap(), 1);
    }

    #[actix::test]
    async fn test_purge_message_reports_deleted_records() {
        let addr = ConnectionStoreActor::new().start();
        addr.send(PutConnection { record: record("a", "u", 100, 10) }).await.unwrap();
        addr.send(PutConnection { record: record("b", "u", 100, 50) }).await.unwrap();

        let purged = addr.send(PurgeExpired { now: from_epoch_seconds(120) }).await.unwrap();
        assert_eq!(purged, 1);
        let purged = addr.send(PurgeExpired { now: from_epoch_seconds(120) }).await.unwrap();
        assert_eq!(purged, 0);
    }
}

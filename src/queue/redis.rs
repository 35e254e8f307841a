//! Redis Streams queue transport.
//!
//! The source queue is a stream read through a consumer group by a single,
//! exclusive consumer. Unacknowledged entries stay in the consumer's pending
//! list, which is how a rolled-back message gets redelivered.

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::{RedisResult, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::{Delivery, Headers, MessageQueue, QueueMessage, Transaction};
use crate::{config::QueueConfig, Error, Result};

/// Stream entry field holding the message body; every other field is a header.
pub const BODY_FIELD: &str = "body";

// XREADGROUP reply: [(stream, [(entry id, [(field, value)])])]
type StreamReply = Vec<(String, Vec<(String, Vec<(String, Vec<u8>)>)>)>;

const REFRESH_LEASE: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('pexpire', KEYS[1], ARGV[2])
else
    return 0
end
";

const RELEASE_LEASE: &str = r"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
";

// KEYS: lease, source stream, one per staged send.
// ARGV: owner, group, entry id, then per send a field count and its fields.
// Every check runs before the first write, so a rejected commit writes nothing.
const COMMIT: &str = r"
if redis.call('get', KEYS[1]) ~= ARGV[1] then
    return redis.error_reply('LEASELOST exclusive consumer lease is held by another consumer')
end
if #redis.call('xpending', KEYS[2], ARGV[2], ARGV[3], ARGV[3], 1, ARGV[1]) == 0 then
    return redis.error_reply('NOTPENDING entry ' .. ARGV[3] .. ' is not pending for this consumer')
end
for i = 3, #KEYS do
    local kind = redis.call('type', KEYS[i])['ok']
    if kind ~= 'stream' and kind ~= 'none' then
        return redis.error_reply('WRONGTYPE ' .. KEYS[i] .. ' holds a ' .. kind .. ', not a stream')
    end
end
local pos = 4
for i = 3, #KEYS do
    local count = tonumber(ARGV[pos])
    redis.call('xadd', KEYS[i], '*', unpack(ARGV, pos + 1, pos + count))
    pos = pos + count + 1
end
return redis.call('xack', KEYS[2], ARGV[2], ARGV[3])
";

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

pub struct RedisQueue {
    redis: ConnectionManager,
    config: QueueConfig,
    lease_key: String,
    /// Lease owner and consumer-group consumer name; unique per process start.
    owner: String,
    check_pending: AtomicBool,
    lease_lost: Arc<AtomicBool>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl RedisQueue {
    pub async fn connect(config: &QueueConfig) -> Result<Self> {
        info!(queue = %config.source_queue, "Connecting to Redis queue");
        let client = redis::Client::open(config.url.as_str())?;
        let redis = ConnectionManager::new(client).await?;

        Ok(Self {
            redis,
            lease_key: format!("{}:exclusive-consumer", config.source_queue),
            owner: format!(
                "{}-{}-{}-{}",
                config.consumer_name,
                std::process::id(),
                chrono::Utc::now().timestamp_millis(),
                NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed)
            ),
            config: config.clone(),
            check_pending: AtomicBool::new(true),
            lease_lost: Arc::new(AtomicBool::new(false)),
            heartbeat: Mutex::new(None),
        })
    }

    /// Creates the consumer group (and the stream) if they don't exist yet.
    pub async fn init_consumer_group(&self) -> Result<()> {
        let mut conn = self.redis.clone();

        let result: RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.source_queue)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                info!(
                    stream = %self.config.source_queue,
                    group = %self.config.consumer_group,
                    "Created consumer group"
                );
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(
                    stream = %self.config.source_queue,
                    group = %self.config.consumer_group,
                    "Consumer group already exists"
                );
                Ok(())
            }
            Err(e) => Err(Error::Redis(e)),
        }
    }

    /// Waits until this instance is the only active consumer of the queue,
    /// then keeps the lease alive in the background until released.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn acquire_exclusive(&self) -> Result<()> {
        let mut standby_logged = false;
        loop {
            let mut conn = self.redis.clone();
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&self.lease_key)
                .arg(&self.owner)
                .arg("NX")
                .arg("PX")
                .arg(self.config.lease_ttl_ms)
                .query_async(&mut conn)
                .await?;

            if acquired.is_some() {
                info!(queue = %self.config.source_queue, "Acquired exclusive consumer lease");
                self.lease_lost.store(false, Ordering::Release);
                self.start_heartbeat();
                self.adopt_orphaned_entries().await?;
                return Ok(());
            }
            if !standby_logged {
                info!(queue = %self.config.source_queue, "Another consumer is active, standing by");
                standby_logged = true;
            }
            tokio::time::sleep(Duration::from_millis(self.config.lease_ttl_ms / 3)).await;
        }
    }

    pub async fn release_exclusive(&self) -> Result<()> {
        self.stop_heartbeat();
        self.remove_consumer_if_idle().await?;

        let mut conn = self.redis.clone();
        let _: i64 = redis::Script::new(RELEASE_LEASE)
            .key(&self.lease_key)
            .arg(&self.owner)
            .invoke_async(&mut conn)
            .await?;
        info!(queue = %self.config.source_queue, "Released exclusive consumer lease");
        Ok(())
    }

    fn start_heartbeat(&self) {
        let mut conn = self.redis.clone();
        let lease_key = self.lease_key.clone();
        let owner = self.owner.clone();
        let ttl_ms = self.config.lease_ttl_ms;
        let lease_lost = Arc::clone(&self.lease_lost);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis((ttl_ms / 3).max(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match refresh_lease(&mut conn, &lease_key, &owner, ttl_ms).await {
                    Ok(true) => debug!(lease = %lease_key, "Refreshed exclusive consumer lease"),
                    Ok(false) => {
                        lease_lost.store(true, Ordering::Release);
                        error!(lease = %lease_key, "Lost exclusive consumer lease, stopping");
                        break;
                    }
                    // The lease outlives two missed beats; the next tick retries.
                    Err(e) => warn!(lease = %lease_key, error = %e, "Lease heartbeat failed"),
                }
            }
        });

        if let Some(previous) = self.heartbeat_slot().replace(handle) {
            previous.abort();
        }
    }

    fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat_slot().take() {
            handle.abort();
        }
    }

    fn heartbeat_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.heartbeat.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_lease(&self) -> Result<()> {
        if self.lease_lost.load(Ordering::Acquire) {
            return Err(Error::Transport(format!(
                "lost exclusive consumer lease on '{}'",
                self.config.source_queue
            )));
        }
        Ok(())
    }

    /// Moves entries left pending by earlier consumers (crashed processes
    /// had a different owner name) onto this consumer.
    async fn adopt_orphaned_entries(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        let mut cursor = "0-0".to_string();
        let mut adopted = 0usize;

        loop {
            let reply: Vec<Value> = redis::cmd("XAUTOCLAIM")
                .arg(&self.config.source_queue)
                .arg(&self.config.consumer_group)
                .arg(&self.owner)
                .arg(0)
                .arg(&cursor)
                .arg("COUNT")
                .arg(100)
                .arg("JUSTID")
                .query_async(&mut conn)
                .await?;

            // Redis 7 appends a third element listing deleted ids.
            let (next, ids) = match reply.as_slice() {
                [next, ids, ..] => (
                    redis::from_redis_value::<String>(next)?,
                    redis::from_redis_value::<Vec<String>>(ids)?,
                ),
                _ => {
                    return Err(Error::Transport(
                        "unexpected XAUTOCLAIM reply".to_string(),
                    ))
                }
            };
            adopted += ids.len();
            if next == "0-0" {
                break;
            }
            cursor = next;
        }

        if adopted > 0 {
            warn!(count = adopted, "Adopted unacknowledged messages from previous consumers");
        }
        self.check_pending.store(true, Ordering::Release);
        Ok(())
    }

    async fn remove_consumer_if_idle(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        let pending: Vec<(String, String, i64, i64)> = redis::cmd("XPENDING")
            .arg(&self.config.source_queue)
            .arg(&self.config.consumer_group)
            .arg("-")
            .arg("+")
            .arg(1)
            .arg(&self.owner)
            .query_async(&mut conn)
            .await?;

        // Pending entries stay attached to this consumer for the next owner to adopt.
        if pending.is_empty() {
            let _: i64 = redis::cmd("XGROUP")
                .arg("DELCONSUMER")
                .arg(&self.config.source_queue)
                .arg(&self.config.consumer_group)
                .arg(&self.owner)
                .query_async(&mut conn)
                .await?;
        }
        Ok(())
    }

    /// Reads one entry; `start` is `"0"` for own pending entries, `">"` for new ones.
    async fn read_one(&self, start: &str, block_ms: Option<u64>) -> Result<Option<Delivery>> {
        let mut conn = self.redis.clone();

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.owner);
        if let Some(block_ms) = block_ms {
            cmd.arg("BLOCK").arg(block_ms);
        }
        cmd.arg("COUNT")
            .arg(1)
            .arg("STREAMS")
            .arg(&self.config.source_queue)
            .arg(start);

        let reply: Option<StreamReply> = cmd.query_async(&mut conn).await?;
        let entry = reply
            .into_iter()
            .flatten()
            .flat_map(|(_, entries)| entries)
            .next();

        let Some((id, fields)) = entry else {
            return Ok(None);
        };

        let redelivered = start != ">";
        let delivery_count = if redelivered {
            self.delivery_count(&id).await?
        } else {
            1
        };
        Ok(Some(self.to_delivery(id, fields, redelivered, delivery_count)))
    }

    async fn delivery_count(&self, id: &str) -> Result<u32> {
        let mut conn = self.redis.clone();
        let pending: Vec<(String, String, i64, i64)> = redis::cmd("XPENDING")
            .arg(&self.config.source_queue)
            .arg(&self.config.consumer_group)
            .arg(id)
            .arg(id)
            .arg(1)
            .query_async(&mut conn)
            .await?;

        Ok(pending
            .first()
            .map(|(_, _, _, count)| u32::try_from(*count).unwrap_or(u32::MAX))
            .unwrap_or(1))
    }

    fn to_delivery(
        &self,
        id: String,
        fields: Vec<(String, Vec<u8>)>,
        redelivered: bool,
        delivery_count: u32,
    ) -> Delivery {
        let mut payload = Bytes::new();
        let mut headers = Headers::new();
        for (name, value) in fields {
            if name == BODY_FIELD {
                payload = Bytes::from(value);
            } else {
                headers.insert(name, Bytes::from(value));
            }
        }

        Delivery {
            id,
            queue: self.config.source_queue.clone(),
            payload,
            headers,
            redelivered,
            delivery_count,
        }
    }
}

impl Drop for RedisQueue {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

#[async_trait]
impl MessageQueue for RedisQueue {
    async fn receive(&self) -> Result<Transaction> {
        loop {
            self.check_lease()?;

            if self.check_pending.load(Ordering::Acquire) {
                match self.read_one("0", None).await? {
                    Some(delivery) => {
                        warn!(
                            id = %delivery.id,
                            delivery_count = delivery.delivery_count,
                            "Redelivering unacknowledged message"
                        );
                        return Ok(Transaction::new(delivery));
                    }
                    None => self.check_pending.store(false, Ordering::Release),
                }
            }

            if let Some(delivery) = self.read_one(">", Some(self.config.block_ms)).await? {
                return Ok(Transaction::new(delivery));
            }
        }
    }

    async fn ensure_active(&self) -> Result<()> {
        self.check_lease()
    }

    async fn commit(&self, tx: Transaction) -> Result<()> {
        let (delivery, staged) = tx.into_parts();
        if let Err(e) = self.check_lease() {
            self.check_pending.store(true, Ordering::Release);
            return Err(e);
        }

        let script = redis::Script::new(COMMIT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(&self.lease_key)
            .key(&self.config.source_queue)
            .arg(&self.owner)
            .arg(&self.config.consumer_group)
            .arg(&delivery.id);
        for (destination, message) in &staged {
            let fields = entry_fields(message);
            invocation.key(destination).arg(fields.len() * 2);
            for (name, value) in fields {
                invocation.arg(name).arg(value);
            }
        }

        let mut conn = self.redis.clone();
        let result: RedisResult<i64> = invocation.invoke_async(&mut conn).await;
        match result {
            Ok(_) => {
                debug!(id = %delivery.id, sends = staged.len(), "Committed delivery");
                Ok(())
            }
            Err(e) => {
                self.check_pending.store(true, Ordering::Release);
                if e.code() == Some("LEASELOST") {
                    self.lease_lost.store(true, Ordering::Release);
                }
                Err(Error::Transaction(format!(
                    "commit of {} failed: {}",
                    delivery.id, e
                )))
            }
        }
    }

    async fn rollback(&self, tx: Transaction) -> Result<()> {
        self.check_pending.store(true, Ordering::Release);
        debug!(
            id = %tx.delivery().id,
            delay_ms = self.config.redelivery_delay_ms,
            "Rolled back delivery"
        );
        tokio::time::sleep(Duration::from_millis(self.config.redelivery_delay_ms)).await;
        Ok(())
    }
}

async fn refresh_lease(
    conn: &mut ConnectionManager,
    lease_key: &str,
    owner: &str,
    ttl_ms: u64,
) -> RedisResult<bool> {
    let refreshed: i64 = redis::Script::new(REFRESH_LEASE)
        .key(lease_key)
        .arg(owner)
        .arg(ttl_ms)
        .invoke_async(conn)
        .await?;
    Ok(refreshed == 1)
}

/// Flattens `message` into stream entry fields, as [`RedisQueue`] reads them back.
fn entry_fields(message: &QueueMessage) -> Vec<(String, Vec<u8>)> {
    let mut fields = vec![(BODY_FIELD.to_string(), message.payload.to_vec())];
    fields.extend(
        message
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.to_vec())),
    );
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(name: &str) -> QueueConfig {
        QueueConfig {
            url: std::env::var("TEST_REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            source_queue: format!("test_queue_{}_{}", name, std::process::id()),
            dead_letter_queue: format!("test_dlq_{}_{}", name, std::process::id()),
            consumer_group: "test-group".to_string(),
            consumer_name: "test-consumer".to_string(),
            block_ms: 500,
            redelivery_delay_ms: 10,
            lease_ttl_ms: 5000,
        }
    }

    async fn connect(config: &QueueConfig) -> RedisQueue {
        let queue = RedisQueue::connect(config).await.unwrap();
        queue.init_consumer_group().await.unwrap();
        queue
    }

    async fn push(conn: &mut ConnectionManager, stream: &str, body: &str) -> String {
        redis::cmd("XADD")
            .arg(stream)
            .arg("*")
            .arg(BODY_FIELD)
            .arg(body)
            .query_async(conn)
            .await
            .unwrap()
    }

    async fn pending_count(conn: &mut ConnectionManager, config: &QueueConfig) -> usize {
        let pending: Vec<(String, String, i64, i64)> = redis::cmd("XPENDING")
            .arg(&config.source_queue)
            .arg(&config.consumer_group)
            .arg("-")
            .arg("+")
            .arg(10)
            .query_async(conn)
            .await
            .unwrap();
        pending.len()
    }

    async fn cleanup(conn: &mut ConnectionManager, config: &QueueConfig) {
        let _: () = redis::cmd("DEL")
            .arg(&config.source_queue)
            .arg(&config.dead_letter_queue)
            .arg(format!("{}:exclusive-consumer", config.source_queue))
            .query_async(conn)
            .await
            .unwrap();
    }

    #[test]
    fn test_entry_fields_put_body_first() {
        let message = QueueMessage::new("<Message/>")
            .with_header("origin", "hr")
            .with_header("trace", Bytes::from_static(&[0xff, 0x00]));
        let fields = entry_fields(&message);

        assert_eq!(fields[0], ("body".to_string(), b"<Message/>".to_vec()));
        assert_eq!(fields[1], ("origin".to_string(), b"hr".to_vec()));
        assert_eq!(fields[2], ("trace".to_string(), vec![0xff, 0x00]));
    }

    #[tokio::test]
    #[ignore] // Requires running Redis
    async fn test_commit_acks_and_sends_atomically() {
        let config = test_config("commit");
        let queue = connect(&config).await;
        queue.acquire_exclusive().await.unwrap();

        let mut conn = queue.redis.clone();
        push(&mut conn, &config.source_queue, "payload").await;

        let mut tx = queue.receive().await.unwrap();
        assert_eq!(tx.delivery().payload, Bytes::from("payload"));
        tx.send(
            &config.dead_letter_queue,
            QueueMessage::new("payload").with_header("trace", Bytes::from_static(&[0xc3, 0x28])),
        );
        queue.commit(tx).await.unwrap();

        let entries: Vec<(String, Vec<(String, Vec<u8>)>)> = redis::cmd("XRANGE")
            .arg(&config.dead_letter_queue)
            .arg("-")
            .arg("+")
            .query_async(&mut conn)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0]
            .1
            .contains(&("trace".to_string(), vec![0xc3, 0x28])));
        assert_eq!(pending_count(&mut conn, &config).await, 0);

        queue.release_exclusive().await.unwrap();
        cleanup(&mut conn, &config).await;
    }

    #[tokio::test]
    #[ignore] // Requires running Redis
    async fn test_rollback_redelivers() {
        let config = test_config("rollback");
        let queue = connect(&config).await;
        queue.acquire_exclusive().await.unwrap();

        let mut conn = queue.redis.clone();
        push(&mut conn, &config.source_queue, "again").await;

        let tx = queue.receive().await.unwrap();
        let first_id = tx.delivery().id.clone();
        queue.rollback(tx).await.unwrap();

        let tx = queue.receive().await.unwrap();
        assert_eq!(tx.delivery().id, first_id);
        assert!(tx.delivery().redelivered);
        assert_eq!(tx.delivery().delivery_count, 2);
        queue.commit(tx).await.unwrap();

        queue.release_exclusive().await.unwrap();
        cleanup(&mut conn, &config).await;
    }

    #[tokio::test]
    #[ignore] // Requires running Redis
    async fn test_commit_to_non_stream_destination_writes_nothing() {
        let config = test_config("wrongtype");
        let queue = connect(&config).await;
        queue.acquire_exclusive().await.unwrap();

        let mut conn = queue.redis.clone();
        let _: () = redis::cmd("SET")
            .arg(&config.dead_letter_queue)
            .arg("not a stream")
            .query_async(&mut conn)
            .await
            .unwrap();
        push(&mut conn, &config.source_queue, "payload").await;

        let mut tx = queue.receive().await.unwrap();
        let id = tx.delivery().id.clone();
        tx.send("test_other_destination_wrongtype", QueueMessage::new("first"));
        tx.send(&config.dead_letter_queue, QueueMessage::new("payload"));
        let err = queue.commit(tx).await.unwrap_err();

        assert!(matches!(err, Error::Transaction(_)));
        assert!(err.to_string().contains("not a stream"));
        assert_eq!(pending_count(&mut conn, &config).await, 1);
        let other_exists: bool = redis::cmd("EXISTS")
            .arg("test_other_destination_wrongtype")
            .query_async(&mut conn)
            .await
            .unwrap();
        assert!(!other_exists);

        // The delivery is still ours and comes back
        let tx = queue.receive().await.unwrap();
        assert_eq!(tx.delivery().id, id);
        queue.commit(tx).await.unwrap();

        queue.release_exclusive().await.unwrap();
        cleanup(&mut conn, &config).await;
    }

    #[tokio::test]
    #[ignore] // Requires running Redis
    async fn test_lease_taken_over_mid_processing() {
        let mut config = test_config("takeover");
        config.lease_ttl_ms = 600;
        let queue = connect(&config).await;
        queue.acquire_exclusive().await.unwrap();

        let mut conn = queue.redis.clone();
        push(&mut conn, &config.source_queue, "payload").await;
        let mut tx = queue.receive().await.unwrap();

        // Another instance grabs the lease while the message is being processed
        let _: () = redis::cmd("SET")
            .arg(&queue.lease_key)
            .arg("intruder")
            .query_async(&mut conn)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(queue.ensure_active().await.is_err());
        tx.send(&config.dead_letter_queue, QueueMessage::new("payload"));
        let err = queue.commit(tx).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_) | Error::Transaction(_)));

        let dlq_len: i64 = redis::cmd("XLEN")
            .arg(&config.dead_letter_queue)
            .query_async(&mut conn)
            .await
            .unwrap();
        assert_eq!(dlq_len, 0);
        assert_eq!(pending_count(&mut conn, &config).await, 1);
        assert!(queue.receive().await.is_err());

        queue.release_exclusive().await.unwrap();
        let holder: Option<String> = redis::cmd("GET")
            .arg(&queue.lease_key)
            .query_async(&mut conn)
            .await
            .unwrap();
        assert_eq!(holder.as_deref(), Some("intruder"));
        cleanup(&mut conn, &config).await;
    }

    #[tokio::test]
    #[ignore] // Requires running Redis
    async fn test_commit_rejected_once_lease_is_gone() {
        let config = test_config("expired");
        let queue = connect(&config).await;
        queue.acquire_exclusive().await.unwrap();

        let mut conn = queue.redis.clone();
        push(&mut conn, &config.source_queue, "payload").await;
        let mut tx = queue.receive().await.unwrap();

        // Expiry between heartbeats
        let _: () = redis::cmd("DEL")
            .arg(&queue.lease_key)
            .query_async(&mut conn)
            .await
            .unwrap();
        tx.send(&config.dead_letter_queue, QueueMessage::new("payload"));
        let err = queue.commit(tx).await.unwrap_err();

        assert!(matches!(err, Error::Transaction(_)));
        assert!(err.to_string().contains("held by another consumer"));
        assert!(queue.ensure_active().await.is_err());
        assert_eq!(pending_count(&mut conn, &config).await, 1);

        queue.release_exclusive().await.unwrap();
        cleanup(&mut conn, &config).await;
    }

    #[tokio::test]
    #[ignore] // Requires running Redis
    async fn test_heartbeat_keeps_lease_alive() {
        let mut config = test_config("heartbeat");
        config.lease_ttl_ms = 600;
        let queue = connect(&config).await;
        queue.acquire_exclusive().await.unwrap();

        tokio::time::sleep(Duration::from_millis(2000)).await;

        let mut conn = queue.redis.clone();
        let holder: Option<String> = redis::cmd("GET")
            .arg(&queue.lease_key)
            .query_async(&mut conn)
            .await
            .unwrap();
        assert_eq!(holder.as_deref(), Some(queue.owner.as_str()));
        assert!(queue.ensure_active().await.is_ok());

        queue.release_exclusive().await.unwrap();
        let holder: Option<String> = redis::cmd("GET")
            .arg(&queue.lease_key)
            .query_async(&mut conn)
            .await
            .unwrap();
        assert!(holder.is_none());
        cleanup(&mut conn, &config).await;
    }

    #[tokio::test]
    #[ignore] // Requires running Redis
    async fn test_orphaned_entries_adopted_on_acquire() {
        let config = test_config("orphaned");
        let previous = connect(&config).await;
        previous.acquire_exclusive().await.unwrap();

        let mut conn = previous.redis.clone();
        let id = push(&mut conn, &config.source_queue, "unfinished").await;
        let tx = previous.receive().await.unwrap();
        assert_eq!(tx.delivery().id, id);
        // The process dies: no commit, no release
        previous.stop_heartbeat();
        drop(tx);
        let _: () = redis::cmd("DEL")
            .arg(&previous.lease_key)
            .query_async(&mut conn)
            .await
            .unwrap();

        let queue = connect(&config).await;
        assert_ne!(queue.owner, previous.owner);
        queue.acquire_exclusive().await.unwrap();

        let tx = queue.receive().await.unwrap();
        assert_eq!(tx.delivery().id, id);
        assert!(tx.delivery().redelivered);
        queue.commit(tx).await.unwrap();
        assert_eq!(pending_count(&mut conn, &config).await, 0);

        queue.release_exclusive().await.unwrap();
        cleanup(&mut conn, &config).await;
    }
}

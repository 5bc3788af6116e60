//! Consumer-group streams on top of SQLite.
//!
//! Entries get ids of the form `<millis>-<seq>` where `seq` increases by one
//! per stream. Each group keeps a cursor (the highest delivered `seq`) and a
//! pending list of delivered but unacknowledged entries. Every delivery runs
//! in an immediate transaction, so two workers sharing a database file never
//! receive the same new entry.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use tokio::time::Instant;
use tracing::debug;

use dago_core::error::{DagoError, Result};
use dago_core::traits::StreamBroker;
use dago_core::types::StreamEntry;

use crate::sqlite::{db_err, duration_ms, now_ms, SqliteStore};

/// How often a blocked `read_group` re-checks the stream.
const POLL_STEP: Duration = Duration::from_millis(50);

/// An entry delivered to a consumer and not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: String,
    pub consumer: String,
    pub delivery_count: u32,
}

fn decode_entry(id: String, fields: &str) -> Result<StreamEntry> {
    let fields: HashMap<String, String> =
        serde_json::from_str(fields).map_err(|e| DagoError::Deserialization {
            what: format!("stream entry {}", id),
            message: e.to_string(),
        })?;
    Ok(StreamEntry { id, fields })
}

impl SqliteStore {
    fn append(&self, stream: &str, fields: &[(String, String)]) -> Result<String> {
        let map: HashMap<&str, &str> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let encoded = serde_json::to_string(&map).map_err(|e| DagoError::Serialization {
            what: "stream entry".to_string(),
            message: e.to_string(),
        })?;

        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;
        let seq: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM stream_entries WHERE stream = ?1",
                params![stream],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        let id = format!("{}-{}", now_ms(), seq);
        tx.execute(
            "INSERT INTO stream_entries (stream, seq, id, fields) VALUES (?1, ?2, ?3, ?4)",
            params![stream, seq, id, encoded],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(id)
    }

    fn create_group(&self, stream: &str, group: &str) -> Result<()> {
        let conn = self.conn()?;
        let created = conn
            .execute(
                "INSERT OR IGNORE INTO stream_groups (stream, grp, last_delivered)
                 VALUES (?1, ?2, 0)",
                params![stream, group],
            )
            .map_err(db_err)?;
        if created > 0 {
            debug!(stream, group, "Consumer group created");
        }
        Ok(())
    }

    /// Hand the next never-delivered entry to `consumer`, if there is one.
    fn deliver_next(&self, stream: &str, group: &str, consumer: &str) -> Result<Option<StreamEntry>> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let cursor: i64 = tx
            .query_row(
                "SELECT last_delivered FROM stream_groups WHERE stream = ?1 AND grp = ?2",
                params![stream, group],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| {
                DagoError::Store(format!(
                    "NOGROUP no consumer group '{}' for stream '{}'",
                    group, stream
                ))
            })?;

        let next: Option<(i64, String, String)> = tx
            .query_row(
                "SELECT seq, id, fields FROM stream_entries
                 WHERE stream = ?1 AND seq > ?2 ORDER BY seq LIMIT 1",
                params![stream, cursor],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(db_err)?;
        let Some((seq, id, fields)) = next else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE stream_groups SET last_delivered = ?3 WHERE stream = ?1 AND grp = ?2",
            params![stream, group, seq],
        )
        .map_err(db_err)?;
        tx.execute(
            "INSERT OR REPLACE INTO stream_pending
                 (stream, grp, seq, consumer, delivered_at, delivery_count)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)",
            params![stream, group, seq, consumer, now_ms()],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        decode_entry(id, &fields).map(Some)
    }

    fn claim_oldest(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Option<StreamEntry>> {
        let now = now_ms();
        let idle_since = now.saturating_sub(duration_ms(min_idle));
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_err)?;

        let oldest: Option<(i64, String, String, String)> = tx
            .query_row(
                "SELECT p.seq, e.id, e.fields, p.consumer
                 FROM stream_pending p
                 JOIN stream_entries e ON e.stream = p.stream AND e.seq = p.seq
                 WHERE p.stream = ?1 AND p.grp = ?2 AND p.delivered_at <= ?3
                 ORDER BY p.seq LIMIT 1",
                params![stream, group, idle_since],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(db_err)?;
        let Some((seq, id, fields, previous)) = oldest else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE stream_pending
             SET consumer = ?4, delivered_at = ?5, delivery_count = delivery_count + 1
             WHERE stream = ?1 AND grp = ?2 AND seq = ?3",
            params![stream, group, seq, consumer, now],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;

        debug!(stream, group, id = %id, from = %previous, to = consumer, "Claimed idle entry");
        decode_entry(id, &fields).map(Some)
    }

    fn acknowledge(&self, stream: &str, group: &str, id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM stream_pending
             WHERE stream = ?1 AND grp = ?2
               AND seq = (SELECT seq FROM stream_entries WHERE stream = ?1 AND id = ?3)",
            params![stream, group, id],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Every entry of a stream, oldest first.
    pub fn range(&self, stream: &str) -> Result<Vec<StreamEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, fields FROM stream_entries WHERE stream = ?1 ORDER BY seq")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![stream], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(db_err)?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, fields) = row.map_err(db_err)?;
            entries.push(decode_entry(id, &fields)?);
        }
        Ok(entries)
    }

    pub fn stream_len(&self, stream: &str) -> Result<usize> {
        let conn = self.conn()?;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM stream_entries WHERE stream = ?1",
                params![stream],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(n as usize)
    }

    /// The group's delivered-but-unacknowledged entries, oldest first.
    pub fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT e.id, p.consumer, p.delivery_count
                 FROM stream_pending p
                 JOIN stream_entries e ON e.stream = p.stream AND e.seq = p.seq
                 WHERE p.stream = ?1 AND p.grp = ?2
                 ORDER BY p.seq",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![stream, group], |row| {
                Ok(PendingEntry {
                    id: row.get(0)?,
                    consumer: row.get(1)?,
                    delivery_count: row.get(2)?,
                })
            })
            .map_err(db_err)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)
    }
}

impl StreamBroker for SqliteStore {
    fn ensure_group(&self, stream: &str, group: &str) -> BoxFuture<'_, Result<()>> {
        let (stream, group) = (stream.to_string(), group.to_string());
        Box::pin(async move { self.create_group(&stream, &group) })
    }

    fn add(&self, stream: &str, fields: Vec<(String, String)>) -> BoxFuture<'_, Result<String>> {
        let stream = stream.to_string();
        Box::pin(async move { self.append(&stream, &fields) })
    }

    fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> BoxFuture<'_, Result<Option<StreamEntry>>> {
        let (stream, group, consumer) = (stream.to_string(), group.to_string(), consumer.to_string());
        Box::pin(async move {
            let deadline = Instant::now() + block;
            loop {
                if let Some(entry) = self.deliver_next(&stream, &group, &consumer)? {
                    return Ok(Some(entry));
                }
                let now = Instant::now();
                if now >= deadline {
                    return Ok(None);
                }
                tokio::time::sleep((deadline - now).min(POLL_STEP)).await;
            }
        })
    }

    fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> BoxFuture<'_, Result<Option<StreamEntry>>> {
        let (stream, group, consumer) = (stream.to_string(), group.to_string(), consumer.to_string());
        Box::pin(async move { self.claim_oldest(&stream, &group, &consumer, min_idle) })
    }

    fn ack(&self, stream: &str, group: &str, id: &str) -> BoxFuture<'_, Result<()>> {
        let (stream, group, id) = (stream.to_string(), group.to_string(), id.to_string());
        Box::pin(async move { self.acknowledge(&stream, &group, &id) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const STREAM: &str = "executor.work";
    const GROUP: &str = "executor-workers";
    const NO_WAIT: Duration = Duration::from_millis(0);

    fn data(payload: &str) -> Vec<(String, String)> {
        vec![("data".to_string(), payload.to_string())]
    }

    async fn store_with_group() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.ensure_group(STREAM, GROUP).await.unwrap();
        store
    }

    #[tokio::test]
    async fn ensure_group_is_idempotent() {
        let store = store_with_group().await;
        store.add(STREAM, data("one")).await.unwrap();
        store.read_group(STREAM, GROUP, "w1", NO_WAIT).await.unwrap();

        store.ensure_group(STREAM, GROUP).await.unwrap();
        let again = store.read_group(STREAM, GROUP, "w1", NO_WAIT).await.unwrap();
        assert!(again.is_none(), "recreating the group must not rewind it");
    }

    #[tokio::test]
    async fn entries_are_delivered_once_and_in_order() {
        let store = store_with_group().await;
        let first = store.add(STREAM, data("one")).await.unwrap();
        let second = store.add(STREAM, data("two")).await.unwrap();
        assert_ne!(first, second);

        let a = store.read_group(STREAM, GROUP, "w1", NO_WAIT).await.unwrap().unwrap();
        let b = store.read_group(STREAM, GROUP, "w2", NO_WAIT).await.unwrap().unwrap();
        assert_eq!(a.id, first);
        assert_eq!(a.field("data"), Some("one"));
        assert_eq!(b.field("data"), Some("two"));
        assert!(store.read_group(STREAM, GROUP, "w1", NO_WAIT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn each_group_sees_every_entry() {
        let store = store_with_group().await;
        store.ensure_group(STREAM, "auditors").await.unwrap();
        store.add(STREAM, data("one")).await.unwrap();

        assert!(store.read_group(STREAM, GROUP, "w1", NO_WAIT).await.unwrap().is_some());
        assert!(store.read_group(STREAM, "auditors", "a1", NO_WAIT).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reading_without_a_group_fails() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store
            .read_group(STREAM, GROUP, "w1", NO_WAIT)
            .await
            .unwrap_err();
        assert!(matches!(err, DagoError::Store(ref m) if m.contains("NOGROUP")));
    }

    #[tokio::test]
    async fn empty_read_returns_after_the_block_window() {
        let store = store_with_group().await;
        let started = std::time::Instant::now();
        let got = store
            .read_group(STREAM, GROUP, "w1", Duration::from_millis(120))
            .await
            .unwrap();
        assert!(got.is_none());
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn blocked_read_wakes_on_new_entry() {
        let store = Arc::new(store_with_group().await);
        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            writer.add(STREAM, data("late")).await.unwrap();
        });

        let got = store
            .read_group(STREAM, GROUP, "w1", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.field("data"), Some("late"));
    }

    #[tokio::test]
    async fn ack_clears_the_pending_entry() {
        let store = store_with_group().await;
        store.add(STREAM, data("one")).await.unwrap();
        let entry = store.read_group(STREAM, GROUP, "w1", NO_WAIT).await.unwrap().unwrap();

        let pending = store.pending(STREAM, GROUP).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].consumer, "w1");

        store.ack(STREAM, GROUP, &entry.id).await.unwrap();
        assert!(store.pending(STREAM, GROUP).unwrap().is_empty());
        // the entry itself stays in the stream
        assert_eq!(store.stream_len(STREAM).unwrap(), 1);
    }

    #[tokio::test]
    async fn unacked_entry_is_claimable_after_min_idle() {
        let store = store_with_group().await;
        store.add(STREAM, data("orphan")).await.unwrap();
        let entry = store.read_group(STREAM, GROUP, "crashed", NO_WAIT).await.unwrap().unwrap();

        let min_idle = Duration::from_millis(80);
        let early = store.claim_idle(STREAM, GROUP, "w2", min_idle).await.unwrap();
        assert!(early.is_none());

        tokio::time::sleep(Duration::from_millis(120)).await;
        let claimed = store
            .claim_idle(STREAM, GROUP, "w2", min_idle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, entry.id);
        assert_eq!(claimed.field("data"), Some("orphan"));

        let pending = store.pending(STREAM, GROUP).unwrap();
        assert_eq!(
            pending,
            vec![PendingEntry {
                id: entry.id.clone(),
                consumer: "w2".into(),
                delivery_count: 2,
            }]
        );
    }

    #[tokio::test]
    async fn range_lists_event_streams() {
        let store = SqliteStore::in_memory().unwrap();
        store.add("events:node.completed", data("{}")).await.unwrap();
        store.add("events:node.completed", data("[]")).await.unwrap();
        let entries = store.range("events:node.completed").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].field("data"), Some("[]"));
        assert!(store.range("events:node.failed").unwrap().is_empty());
    }
}

//! Graph state as a header key plus one row per node.

use std::collections::HashMap;

use futures::future::BoxFuture;
use rusqlite::{params, OptionalExtension, Transaction};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use dago_core::error::{DagoError, Result};
use dago_core::traits::StateStore;
use dago_core::types::{GraphState, NodeState};

use crate::sqlite::{db_err, now_ms, SqliteStore};

fn header_key(graph_id: &str) -> String {
    format!("state:{}", graph_id)
}

#[derive(Deserialize)]
struct StateHeader {
    graph_id: String,
    #[serde(default)]
    inputs: Map<String, Value>,
}

fn serialize<T: serde::Serialize>(what: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| DagoError::Serialization {
        what: what.to_string(),
        message: e.to_string(),
    })
}

/// Remove the graph's expired rows so they can neither be read nor revived.
fn purge_graph(tx: &Transaction<'_>, graph_id: &str, now: i64) -> Result<()> {
    tx.execute(
        "DELETE FROM kv WHERE key = ?1 AND expires_at <= ?2",
        params![header_key(graph_id), now],
    )
    .map_err(db_err)?;
    tx.execute(
        "DELETE FROM node_states WHERE graph_id = ?1 AND expires_at <= ?2",
        params![graph_id, now],
    )
    .map_err(db_err)?;
    Ok(())
}

fn header_exists(tx: &Transaction<'_>, graph_id: &str) -> Result<bool> {
    let found = tx
        .query_row(
            "SELECT 1 FROM kv WHERE key = ?1",
            params![header_key(graph_id)],
            |_| Ok(()),
        )
        .optional()
        .map_err(db_err)?;
    Ok(found.is_some())
}

fn upsert_header(tx: &Transaction<'_>, graph_id: &str, value: &str, expires_at: i64) -> Result<()> {
    tx.execute(
        "INSERT INTO kv (key, value, expires_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
        params![header_key(graph_id), value, expires_at],
    )
    .map_err(db_err)?;
    Ok(())
}

fn upsert_node(
    tx: &Transaction<'_>,
    graph_id: &str,
    node_id: &str,
    value: &str,
    expires_at: i64,
) -> Result<()> {
    tx.execute(
        "INSERT INTO node_states (graph_id, node_id, value, expires_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(graph_id, node_id) DO UPDATE
           SET value = excluded.value, expires_at = excluded.expires_at",
        params![graph_id, node_id, value, expires_at],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Push the expiry of the header and every node row out to `expires_at`,
/// so the graph ages as one record.
fn touch_graph(tx: &Transaction<'_>, graph_id: &str, expires_at: i64) -> Result<()> {
    tx.execute(
        "UPDATE kv SET expires_at = ?1 WHERE key = ?2",
        params![expires_at, header_key(graph_id)],
    )
    .map_err(db_err)?;
    tx.execute(
        "UPDATE node_states SET expires_at = ?1 WHERE graph_id = ?2",
        params![expires_at, graph_id],
    )
    .map_err(db_err)?;
    Ok(())
}

impl SqliteStore {
    fn load_state(&self, graph_id: &str) -> Result<GraphState> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        purge_graph(&tx, graph_id, now_ms())?;

        let raw: Option<String> = tx
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![header_key(graph_id)],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;
        let raw = raw.ok_or_else(|| DagoError::StateNotFound(graph_id.to_string()))?;
        let header: StateHeader =
            serde_json::from_str(&raw).map_err(|e| DagoError::Deserialization {
                what: "graph state".to_string(),
                message: e.to_string(),
            })?;

        let mut node_states = HashMap::new();
        {
            let mut stmt = tx
                .prepare("SELECT node_id, value FROM node_states WHERE graph_id = ?1")
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![graph_id], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(db_err)?;

            for row in rows {
                let (node_id, value) = row.map_err(db_err)?;
                let node: NodeState =
                    serde_json::from_str(&value).map_err(|e| DagoError::Deserialization {
                        what: format!("node state {}", node_id),
                        message: e.to_string(),
                    })?;
                node_states.insert(node_id, node);
            }
        }
        tx.commit().map_err(db_err)?;

        Ok(GraphState {
            graph_id: header.graph_id,
            inputs: header.inputs,
            node_states,
        })
    }

    /// Replace the whole graph: node rows absent from `state` are removed.
    fn save_state(&self, state: &GraphState) -> Result<()> {
        let graph_id = state.graph_id.as_str();
        let header = serialize(
            "graph state",
            &serde_json::json!({ "graph_id": graph_id, "inputs": state.inputs }),
        )?;
        let nodes = state
            .node_states
            .iter()
            .map(|(id, node)| Ok((id.as_str(), serialize("node state", node)?)))
            .collect::<Result<Vec<_>>>()?;

        let now = now_ms();
        let expires_at = now.saturating_add(self.ttl_ms());
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        purge_graph(&tx, graph_id, now)?;
        upsert_header(&tx, graph_id, &header, expires_at)?;
        tx.execute("DELETE FROM node_states WHERE graph_id = ?1", params![graph_id])
            .map_err(db_err)?;
        for (node_id, value) in &nodes {
            upsert_node(&tx, graph_id, node_id, value, expires_at)?;
        }
        tx.commit().map_err(db_err)?;

        debug!(graph_id, nodes = nodes.len(), "Graph state saved");
        Ok(())
    }

    fn save_node_state(&self, graph_id: &str, node: &NodeState) -> Result<()> {
        let value = serialize("node state", node)?;

        let now = now_ms();
        let expires_at = now.saturating_add(self.ttl_ms());
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        purge_graph(&tx, graph_id, now)?;

        if !header_exists(&tx, graph_id)? {
            return Err(DagoError::StateNotFound(graph_id.to_string()));
        }

        upsert_node(&tx, graph_id, &node.node_id, &value, expires_at)?;
        touch_graph(&tx, graph_id, expires_at)?;
        tx.commit().map_err(db_err)?;

        debug!(graph_id, node_id = %node.node_id, status = ?node.status, "Node state saved");
        Ok(())
    }
}

impl StateStore for SqliteStore {
    fn load(&self, graph_id: &str) -> BoxFuture<'_, Result<GraphState>> {
        let graph_id = graph_id.to_string();
        Box::pin(async move { self.load_state(&graph_id) })
    }

    fn save(&self, state: &GraphState) -> BoxFuture<'_, Result<()>> {
        let state = state.clone();
        Box::pin(async move { self.save_state(&state) })
    }

    fn save_node(&self, graph_id: &str, node: &NodeState) -> BoxFuture<'_, Result<()>> {
        let graph_id = graph_id.to_string();
        let node = node.clone();
        Box::pin(async move { self.save_node_state(&graph_id, &node) })
    }

    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.check() })
    }
}

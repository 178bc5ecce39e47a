//! Turn audit log
//!
//! Every delivered turn leaves a record: what was classified, where it was
//! routed, and a SHA-256 fingerprint of the content the user received.

use crate::models::{IntentCategory, RouteType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use tokio::sync::RwLock;
use uuid::Uuid;

const DEFAULT_RETENTION: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub audit_id: Uuid,
    pub session_id: String,
    pub sequence: u64,
    pub intent: IntentCategory,
    pub route: RouteType,
    pub confidence: f32,
    pub routing_trace: Vec<String>,
    pub response_hash: String,
    pub elapsed_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Default)]
struct AuditStore {
    records: HashMap<Uuid, TurnRecord>,
    order: VecDeque<Uuid>,
}

/// Audit trail storage, bounded to the most recent records
pub struct TurnAuditLog {
    inner: RwLock<AuditStore>,
    retention: usize,
}

impl TurnAuditLog {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            inner: RwLock::new(AuditStore::default()),
            retention: retention.max(1),
        }
    }

    /// Store a record, evicting the oldest beyond retention
    pub async fn record(&self, record: TurnRecord) -> Uuid {
        let audit_id = record.audit_id;
        let mut store = self.inner.write().await;
        while store.order.len() >= self.retention {
            if let Some(oldest) = store.order.pop_front() {
                store.records.remove(&oldest);
            }
        }
        store.order.push_back(audit_id);
        store.records.insert(audit_id, record);
        audit_id
    }

    pub async fn get(&self, audit_id: Uuid) -> Option<TurnRecord> {
        self.inner.read().await.records.get(&audit_id).cloned()
    }

    /// Records for a session, oldest first
    pub async fn list_for_session(&self, session_id: &str) -> Vec<TurnRecord> {
        let store = self.inner.read().await;
        store
            .order
            .iter()
            .filter_map(|id| store.records.get(id))
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    /// Check delivered content against the stored fingerprint
    pub async fn verify_integrity(&self, audit_id: Uuid, content: &str) -> bool {
        match self.get(audit_id).await {
            Some(record) => {
                compute_response_hash(&record.session_id, record.sequence, content) == record.response_hash
            }
            None => false,
        }
    }
}

impl Default for TurnAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct Fingerprinted<'a> {
    session_id: &'a str,
    sequence: u64,
    content: &'a str,
}

/// SHA-256 over the session, turn sequence and content, streamed into the hasher
pub fn compute_response_hash(session_id: &str, sequence: u64, content: &str) -> String {
    let mut hasher = Sha256::new();
    let payload = Fingerprinted {
        session_id,
        sequence,
        content,
    };
    if serde_json::to_writer(&mut HashWriter(&mut hasher), &payload).is_err() {
        return String::new();
    }
    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session_id: &str, sequence: u64, content: &str) -> TurnRecord {
        TurnRecord {
            audit_id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            sequence,
            intent: IntentCategory::Knowledge,
            route: RouteType::Knowledge,
            confidence: 0.8,
            routing_trace: vec!["route=knowledge".to_string()],
            response_hash: compute_response_hash(session_id, sequence, content),
            elapsed_ms: 12,
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_integrity_check() {
        let log = TurnAuditLog::new();
        let id = log.record(record("s1", 1, "An IUL is permanent life insurance.")).await;

        assert!(log.verify_integrity(id, "An IUL is permanent life insurance.").await);
        assert!(!log.verify_integrity(id, "tampered").await);
        assert!(!log.verify_integrity(Uuid::new_v4(), "anything").await);
    }

    #[tokio::test]
    async fn test_retention_and_session_listing() {
        let log = TurnAuditLog::with_retention(2);
        log.record(record("s1", 1, "a")).await;
        log.record(record("s2", 1, "b")).await;
        log.record(record("s1", 2, "c")).await;

        assert_eq!(log.len().await, 2);
        let s1: Vec<u64> = log.list_for_session("s1").await.iter().map(|r| r.sequence).collect();
        assert_eq!(s1, vec![2]);
    }

    #[test]
    fn test_hash_depends_on_position() {
        assert_ne!(compute_response_hash("s1", 1, "x"), compute_response_hash("s1", 2, "x"));
        assert_eq!(compute_response_hash("s1", 1, "x").len(), 64);
    }
}

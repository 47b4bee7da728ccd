//! Audit logging for compliance and forensics.
//!
//! Records are append-only. The executor talks to an [`AuditSink`], which
//! never fails to its caller; concrete [`AuditLogStore`]s may fail and are
//! wrapped by [`ResilientAuditSink`] to divert records to a fallback channel.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use bastion_core::{
    traits::{AuditLogStore, AuditSink},
    types::{AuditFilter, AuditRecord},
    Error, Result,
};

// =============================================================================
// In-Memory Store
// =============================================================================

/// In-memory audit store for tests and embedded use.
#[derive(Default)]
pub struct InMemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records matching `filter`, oldest first.
    pub async fn query(&self, filter: &AuditFilter) -> Vec<AuditRecord> {
        let records = self.records.read().await;
        let matching = records.iter().filter(|r| filter.matches(r)).cloned();
        match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    pub async fn all(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl AuditLogStore for InMemoryAuditStore {
    async fn append(&self, record: AuditRecord) -> Result<()> {
        self.records.write().await.push(record);
        Ok(())
    }
}

// =============================================================================
// Hash-Chained JSONL Store
// =============================================================================

/// Hash preceding the first record of a chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Hash of `record` chained onto `previous_hash`.
///
/// Covers every field except `hash` itself.
pub fn chain_hash(previous_hash: &str, record: &AuditRecord) -> Result<String> {
    let mut unsealed = record.clone();
    unsealed.previous_hash = Some(previous_hash.to_string());
    unsealed.hash = None;

    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(serde_json::to_string(&unsealed)?.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Tamper-evident audit log, one JSON record per line.
pub struct JsonlAuditStore {
    path: PathBuf,
    last_hash: Mutex<String>,
}

impl JsonlAuditStore {
    /// Create or open a log, resuming the chain from its last record.
    ///
    /// A torn final line left by an interrupted append is cut off before the
    /// chain resumes.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut last_hash = GENESIS_HASH.to_string();

        let mut log = load_log(&path).await?;
        match log.tail {
            Tail::Clean => {}
            Tail::Unterminated => append_bytes(&path, b"\n").await?,
            Tail::Torn => {
                tracing::warn!(
                    path = %path.display(),
                    offset = log.complete_len,
                    "Truncating torn audit record"
                );
                let file = tokio::fs::OpenOptions::new().write(true).open(&path).await?;
                file.set_len(log.complete_len).await?;
                file.sync_all().await?;
            }
        }

        if let Some(last) = log.records.pop() {
            last_hash = last
                .hash
                .ok_or_else(|| Error::integrity(format!("last record in {} is unsealed", path.display())))?;
        }

        Ok(Self {
            path,
            last_hash: Mutex::new(last_hash),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every record in the log, oldest first.
    pub async fn records(&self) -> Result<Vec<AuditRecord>> {
        read_records(&self.path).await
    }

    pub async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>> {
        let matching = self.records().await?.into_iter().filter(|r| filter.matches(r));
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    /// Recompute the chain. Returns the number of verified records.
    pub async fn verify_chain(&self) -> Result<usize> {
        let records = self.records().await?;
        let mut previous = GENESIS_HASH.to_string();

        for (index, record) in records.iter().enumerate() {
            if record.previous_hash.as_deref() != Some(previous.as_str()) {
                return Err(Error::integrity(format!("record {} breaks the chain link", index)));
            }
            let expected = chain_hash(&previous, record)?;
            match &record.hash {
                Some(hash) if *hash == expected => previous = expected,
                _ => return Err(Error::integrity(format!("record {} hash mismatch", index))),
            }
        }
        Ok(records.len())
    }
}

/// State of the bytes after the last newline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Clean,
    /// A whole record missing its newline.
    Unterminated,
    /// A partial record.
    Torn,
}

struct LoadedLog {
    records: Vec<AuditRecord>,
    complete_len: u64,
    tail: Tail,
}

fn parse_log(content: &str) -> Result<LoadedLog> {
    let (complete, rest) = match content.rfind('\n') {
        Some(at) => content.split_at(at + 1),
        None => ("", content),
    };

    let mut records = complete
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(Error::from))
        .collect::<Result<Vec<AuditRecord>>>()?;

    let tail = if rest.trim().is_empty() {
        Tail::Clean
    } else {
        match serde_json::from_str(rest) {
            Ok(record) => {
                records.push(record);
                Tail::Unterminated
            }
            Err(_) => Tail::Torn,
        }
    };

    Ok(LoadedLog {
        records,
        complete_len: complete.len() as u64,
        tail,
    })
}

async fn load_log(path: &Path) -> Result<LoadedLog> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => parse_log(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LoadedLog {
            records: Vec::new(),
            complete_len: 0,
            tail: Tail::Clean,
        }),
        Err(e) => Err(e.into()),
    }
}

async fn read_records(path: &Path) -> Result<Vec<AuditRecord>> {
    let log = load_log(path).await?;
    if log.tail == Tail::Torn {
        tracing::warn!(path = %path.display(), "Skipping torn final audit record");
    }
    Ok(log.records)
}

async fn append_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}

#[async_trait]
impl AuditLogStore for JsonlAuditStore {
    async fn append(&self, mut record: AuditRecord) -> Result<()> {
        let mut last_hash = self.last_hash.lock().await;

        let hash = chain_hash(&last_hash, &record)?;
        record.previous_hash = Some(last_hash.clone());
        record.hash = Some(hash.clone());

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let before = file.metadata().await?.len();
        let written = match file.write_all(line.as_bytes()).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            // Leave no partial line behind for the next append to extend.
            if let Err(truncate) = file.set_len(before).await {
                tracing::error!(
                    path = %self.path.display(),
                    error = %truncate,
                    "Failed to truncate partial audit record"
                );
            }
            return Err(e.into());
        }

        *last_hash = hash;
        Ok(())
    }
}

// =============================================================================
// Resilient Sink
// =============================================================================

/// Where records go when the primary store fails.
#[derive(Debug, Clone)]
pub enum FallbackChannel {
    /// Append JSON lines to a local file; falls through to `Log` on error.
    File(PathBuf),
    /// Emit the record through `tracing` at error level.
    Log,
}

impl FallbackChannel {
    async fn write(&self, record: &AuditRecord, cause: &Error) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => format!("{{\"id\":\"{}\",\"unserializable\":\"{}\"}}", record.id, e),
        };

        if let Self::File(path) = self {
            match append_line(path, &line).await {
                Ok(()) => return,
                Err(e) => tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "Audit fallback file unavailable"
                ),
            }
        }

        tracing::error!(
            target: "bastion::audit_fallback",
            cause = %cause,
            record = %line,
            "Audit record diverted to log"
        );
    }
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    append_bytes(path, format!("{}\n", line).as_bytes()).await
}

/// [`AuditSink`] that never fails: primary store first, fallback on error.
pub struct ResilientAuditSink {
    primary: Arc<dyn AuditLogStore>,
    fallback: FallbackChannel,
    fallback_writes: AtomicUsize,
}

impl ResilientAuditSink {
    pub fn new(primary: Arc<dyn AuditLogStore>) -> Self {
        Self {
            primary,
            fallback: FallbackChannel::Log,
            fallback_writes: AtomicUsize::new(0),
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackChannel) -> Self {
        self.fallback = fallback;
        self
    }

    /// Number of records diverted to the fallback channel so far.
    pub fn fallback_writes(&self) -> usize {
        self.fallback_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditSink for ResilientAuditSink {
    async fn record(&self, record: AuditRecord) {
        let Err(e) = self.primary.append(record.clone()).await else {
            return;
        };

        tracing::warn!(
            record_id = %record.id,
            operation_id = %record.operation_id,
            error = %e,
            "Audit store write failed, using fallback"
        );
        metrics::counter!("bastion_audit_fallback_total").increment(1);
        self.fallback_writes.fetch_add(1, Ordering::SeqCst);
        self.fallback.write(&record, &e).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_core::mocks::FailingAuditStore;
    use bastion_core::types::AuditStatus;

    fn record(op: &str, status: AuditStatus) -> AuditRecord {
        AuditRecord::new(op, "content.create", status).with_principal("alice")
    }

    #[tokio::test]
    async fn test_in_memory_query() {
        let store = InMemoryAuditStore::new();
        store.append(record("op-1", AuditStatus::Success)).await.unwrap();
        store.append(record("op-2", AuditStatus::Failure)).await.unwrap();
        store.append(record("op-3", AuditStatus::Success)).await.unwrap();

        let successes = store
            .query(&AuditFilter { status: Some(AuditStatus::Success), ..Default::default() })
            .await;
        assert_eq!(successes.len(), 2);

        let limited = store.query(&AuditFilter { limit: Some(1), ..Default::default() }).await;
        assert_eq!(limited[0].operation_id, "op-1");
    }

    #[tokio::test]
    async fn test_jsonl_chain_resumes_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let store = JsonlAuditStore::open(&path).await.unwrap();
        store.append(record("op-1", AuditStatus::Success)).await.unwrap();
        store.append(record("op-2", AuditStatus::Failure)).await.unwrap();
        drop(store);

        let reopened = JsonlAuditStore::open(&path).await.unwrap();
        reopened.append(record("op-3", AuditStatus::Success)).await.unwrap();

        assert_eq!(reopened.verify_chain().await.unwrap(), 3);
        let records = reopened.records().await.unwrap();
        assert_eq!(records[0].previous_hash.as_deref(), Some(GENESIS_HASH));
        assert_eq!(records[2].previous_hash, records[1].hash);
    }

    #[tokio::test]
    async fn test_jsonl_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let store = JsonlAuditStore::open(&path).await.unwrap();
        store.append(record("op-1", AuditStatus::Failure)).await.unwrap();
        store.append(record("op-2", AuditStatus::Success)).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        tokio::fs::write(&path, content.replacen("\"failure\"", "\"success\"", 1))
            .await
            .unwrap();

        let err = store.verify_chain().await.unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }

    #[tokio::test]
    async fn test_jsonl_recovers_from_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let store = JsonlAuditStore::open(&path).await.unwrap();
        store.append(record("op-1", AuditStatus::Success)).await.unwrap();
        store.append(record("op-2", AuditStatus::Success)).await.unwrap();
        drop(store);
        append_bytes(&path, br#"{"id":"torn","operation_id":"op-"#).await.unwrap();

        let reopened = JsonlAuditStore::open(&path).await.unwrap();
        assert_eq!(reopened.records().await.unwrap().len(), 2);
        reopened.append(record("op-3", AuditStatus::Failure)).await.unwrap();

        assert_eq!(reopened.verify_chain().await.unwrap(), 3);
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!content.contains("torn"));
    }

    #[tokio::test]
    async fn test_jsonl_reads_skip_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let store = JsonlAuditStore::open(&path).await.unwrap();
        store.append(record("op-1", AuditStatus::Success)).await.unwrap();
        append_bytes(&path, b"{\"id\":").await.unwrap();

        assert_eq!(store.records().await.unwrap().len(), 1);
        assert_eq!(store.verify_chain().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_jsonl_terminates_whole_final_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let store = JsonlAuditStore::open(&path).await.unwrap();
        store.append(record("op-1", AuditStatus::Success)).await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        tokio::fs::write(&path, content.trim_end()).await.unwrap();

        let reopened = JsonlAuditStore::open(&path).await.unwrap();
        reopened.append(record("op-2", AuditStatus::Success)).await.unwrap();
        assert_eq!(reopened.verify_chain().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_resilient_sink_falls_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = dir.path().join("fallback.jsonl");
        let primary = Arc::new(FailingAuditStore::new());

        let sink = ResilientAuditSink::new(primary.clone()).with_fallback(FallbackChannel::File(fallback.clone()));
        sink.record(record("op-1", AuditStatus::Failure)).await;

        assert_eq!(primary.attempts(), 1);
        assert_eq!(sink.fallback_writes(), 1);

        let content = tokio::fs::read_to_string(&fallback).await.unwrap();
        let saved: AuditRecord = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(saved.operation_id, "op-1");
    }

    #[tokio::test]
    async fn test_resilient_sink_passes_through() {
        let primary = Arc::new(InMemoryAuditStore::new());
        let sink = ResilientAuditSink::new(primary.clone());
        sink.record(record("op-1", AuditStatus::Success)).await;
        assert_eq!(primary.len().await, 1);
        assert_eq!(sink.fallback_writes(), 0);
    }
}

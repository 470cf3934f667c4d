// src/checkpoint.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_jsonlines::JsonLinesWriter;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{io_context, CheckpointError};
use crate::model::BatchOperation;

/// Durable record of terminal operation outcomes, keyed by batch id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Terminal operations recorded for `batch_id`, in write order. Empty for an unknown batch.
    async fn load(&self, batch_id: &str) -> Result<Vec<BatchOperation>, CheckpointError>;

    /// Records one terminal operation; returns only once the record is written.
    async fn append(&self, batch_id: &str, operation: &BatchOperation) -> Result<(), CheckpointError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointRecord {
    batch_id: String,
    operation: BatchOperation,
}

fn ensure_terminal(operation: &BatchOperation) -> Result<(), CheckpointError> {
    if operation.state.is_terminal() {
        Ok(())
    } else {
        Err(CheckpointError::NotTerminal {
            operation_id: operation.operation_id.clone(),
        })
    }
}

/// Keeps the first record per operation id; terminal states never change.
fn first_record_wins(operations: Vec<BatchOperation>) -> Vec<BatchOperation> {
    let mut seen = HashSet::new();
    operations
        .into_iter()
        .filter(|op| {
            let fresh = seen.insert(op.operation_id.clone());
            if !fresh {
                warn!(
                    "Ignoring repeated checkpoint record for operation {}",
                    op.operation_id
                );
            }
            fresh
        })
        .collect()
}

// --- JSON lines on disk ---

fn is_decode_error(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::InvalidData | ErrorKind::UnexpectedEof)
}

/// Cuts a partially written last line so the next append starts on a fresh line.
fn repair_torn_tail(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let bytes = fs::read(path)?;
    if bytes.is_empty() || bytes.ends_with(b"\n") {
        return Ok(());
    }
    let keep = bytes
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0);
    warn!(
        "Truncating torn checkpoint tail in {:?} ({} bytes)",
        path,
        bytes.len() - keep
    );
    let file = fs::OpenOptions::new().write(true).open(path)?;
    file.set_len(keep as u64)?;
    file.sync_all()
}

/// One append-only `{dir}/{batch_id}.jsonl` file per batch.
pub struct JsonlCheckpointStore {
    dir: PathBuf,
    // Single writer at a time
    write_lock: Mutex<()>,
}

impl JsonlCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            io_context(e, format!("Failed to create checkpoint directory: {:?}", dir))
        })?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, batch_id: &str) -> PathBuf {
        let safe: String = batch_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.jsonl", safe))
    }
}

#[async_trait]
impl CheckpointStore for JsonlCheckpointStore {
    async fn load(&self, batch_id: &str) -> Result<Vec<BatchOperation>, CheckpointError> {
        let path = self.path_for(batch_id);
        if !path.exists() {
            debug!("No checkpoint file for batch {} at {:?}", batch_id, path);
            return Ok(Vec::new());
        }

        let lines: Vec<std::io::Result<CheckpointRecord>> = serde_jsonlines::json_lines(&path)
            .map_err(|e| io_context(e, format!("Failed to open checkpoint file: {:?}", path)))?
            .collect();

        let total = lines.len();
        let mut operations = Vec::with_capacity(total);
        for (index, line) in lines.into_iter().enumerate() {
            match line {
                Ok(record) => {
                    if record.batch_id != batch_id {
                        return Err(CheckpointError::Corrupt {
                            batch_id: batch_id.to_string(),
                            detail: format!(
                                "line {} belongs to batch {}",
                                index + 1,
                                record.batch_id
                            ),
                        });
                    }
                    ensure_terminal(&record.operation)?;
                    operations.push(record.operation);
                }
                // A crash mid-append can leave a torn final line; that operation was never recorded
                Err(e) if is_decode_error(&e) && index + 1 == total => {
                    warn!(
                        "Ignoring torn last line in checkpoint {:?}: {}",
                        path, e
                    );
                }
                Err(e) if is_decode_error(&e) => {
                    return Err(CheckpointError::Corrupt {
                        batch_id: batch_id.to_string(),
                        detail: format!("line {}: {}", index + 1, e),
                    });
                }
                Err(e) => {
                    return Err(io_context(
                        e,
                        format!("Failed to read checkpoint file: {:?}", path),
                    ))
                }
            }
        }

        let operations = first_record_wins(operations);
        info!(
            "Loaded {} terminal operations from checkpoint for batch {}",
            operations.len(),
            batch_id
        );
        Ok(operations)
    }

    async fn append(&self, batch_id: &str, operation: &BatchOperation) -> Result<(), CheckpointError> {
        ensure_terminal(operation)?;
        let record = CheckpointRecord {
            batch_id: batch_id.to_string(),
            operation: operation.clone(),
        };
        let path = self.path_for(batch_id);

        let _guard = self.write_lock.lock().await;
        repair_torn_tail(&path).map_err(|e| {
            io_context(e, format!("Failed to repair checkpoint file: {:?}", path))
        })?;
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_context(e, format!("Failed to open checkpoint file: {:?}", path)))?;
        let mut writer = JsonLinesWriter::new(file);
        let written = writer.write(&record).and_then(|()| writer.flush());
        written.map_err(|e| {
            io_context(e, format!("Failed to append to checkpoint file: {:?}", path))
        })?;
        writer
            .into_inner()
            .sync_data()
            .map_err(|e| io_context(e, format!("Failed to sync checkpoint file: {:?}", path)))?;
        debug!(
            "Checkpointed operation {} for batch {}",
            operation.operation_id, batch_id
        );
        Ok(())
    }
}

// --- In memory ---

/// Non-durable store for tests and embedding.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    batches: Mutex<HashMap<String, Vec<BatchOperation>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records appended for `batch_id`, duplicates included.
    pub async fn record_count(&self, batch_id: &str) -> usize {
        self.batches
            .lock()
            .await
            .get(batch_id)
            .map(|ops| ops.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, batch_id: &str) -> Result<Vec<BatchOperation>, CheckpointError> {
        let batches = self.batches.lock().await;
        let ops = batches.get(batch_id).cloned().unwrap_or_default();
        Ok(first_record_wins(ops))
    }

    async fn append(&self, batch_id: &str, operation: &BatchOperation) -> Result<(), CheckpointError> {
        ensure_terminal(operation)?;
        self.batches
            .lock()
            .await
            .entry(batch_id.to_string())
            .or_default()
            .push(operation.clone());
        Ok(())
    }
}

//! Background checkpoint writer
//!
//! Checkpoint writes happen on their own task so the chunk loop never waits
//! on the disk. Commands queued since the last write are coalesced per
//! transfer: the latest save or clear wins, and a cancel discards whatever
//! is still queued for that transfer.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::store::{CheckpointStore, ResumeCheckpoint};

enum Command {
    Save(ResumeCheckpoint),
    Clear(String),
    Cancel(String),
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle to the writer task
#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    tx: Option<mpsc::UnboundedSender<Command>>,
}

impl CheckpointWriter {
    /// Spawn the writer task owning `store`
    ///
    /// The task ends when every handle is dropped and returns the store.
    pub fn spawn(store: CheckpointStore) -> (Self, JoinHandle<CheckpointStore>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(store, rx));
        (Self { tx: Some(tx) }, task)
    }

    /// A writer that drops everything (resume disabled)
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn save(&self, checkpoint: ResumeCheckpoint) {
        self.send(Command::Save(checkpoint));
    }

    pub fn clear(&self, transfer_id: &str) {
        self.send(Command::Clear(transfer_id.to_string()));
    }

    /// Discard queued writes for `transfer_id`
    pub fn cancel(&self, transfer_id: &str) {
        self.send(Command::Cancel(transfer_id.to_string()));
    }

    /// Wait until everything queued so far has been applied
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Flush(tx));
        let _ = rx.await;
    }

    fn send(&self, command: Command) {
        if let Some(tx) = &self.tx
            && tx.send(command).is_err()
        {
            tracing::warn!("checkpoint writer has stopped");
        }
    }
}

async fn run(
    mut store: CheckpointStore,
    mut rx: mpsc::UnboundedReceiver<Command>,
) -> CheckpointStore {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        // None means clear
        let mut pending: HashMap<String, Option<ResumeCheckpoint>> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut flushed = Vec::new();

        for command in batch {
            match command {
                Command::Save(checkpoint) => {
                    let id = checkpoint.transfer_id.clone();
                    if !order.contains(&id) {
                        order.push(id.clone());
                    }
                    pending.insert(id, Some(checkpoint));
                }
                Command::Clear(id) => {
                    if !order.contains(&id) {
                        order.push(id.clone());
                    }
                    pending.insert(id, None);
                }
                Command::Cancel(id) => {
                    pending.remove(&id);
                }
                Command::Flush(tx) => flushed.push(tx),
            }
        }

        for id in order {
            match pending.remove(&id) {
                Some(Some(checkpoint)) => {
                    let chunk_index = checkpoint.chunk_index;
                    if let Err(e) = store.save(checkpoint) {
                        tracing::warn!(transfer_id = %id, chunk_index, error = %e, "checkpoint write failed");
                    }
                }
                Some(None) => {
                    if let Err(e) = store.clear(&id) {
                        tracing::warn!(transfer_id = %id, error = %e, "checkpoint clear failed");
                    }
                }
                None => {}
            }
        }

        for tx in flushed {
            let _ = tx.send(());
        }
    }
    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ferry_common::protocol::Direction;
    use std::time::Duration;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn checkpoint(id: &str, chunk_index: u64) -> ResumeCheckpoint {
        ResumeCheckpoint {
            transfer_id: id.to_string(),
            room_id: "ABC123".to_string(),
            direction: Direction::Send,
            file_name: "a.bin".to_string(),
            file_size: 1000,
            chunk_index,
            total_chunks: 10,
            chunk_size: 100,
            source_path: None,
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_latest_save_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        let (writer, task) = CheckpointWriter::spawn(CheckpointStore::open(&path, DAY));

        writer.save(checkpoint("t", 2));
        writer.save(checkpoint("t", 4));
        writer.flush().await;
        assert_eq!(CheckpointStore::open(&path, DAY).load("t").unwrap().chunk_index, 4);

        writer.clear("t");
        writer.flush().await;
        assert!(CheckpointStore::open(&path, DAY).load("t").is_none());

        drop(writer);
        let store = task.await.unwrap();
        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_discards_queued_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        let (writer, _task) = CheckpointWriter::spawn(CheckpointStore::open(&path, DAY));

        writer.save(checkpoint("keep", 1));
        writer.save(checkpoint("drop", 3));
        writer.cancel("drop");
        writer.flush().await;

        let store = CheckpointStore::open(&path, DAY);
        assert!(store.load("keep").is_some());
        assert!(store.load("drop").is_none());
    }

    #[tokio::test]
    async fn test_write_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let path = blocker.join("p.json");

        let (writer, _task) = CheckpointWriter::spawn(CheckpointStore::open(&path, DAY));
        writer.save(checkpoint("t", 1));
        writer.flush().await;

        // Still serving after the failed write
        writer.save(checkpoint("t", 2));
        writer.flush().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_disabled_writer_is_a_no_op() {
        let writer = CheckpointWriter::disabled();
        writer.save(checkpoint("t", 1));
        writer.clear("t");
        writer.flush().await;
    }
}

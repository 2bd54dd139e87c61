use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use aircon_common::{MemoryStore, PlantRecord, RecordStore};
use anyhow::Context;
use tokio::{
    io::AsyncWriteExt,
    sync::{mpsc, oneshot, Mutex},
};
use tracing::{debug, warn};

pub type SharedStore = Arc<Mutex<MemoryStore>>;

enum RecorderMessage {
    Record(PlantRecord),
    Flush(oneshot::Sender<()>),
}

/// Handle to the single writer that owns the record journal. Sends never
/// block, so callers may submit while holding the scheduler lock.
#[derive(Clone)]
pub struct Recorder {
    tx: mpsc::UnboundedSender<RecorderMessage>,
    store: SharedStore,
}

impl Recorder {
    /// Replays `journal` into memory and starts the writer task.
    pub async fn start(journal: PathBuf) -> anyhow::Result<Self> {
        let store = load_journal(&journal).await?;
        let store = Arc::new(Mutex::new(store));
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(journal, store.clone(), rx));
        Ok(Self { tx, store })
    }

    pub fn submit_all(&self, records: Vec<PlantRecord>) {
        for record in records {
            if self.tx.send(RecorderMessage::Record(record)).is_err() {
                warn!("record writer stopped; dropping record");
                return;
            }
        }
    }

    /// Waits until everything submitted so far is visible in the store.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(RecorderMessage::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }
}

async fn run_writer(
    journal: PathBuf,
    store: SharedStore,
    mut rx: mpsc::UnboundedReceiver<RecorderMessage>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            RecorderMessage::Record(record) => {
                if let Err(err) = append_line(&journal, &record).await {
                    warn!("failed to journal record for room {}: {err:#}", record.room_id());
                }
                debug!("recorded {record:?}");
                store.lock().await.append(record);
            }
            RecorderMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn append_line(journal: &Path, record: &PlantRecord) -> anyhow::Result<()> {
    if let Some(parent) = journal.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(journal)
        .await
        .with_context(|| format!("failed to open {}", journal.display()))?;
    file.write_all(&line).await?;
    file.flush().await?;
    Ok(())
}

async fn load_journal(journal: &Path) -> anyhow::Result<MemoryStore> {
    let raw = match tokio::fs::read_to_string(journal).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(MemoryStore::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", journal.display()))
        }
    };

    let mut store = MemoryStore::new();
    for (index, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PlantRecord>(line) {
            Ok(record) => store.append(record),
            Err(err) => warn!("skipping malformed journal line {}: {err}", index + 1),
        }
    }
    Ok(store)
}

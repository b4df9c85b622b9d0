use super::{
    encode, BlobStore, ButtonsDocument, ShortcutsDocument, BUTTONS_KEY, SHORTCUTS_KEY,
};
use crate::controller::buttons::DetectedButton;
use crate::mapping::shortcut::ShortcutBinding;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

// Work items for the persistence worker
#[derive(Debug)]
pub enum PersistAction {
    SaveButtons(Vec<DetectedButton>),
    SaveShortcuts(Vec<ShortcutBinding>),
    /// Answers once every earlier action has been written.
    Flush { response_tx: oneshot::Sender<()> },
}

/// Sending half used by the engine. Writes never block the caller and are never dropped;
/// the worker only skips a document that a newer one for the same key already replaced.
#[derive(Clone, Debug)]
pub struct PersistenceClient {
    tx: UnboundedSender<PersistAction>,
}

impl PersistenceClient {
    pub fn save_buttons(&self, buttons: &[DetectedButton]) {
        self.submit(PersistAction::SaveButtons(buttons.to_vec()));
    }

    pub fn save_shortcuts(&self, shortcuts: &[ShortcutBinding]) {
        self.submit(PersistAction::SaveShortcuts(shortcuts.to_vec()));
    }

    pub async fn flush(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self.tx.send(PersistAction::Flush { response_tx }).is_ok() {
            let _ = response_rx.await;
        }
    }

    fn submit(&self, action: PersistAction) {
        if self.tx.send(action).is_err() {
            error!("Persistence worker is gone, changes will not be saved");
        }
    }
}

pub struct PersistenceWorker {
    client: PersistenceClient,
    worker_handle: JoinHandle<()>,
}

impl PersistenceWorker {
    /// Spawns the worker. It exits once every client has been dropped.
    pub fn spawn<S: BlobStore>(store: S) -> Self {
        let (tx, rx) = unbounded_channel::<PersistAction>();
        let worker_handle = tokio::spawn(run_worker(store, rx));
        Self {
            client: PersistenceClient { tx },
            worker_handle,
        }
    }

    pub fn client(&self) -> PersistenceClient {
        self.client.clone()
    }

    /// Drops the worker's own client and waits for pending writes to finish.
    pub async fn finish(self) {
        drop(self.client);
        if let Err(e) = self.worker_handle.await {
            error!("Persistence worker panicked: {}", e);
        }
    }
}

// Everything queued since the last write, newest document per key
#[derive(Default)]
struct Batch {
    buttons: Option<Vec<DetectedButton>>,
    shortcuts: Option<Vec<ShortcutBinding>>,
    flushes: Vec<oneshot::Sender<()>>,
    superseded: usize,
}

impl Batch {
    fn add(&mut self, action: PersistAction) {
        match action {
            PersistAction::SaveButtons(buttons) => {
                self.superseded += usize::from(self.buttons.replace(buttons).is_some());
            }
            PersistAction::SaveShortcuts(shortcuts) => {
                self.superseded += usize::from(self.shortcuts.replace(shortcuts).is_some());
            }
            PersistAction::Flush { response_tx } => self.flushes.push(response_tx),
        }
    }
}

async fn run_worker<S: BlobStore>(store: S, mut rx: UnboundedReceiver<PersistAction>) {
    info!("Persistence worker started");
    while let Some(action) = rx.recv().await {
        let mut batch = Batch::default();
        batch.add(action);
        while let Ok(action) = rx.try_recv() {
            batch.add(action);
        }
        if batch.superseded > 0 {
            debug!("Skipping {} superseded writes", batch.superseded);
        }

        if let Some(buttons) = batch.buttons {
            write(&store, BUTTONS_KEY, &ButtonsDocument { buttons }).await;
        }
        if let Some(shortcuts) = batch.shortcuts {
            write(&store, SHORTCUTS_KEY, &ShortcutsDocument { shortcuts }).await;
        }
        for response_tx in batch.flushes {
            if response_tx.send(()).is_err() {
                debug!("Flush requester went away");
            }
        }
    }
    info!("Persistence worker stopped");
}

async fn write<S: BlobStore, T: serde::Serialize>(store: &S, key: &str, document: &T) {
    let data = match encode(key, document) {
        Ok(data) => data,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };
    match store.save(key, data).await {
        Ok(()) => debug!("Saved {}", key),
        Err(e) => error!("Failed to save {}: {}", key, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::buttons::default_buttons;
    use crate::persistence::{load_buttons, load_shortcuts, MemoryBlobStore};

    #[tokio::test]
    async fn writes_land_in_order() {
        let store = MemoryBlobStore::new();
        let worker = PersistenceWorker::spawn(store.clone());
        let client = worker.client();

        client.save_shortcuts(&[ShortcutBinding::new("button_A", 1)]);
        client.save_shortcuts(&[ShortcutBinding::new("button_B", 2)]);
        client.save_buttons(&default_buttons());
        client.flush().await;

        let shortcuts = load_shortcuts(&store).await;
        assert_eq!(shortcuts, vec![ShortcutBinding::new("button_B", 2)]);
        assert_eq!(load_buttons(&store).await, default_buttons());

        drop(client);
        worker.finish().await;
    }

    #[tokio::test]
    async fn finish_drains_pending_writes() {
        let store = MemoryBlobStore::new();
        let worker = PersistenceWorker::spawn(store.clone());
        worker
            .client()
            .save_shortcuts(&[ShortcutBinding::new("button_Y", 7)]);
        worker.finish().await;

        assert_eq!(load_shortcuts(&store).await.len(), 1);
    }

    #[tokio::test]
    async fn burst_of_writes_keeps_the_latest() {
        let store = MemoryBlobStore::new();
        let worker = PersistenceWorker::spawn(store.clone());
        let client = worker.client();

        let all: Vec<ShortcutBinding> = (0..100u16)
            .map(|n| ShortcutBinding::new(format!("paddle_{n}"), n))
            .collect();
        // No await in between, so the worker cannot run until the flush
        for n in 1..=all.len() {
            client.save_shortcuts(&all[..n]);
        }
        client.flush().await;

        assert_eq!(load_shortcuts(&store).await, all);

        drop(client);
        worker.finish().await;
    }
}

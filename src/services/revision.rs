use std::sync::Arc;

use tokio::sync::watch;

/// Monotonic change counter. Bumped after every state mutation so a front
/// end can recompute its snapshot.
#[derive(Debug, Clone)]
pub struct Revision {
    tx: Arc<watch::Sender<u64>>,
}

impl Revision {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn bump(&self) {
        self.tx.send_modify(|rev| *rev += 1);
    }

    pub fn current(&self) -> u64 {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

impl Default for Revision {
    fn default() -> Self {
        Self::new()
    }
}

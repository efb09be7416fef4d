use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Returned by [`StageBuffer::put`] once the buffer is closed; hands the
/// rejected item back.
#[derive(Debug)]
pub struct Closed<T>(pub T);

/// Bounded FIFO channel between two pipeline stages.
///
/// Any number of producers and consumers may share one buffer. `put` waits
/// while the buffer is full, `take` waits while it is empty. After `close`,
/// `put` is rejected and `take` drains what is left before returning `None`.
pub struct StageBuffer<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
    // tokio's mutex queues waiters fairly, so consumers are served in turn.
    rx: Mutex<mpsc::Receiver<T>>,
    closed: CancellationToken,
}

impl<T: Send> StageBuffer<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            name,
            tx,
            rx: Mutex::new(rx),
            closed: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn put(&self, item: T) -> Result<(), Closed<T>> {
        if self.closed.is_cancelled() {
            return Err(Closed(item));
        }
        let permit = tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            permit = self.tx.reserve() => permit.ok(),
        };
        match permit {
            Some(permit) => {
                permit.send(item);
                Ok(())
            }
            None => Err(Closed(item)),
        }
    }

    pub async fn take(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            item = rx.recv() => item,
            _ = self.closed.cancelled() => rx.try_recv().ok(),
        }
    }

    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Items currently waiting to be taken.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Tests ──

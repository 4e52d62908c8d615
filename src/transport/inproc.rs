//! In-process transport (tests)
//!
//! Two bounded queues of capacity 100 wired crosswise between a pair of
//! endpoints. `send` fails fast with a "full" error instead of blocking;
//! `close` drains the incoming queue and releases the peer's sender.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use super::Transport;
use crate::protocol::JsonRpcMessage;
use crate::{Error, Result};

/// Queue capacity per direction
const QUEUE_CAPACITY: usize = 100;

/// In-process transport endpoint
pub struct InProcTransport {
    outgoing: mpsc::Sender<JsonRpcMessage>,
    incoming: Mutex<mpsc::Receiver<JsonRpcMessage>>,
    connected: AtomicBool,
}

impl InProcTransport {
    /// Create a connected pair of endpoints.
    #[must_use]
    pub fn pair() -> (Arc<Self>, Arc<Self>) {
        let (a_tx, a_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (b_tx, b_rx) = mpsc::channel(QUEUE_CAPACITY);
        let a = Arc::new(Self {
            outgoing: a_tx,
            incoming: Mutex::new(b_rx),
            connected: AtomicBool::new(true),
        });
        let b = Arc::new(Self {
            outgoing: b_tx,
            incoming: Mutex::new(a_rx),
            connected: AtomicBool::new(true),
        });
        (a, b)
    }
}

#[async_trait]
impl Transport for InProcTransport {
    async fn send(&self, message: &JsonRpcMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Transport("Not connected".to_string()));
        }
        match self.outgoing.try_send(message.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(Error::Transport("Queue full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.connected.store(false, Ordering::Relaxed);
                Err(Error::Transport("Peer closed".to_string()))
            }
        }
    }

    async fn receive(&self) -> Result<JsonRpcMessage> {
        match self.incoming.lock().await.recv().await {
            Some(message) => Ok(message),
            None => {
                self.connected.store(false, Ordering::Relaxed);
                Err(Error::Transport("Peer closed".to_string()))
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed) && !self.outgoing.is_closed()
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        let mut incoming = self.incoming.lock().await;
        incoming.close();
        while incoming.try_recv().is_ok() {}
        Ok(())
    }
}

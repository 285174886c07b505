//! Chat transport adapters.

pub mod slack;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::BACKEND_QUEUE_SIZE;
use crate::error::Result;
use crate::message::Message;

/// Contract between a chat transport and the conversation manager.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Identity tag exposed to handlers.
    fn name(&self) -> &str;

    /// Long-running: push incoming messages onto the ingress queue.
    /// Returning an error is fatal (e.g. invalid credentials) and shuts
    /// the process down.
    async fn read(&self, ingress: mpsc::Sender<Message>) -> Result<()>;

    /// Long-running: deliver egress messages to the transport. The text
    /// `"..."` requests a typing indicator instead of a message; literal
    /// `\n` sequences are expanded to real newlines before delivery.
    async fn post(&self, egress: mpsc::Receiver<Message>);

    /// Strip transport-specific artifacts from the text. Idempotent.
    fn sanitize(&self, m: Message) -> Message;
}

/// The bounded queue pairs linking a backend adapter to the manager.
pub struct BackendQueues {
    pub mesg_tx: mpsc::Sender<Message>,
    pub mesg_rx: mpsc::Receiver<Message>,
    pub resp_tx: mpsc::Sender<Message>,
    pub resp_rx: mpsc::Receiver<Message>,
}

impl BackendQueues {
    pub fn new() -> Self {
        let (mesg_tx, mesg_rx) = mpsc::channel(BACKEND_QUEUE_SIZE);
        let (resp_tx, resp_rx) = mpsc::channel(BACKEND_QUEUE_SIZE);
        Self {
            mesg_tx,
            mesg_rx,
            resp_tx,
            resp_rx,
        }
    }
}

impl Default for BackendQueues {
    fn default() -> Self {
        Self::new()
    }
}

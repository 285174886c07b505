//! A conversation binds one handler engine to a thread or channel scope.

pub mod manager;

use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::Engine;
use crate::message::Message;
use manager::Manager;

/// Whether a conversation is keyed by thread id or by channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Threaded,
    Channel,
}

/// Scope and thread binding, mutated together by the switch commands.
#[derive(Debug, Clone)]
struct Binding {
    scope: Scope,
    thread_id: String,
}

pub struct Conversation {
    engine_name: String,
    channel_id: String,
    channel_name: String,
    binding: RwLock<Binding>,
    prefix_username: bool,
    direct_messages_only: bool,
    input: mpsc::Sender<String>,
}

impl Conversation {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        engine_name: String,
        channel_id: String,
        channel_name: String,
        scope: Scope,
        thread_id: String,
        prefix_username: bool,
        direct_messages_only: bool,
        input: mpsc::Sender<String>,
    ) -> Self {
        Self {
            engine_name,
            channel_id,
            channel_name,
            binding: RwLock::new(Binding { scope, thread_id }),
            prefix_username,
            direct_messages_only,
            input,
        }
    }

    pub fn engine_name(&self) -> &str {
        &self.engine_name
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn scope(&self) -> Scope {
        self.binding.read().expect("binding lock poisoned").scope
    }

    pub fn thread_id(&self) -> String {
        self.binding
            .read()
            .expect("binding lock poisoned")
            .thread_id
            .clone()
    }

    pub fn direct_messages_only(&self) -> bool {
        self.direct_messages_only
    }

    /// Move the conversation between scopes. Only the manager calls this,
    /// under the index locks that make the move atomic.
    pub(crate) fn rebind(&self, scope: Scope, thread_id: String) {
        let mut binding = self.binding.write().expect("binding lock poisoned");
        binding.scope = scope;
        binding.thread_id = thread_id;
    }

    /// Drive the engine and relay its output lines to the manager.
    ///
    /// Returns when the engine closes its output queue (child exit) or the
    /// ambient token cancels; the caller removes the conversation from the
    /// manager's indexes afterwards.
    pub async fn run(
        self: Arc<Self>,
        manager: Manager,
        engine: Box<dyn Engine>,
        mut output: mpsc::Receiver<String>,
        cancel: CancellationToken,
    ) {
        debug!(engine = %self.engine_name, channel = %self.channel_name, "conversation started");

        let engine_cancel = cancel.child_token();
        let engine_task = tokio::spawn(engine.run(engine_cancel.clone()));

        loop {
            tokio::select! {
                line = output.recv() => match line {
                    Some(line) => {
                        let reply = Message {
                            text: line,
                            channel_id: self.channel_id.clone(),
                            channel_name: self.channel_name.clone(),
                            thread_id: self.thread_id(),
                            ..Message::default()
                        };
                        manager.post(&self, reply).await;
                    }
                    None => {
                        debug!(engine = %self.engine_name, "engine finished");
                        break;
                    }
                },
                _ = cancel.cancelled() => {
                    debug!(engine = %self.engine_name, "conversation cancelled");
                    break;
                }
            }
        }

        engine_cancel.cancel();
        match engine_task.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                debug!(%error, engine = %self.engine_name, "engine exited with error");
            }
            Err(error) => {
                debug!(%error, engine = %self.engine_name, "engine task failed");
            }
        }
    }

    /// Feed one inbound message to the handler. Blocks under backpressure;
    /// a slow handler slows its own dispatch only.
    pub async fn post(&self, m: &Message) {
        if m.text.is_empty() {
            return;
        }
        let line = if self.prefix_username {
            format!("{}: {}", m.user, m.text)
        } else {
            m.text.clone()
        };
        if self.input.send(line).await.is_err() {
            debug!(engine = %self.engine_name, "engine input closed, dropping message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::ENGINE_QUEUE_SIZE;

    fn conversation(prefix_username: bool) -> (Conversation, mpsc::Receiver<String>) {
        let (input, input_rx) = mpsc::channel(ENGINE_QUEUE_SIZE);
        let conversation = Conversation::new(
            "echo".to_string(),
            "C1".to_string(),
            "general".to_string(),
            Scope::Threaded,
            "T1".to_string(),
            prefix_username,
            false,
            input,
        );
        (conversation, input_rx)
    }

    #[tokio::test]
    async fn post_relays_text() {
        let (conversation, mut input_rx) = conversation(false);
        let m = Message {
            text: "hello".to_string(),
            user: "U1".to_string(),
            ..Message::default()
        };
        conversation.post(&m).await;
        assert_eq!(input_rx.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn post_prefixes_username_when_configured() {
        let (conversation, mut input_rx) = conversation(true);
        let m = Message {
            text: "hello".to_string(),
            user: "U1".to_string(),
            ..Message::default()
        };
        conversation.post(&m).await;
        assert_eq!(input_rx.recv().await.as_deref(), Some("U1: hello"));
    }

    #[tokio::test]
    async fn post_drops_empty_lines() {
        let (conversation, mut input_rx) = conversation(false);
        conversation.post(&Message::default()).await;
        conversation
            .post(&Message {
                text: "real".to_string(),
                ..Message::default()
            })
            .await;
        assert_eq!(input_rx.recv().await.as_deref(), Some("real"));
    }

    #[test]
    fn rebind_moves_scope_and_thread() {
        let (conversation, _input_rx) = conversation(false);
        assert_eq!(conversation.scope(), Scope::Threaded);
        assert_eq!(conversation.thread_id(), "T1");

        conversation.rebind(Scope::Channel, String::new());
        assert_eq!(conversation.scope(), Scope::Channel);
        assert!(conversation.thread_id().is_empty());
    }
}

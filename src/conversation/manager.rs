//! Conversation routing, lifecycle, and the trigger-matching table.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use regex::Regex;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::{Conversation, Scope};
use crate::backend::{Backend, BackendQueues};
use crate::config::{self, HandlerConfig};
use crate::engine::{EngineFactory, EngineQueues, EngineRegistry};
use crate::message::Message;
use crate::metrics;
use crate::{BOT_NAME, COMMAND_SCHEME};

/// How long a switch/thread command waits for the backend to report the
/// posted message's thread id.
const THREAD_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

struct TriggerEntry {
    pattern: Regex,
    factories: Vec<Arc<dyn EngineFactory>>,
}

/// Routes messages to conversations and owns their lifecycle.
///
/// Cheap to clone; all clones share the same state. A conversation holds a
/// clone purely to call [`Manager::post`] on each handler output line.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    backend: Arc<dyn Backend>,
    config_dir: PathBuf,
    registry: EngineRegistry,
    cancel: CancellationToken,
    tracker: TaskTracker,
    fatal: AtomicBool,

    mesg_tx: mpsc::Sender<Message>,
    mesg_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    resp_tx: mpsc::Sender<Message>,
    resp_rx: Mutex<Option<mpsc::Receiver<Message>>>,

    triggers: StdRwLock<Vec<TriggerEntry>>,
    /// thread id -> conversation.
    threaded: RwLock<HashMap<String, Arc<Conversation>>>,
    /// channel id -> engine name -> conversation. Lock order: this lock
    /// before `threaded`, everywhere both are taken.
    channel: RwLock<HashMap<String, HashMap<String, Arc<Conversation>>>>,

    command_pattern: Regex,
}

impl Manager {
    pub fn new(
        backend: Arc<dyn Backend>,
        queues: BackendQueues,
        registry: EngineRegistry,
        config_dir: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        let BackendQueues {
            mesg_tx,
            mesg_rx,
            resp_tx,
            resp_rx,
        } = queues;
        let command_pattern = Regex::new(&format!(r"\b{}(\S+)", regex::escape(COMMAND_SCHEME)))
            .expect("command pattern");
        Self {
            inner: Arc::new(ManagerInner {
                backend,
                config_dir,
                registry,
                cancel,
                tracker: TaskTracker::new(),
                fatal: AtomicBool::new(false),
                mesg_tx,
                mesg_rx: Mutex::new(Some(mesg_rx)),
                resp_tx,
                resp_rx: Mutex::new(Some(resp_rx)),
                triggers: StdRwLock::new(Vec::new()),
                threaded: RwLock::new(HashMap::new()),
                channel: RwLock::new(HashMap::new()),
                command_pattern,
            }),
        }
    }

    /// Rebuild the trigger table from the config directory.
    ///
    /// Safe to call while conversations are live: the table is swapped
    /// atomically and existing conversations are untouched. On error the
    /// previous table stays in place.
    pub fn load_engines(&self) -> crate::Result<()> {
        let configs = config::load_config_dir(&self.inner.config_dir)?;

        let mut entries: Vec<TriggerEntry> = Vec::new();
        for config in configs {
            let name = config.name.clone();
            let Some(factory) = self.inner.registry.factory_for(config) else {
                warn!(handler = %name, "unknown engine kind, skipping handler");
                continue;
            };
            for pattern in &factory.config().triggers {
                let regex = match Regex::new(pattern) {
                    Ok(regex) => regex,
                    Err(error) => {
                        warn!(handler = %name, pattern = %pattern, %error, "dropping unparseable trigger");
                        continue;
                    }
                };
                match entries
                    .iter_mut()
                    .find(|entry| entry.pattern.as_str() == pattern)
                {
                    Some(entry) => entry.factories.push(factory.clone()),
                    None => entries.push(TriggerEntry {
                        pattern: regex,
                        factories: vec![factory.clone()],
                    }),
                }
            }
        }

        let count = entries.len();
        {
            let mut triggers = self.inner.triggers.write().expect("trigger table lock poisoned");
            *triggers = entries;
            metrics::CONVERSATION_TRIGGERS.set(count as i64);
        }
        info!(triggers = count, "trigger table loaded");
        Ok(())
    }

    /// True when the backend read loop ended with a fatal error (e.g.
    /// invalid credentials) rather than a requested shutdown.
    pub fn failed(&self) -> bool {
        self.inner.fatal.load(Ordering::Relaxed)
    }

    /// Run the dispatch loop until the root token cancels.
    ///
    /// Spawns the backend read and post tasks, then routes each ingress
    /// message through sanitize, matching, and conversation fan-out.
    pub async fn start(&self) {
        let Some(mut mesg_rx) = self.inner.mesg_rx.lock().await.take() else {
            warn!("conversation manager started twice");
            return;
        };
        let Some(resp_rx) = self.inner.resp_rx.lock().await.take() else {
            warn!("conversation manager started twice");
            return;
        };

        let backend = self.inner.backend.clone();
        let mesg_tx = self.inner.mesg_tx.clone();
        let cancel = self.inner.cancel.clone();
        let fatal = self.clone();
        self.inner.tracker.spawn(async move {
            tokio::select! {
                result = backend.read(mesg_tx) => {
                    if let Err(error) = result {
                        error!(%error, "backend read failed, shutting down");
                        fatal.inner.fatal.store(true, Ordering::Relaxed);
                        cancel.cancel();
                    }
                }
                _ = cancel.cancelled() => {}
            }
        });

        let backend = self.inner.backend.clone();
        let cancel = self.inner.cancel.clone();
        self.inner.tracker.spawn(async move {
            tokio::select! {
                () = backend.post(resp_rx) => {}
                _ = cancel.cancelled() => {}
            }
        });

        loop {
            tokio::select! {
                m = mesg_rx.recv() => {
                    let Some(m) = m else {
                        debug!("ingress queue closed");
                        break;
                    };
                    let m = self.inner.backend.sanitize(m);
                    for conversation in self.get_or_create_conversations(&m).await {
                        conversation.post(&m).await;
                    }
                }
                _ = self.inner.cancel.cancelled() => {
                    debug!("terminating conversation manager");
                    break;
                }
            }
        }
    }

    /// Wait for every backend task and conversation to wind down.
    pub async fn shutdown(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    /// Find the conversations a message belongs to, creating new ones for
    /// trigger matches.
    async fn get_or_create_conversations(&self, m: &Message) -> Vec<Arc<Conversation>> {
        // A thread already bound to a conversation wins outright; channel
        // and trigger matching never see messages for a bound thread.
        {
            let threaded = self.inner.threaded.read().await;
            if let Some(conversation) = threaded.get(&m.thread_id) {
                debug!(thread = %m.thread_id, engine = %conversation.engine_name(), "matched threaded conversation");
                if !conversation.direct_messages_only() || m.direct_message {
                    return vec![conversation.clone()];
                }
                return Vec::new();
            }
        }

        let mut matched: Vec<Arc<Conversation>> = Vec::new();

        // Channel-scoped conversations receive top-level messages only.
        if !m.in_thread {
            let channel = self.inner.channel.read().await;
            if let Some(for_channel) = channel.get(&m.channel_id) {
                for conversation in for_channel.values() {
                    if !conversation.direct_messages_only() || m.direct_message {
                        matched.push(conversation.clone());
                    }
                }
            }
        }

        // Triggers may start new conversations. Factories are cloned out
        // so no lock is held across conversation creation.
        let factories: Vec<Arc<dyn EngineFactory>> = {
            let triggers = self.inner.triggers.read().expect("trigger table lock poisoned");
            triggers
                .iter()
                .filter(|entry| entry.pattern.is_match(&m.text))
                .flat_map(|entry| entry.factories.iter().cloned())
                .collect()
        };

        for factory in factories {
            if let Some(conversation) = self.create_conversation(factory, m).await {
                matched.push(conversation);
            }
        }

        matched
    }

    /// Build, register, and launch a conversation for one factory, unless
    /// a creation gate or the registration race guard says otherwise.
    async fn create_conversation(
        &self,
        factory: Arc<dyn EngineFactory>,
        m: &Message,
    ) -> Option<Arc<Conversation>> {
        let config = factory.config();

        if config.direct_message_triggers_only && !m.direct_message {
            return None;
        }
        if !config.channels.is_empty()
            && !config.channels.iter().any(|name| name == &m.channel_name)
        {
            return None;
        }

        let (queues, endpoint) = EngineQueues::new();
        let EngineQueues { input, output } = queues;
        let env = self.engine_environment(m, config);
        let engine = factory.create(env, endpoint);

        let (scope, thread_id) = if config.threaded {
            (Scope::Threaded, m.thread_id.clone())
        } else {
            (Scope::Channel, String::new())
        };
        let conversation = Arc::new(Conversation::new(
            config.name.clone(),
            m.channel_id.clone(),
            m.channel_name.clone(),
            scope,
            thread_id,
            config.prefix_username,
            config.direct_messages_only,
            input,
        ));

        // Check-and-insert under the index write lock. The loser of a race
        // discards the conversation and its engine; nothing has started.
        if config.threaded {
            let mut threaded = self.inner.threaded.write().await;
            if threaded.contains_key(&m.thread_id) {
                info!(thread = %m.thread_id, engine = %config.name, "lost registration race, discarding conversation");
                return None;
            }
            threaded.insert(m.thread_id.clone(), conversation.clone());
            metrics::THREADED_CONVERSATIONS.inc();
            metrics::CONVERSATIONS.inc();
        } else {
            let mut channel = self.inner.channel.write().await;
            let for_channel = channel.entry(m.channel_id.clone()).or_default();
            if for_channel.contains_key(&config.name) {
                debug!(channel = %m.channel_id, engine = %config.name, "conversation already active");
                return None;
            }
            for_channel.insert(config.name.clone(), conversation.clone());
            metrics::CHANNEL_CONVERSATIONS.inc();
            metrics::CONVERSATIONS.inc();
        }

        info!(
            engine = %config.name,
            channel = %m.channel_name,
            threaded = config.threaded,
            "conversation created"
        );

        let manager = self.clone();
        let running = conversation.clone();
        let token = self.inner.cancel.child_token();
        self.inner.tracker.spawn(async move {
            running.clone().run(manager.clone(), engine, output, token).await;
            manager.remove_conversation(&running).await;
        });

        Some(conversation)
    }

    /// Drop a finished conversation from whichever index holds it.
    async fn remove_conversation(&self, conversation: &Arc<Conversation>) {
        // Lock order: channel index, then threaded index.
        let mut channel = self.inner.channel.write().await;
        let mut threaded = self.inner.threaded.write().await;

        let thread_id = conversation.thread_id();
        if let Some(existing) = threaded.get(&thread_id) {
            if Arc::ptr_eq(existing, conversation) {
                threaded.remove(&thread_id);
                metrics::THREADED_CONVERSATIONS.dec();
                metrics::CONVERSATIONS.dec();
                debug!(thread = %thread_id, engine = %conversation.engine_name(), "threaded conversation removed");
                return;
            }
        }

        if let Some(for_channel) = channel.get_mut(conversation.channel_id()) {
            let bound = for_channel
                .get(conversation.engine_name())
                .is_some_and(|existing| Arc::ptr_eq(existing, conversation));
            if bound {
                for_channel.remove(conversation.engine_name());
                if for_channel.is_empty() {
                    channel.remove(conversation.channel_id());
                }
                metrics::CHANNEL_CONVERSATIONS.dec();
                metrics::CONVERSATIONS.dec();
                debug!(channel = %conversation.channel_id(), engine = %conversation.engine_name(), "channel conversation removed");
            }
        }
    }

    /// Forward a handler-produced message to the backend, honouring any
    /// in-band conversation command embedded in the text.
    pub async fn post(&self, conversation: &Arc<Conversation>, mut m: Message) {
        if let Some(command) = self.extract_command(&mut m) {
            match command.as_str() {
                "switch/channel" => self.switch_to_channel(conversation).await,
                "switch/thread" => {
                    // switch_to_thread posts the message itself, with the
                    // thread-id reply channel attached.
                    self.switch_to_thread(conversation, m).await;
                    return;
                }
                other => warn!(command = other, "unknown conversation command"),
            }
        }
        if self.inner.resp_tx.send(m).await.is_err() {
            warn!("egress queue closed, dropping response");
        }
    }

    /// Extract and strip a `botmand://` command token from the text.
    fn extract_command(&self, m: &mut Message) -> Option<String> {
        let (span, command) = {
            let captures = self.inner.command_pattern.captures(&m.text)?;
            let token = captures.get(0)?;
            let command = captures.get(1)?;
            (token.range(), command.as_str().to_string())
        };
        m.text.replace_range(span, "");
        if m.text.trim().is_empty() {
            m.text = "_..._".to_string();
        }
        Some(command)
    }

    /// Reclassify a live threaded conversation as channel-scoped.
    async fn switch_to_channel(&self, conversation: &Arc<Conversation>) {
        let mut channel = self.inner.channel.write().await;
        let mut threaded = self.inner.threaded.write().await;

        let thread_id = conversation.thread_id();
        let thread_bound = threaded
            .get(&thread_id)
            .is_some_and(|existing| Arc::ptr_eq(existing, conversation));
        if !thread_bound {
            warn!(thread = %thread_id, "switch/channel: conversation is not thread-bound");
            return;
        }

        let occupied = channel
            .get(conversation.channel_id())
            .is_some_and(|for_channel| for_channel.contains_key(conversation.engine_name()));
        if occupied {
            warn!(
                channel = %conversation.channel_id(),
                engine = %conversation.engine_name(),
                "switch/channel: slot already occupied, conversation unchanged"
            );
            return;
        }

        threaded.remove(&thread_id);
        channel
            .entry(conversation.channel_id().to_string())
            .or_default()
            .insert(conversation.engine_name().to_string(), conversation.clone());
        conversation.rebind(Scope::Channel, String::new());
        metrics::THREADED_CONVERSATIONS.dec();
        metrics::CHANNEL_CONVERSATIONS.inc();
        info!(
            engine = %conversation.engine_name(),
            channel = %conversation.channel_id(),
            "conversation switched to channel scope"
        );
    }

    /// Reclassify a channel conversation as thread-scoped.
    ///
    /// The destination thread id only exists once the backend has posted
    /// the current message, so the message goes out with a reply channel
    /// attached and the switch waits up to five seconds for the id. On
    /// timeout the conversation stays where it is.
    async fn switch_to_thread(&self, conversation: &Arc<Conversation>, mut m: Message) {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        m.need_thread_id = true;
        m.thread_id_reply = Some(reply_tx);

        if self.inner.resp_tx.send(m).await.is_err() {
            warn!("egress queue closed, abandoning switch/thread");
            return;
        }

        let thread_id = match timeout(THREAD_REPLY_TIMEOUT, reply_rx.recv()).await {
            Ok(Some(thread_id)) => thread_id,
            Ok(None) | Err(_) => {
                warn!(
                    engine = %conversation.engine_name(),
                    "switch/thread: no thread id from backend, conversation unchanged"
                );
                return;
            }
        };

        let mut channel = self.inner.channel.write().await;
        let mut threaded = self.inner.threaded.write().await;

        if threaded.contains_key(&thread_id) {
            warn!(thread = %thread_id, "switch/thread: thread already bound, conversation unchanged");
            return;
        }

        let removed = match channel.get_mut(conversation.channel_id()) {
            Some(for_channel) => {
                let bound = for_channel
                    .get(conversation.engine_name())
                    .is_some_and(|existing| Arc::ptr_eq(existing, conversation));
                if bound {
                    for_channel.remove(conversation.engine_name());
                }
                bound
            }
            None => false,
        };
        if !removed {
            warn!(
                engine = %conversation.engine_name(),
                "switch/thread: conversation is not channel-bound"
            );
            return;
        }
        if channel
            .get(conversation.channel_id())
            .is_some_and(|for_channel| for_channel.is_empty())
        {
            channel.remove(conversation.channel_id());
        }

        threaded.insert(thread_id.clone(), conversation.clone());
        conversation.rebind(Scope::Threaded, thread_id.clone());
        metrics::CHANNEL_CONVERSATIONS.dec();
        metrics::THREADED_CONVERSATIONS.inc();
        info!(
            engine = %conversation.engine_name(),
            thread = %thread_id,
            "conversation switched to thread scope"
        );
    }

    /// Environment handed to a freshly created engine: message-derived
    /// variables under the upper-cased bot-name prefix, with the handler's
    /// own environment map merged on top.
    fn engine_environment(&self, m: &Message, config: &HandlerConfig) -> HashMap<String, String> {
        let prefix = BOT_NAME.to_uppercase();
        let mut env = HashMap::from([
            (format!("{prefix}_USER_ID"), m.bot_user_id.clone()),
            (format!("{prefix}_USER_NAME"), m.bot_user_name.clone()),
            (format!("{prefix}_CHANNEL"), m.channel_name.clone()),
            (format!("{prefix}_CHANNEL_ID"), m.channel_id.clone()),
            (
                format!("{prefix}_BACKEND_NAME"),
                self.inner.backend.name().to_string(),
            ),
            (format!("{prefix}_LOCALE"), m.locale.clone()),
        ]);
        if !m.thread_id.is_empty() {
            env.insert(format!("{prefix}_THREAD"), m.thread_id.clone());
        }
        env.extend(config.environment.clone());
        env
    }
}

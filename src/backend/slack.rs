//! Slack backend over the RTM websocket and the Web API.
//!
//! The [`SlackApi`] trait is a thin seam over the wire protocol so the
//! backend logic can be tested against scripted events; [`RtmClient`] is
//! the real implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use regex::Regex;
use serde::Deserialize;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use super::Backend;
use crate::error::{Error, Result};
use crate::message::Message;

/// How long posted-message timestamps are remembered for echo suppression.
const POSTED_CACHE_TTL: Duration = Duration::from_secs(60);

/// Events surfaced by a [`SlackApi`] implementation.
#[derive(Debug, Clone)]
pub enum SlackEvent {
    /// RTM session established; carries the bot's own identity.
    Connected { bot_id: String, bot_name: String },
    Message(SlackMessageEvent),
    Disconnected,
}

#[derive(Debug, Clone, Default)]
pub struct SlackMessageEvent {
    pub user: String,
    pub text: String,
    pub channel: String,
    pub ts: String,
    pub thread_ts: String,
    pub subtype: String,
}

#[derive(Debug, Clone, Default)]
pub struct SlackChannelInfo {
    pub name: String,
    pub locale: String,
}

/// The slice of the Slack API the backend needs.
#[async_trait]
pub trait SlackApi: Send + Sync {
    /// Connect and stream RTM events. An authentication failure is an
    /// error, which the backend treats as fatal.
    async fn events(&self) -> Result<mpsc::Receiver<SlackEvent>>;

    async fn channel_info(&self, channel: &str) -> SlackChannelInfo;

    /// Post a message, returning its server-assigned timestamp.
    async fn post_message(&self, channel: &str, text: &str, thread_ts: &str) -> Result<String>;

    async fn post_typing(&self, channel: &str);
}

#[derive(Debug, Deserialize)]
struct RtmConnectResponse {
    ok: bool,
    #[serde(default)]
    error: String,
    #[serde(default)]
    url: String,
    #[serde(rename = "self")]
    identity: Option<RtmIdentity>,
}

#[derive(Debug, Deserialize)]
struct RtmIdentity {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: String,
    #[serde(default)]
    ts: String,
}

#[derive(Debug, Deserialize)]
struct ConversationsInfoResponse {
    ok: bool,
    channel: Option<ConversationInfo>,
}

#[derive(Debug, Deserialize, Default)]
struct ConversationInfo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    locale: String,
}

/// Real Slack client: `rtm.connect` plus a websocket for events and typing
/// frames, and the Web API for posting and channel lookups.
pub struct RtmClient {
    token: String,
    http: reqwest::Client,
    /// Raw frames destined for the websocket, once connected.
    ws_tx: Mutex<Option<mpsc::Sender<String>>>,
    next_frame_id: AtomicU64,
}

impl RtmClient {
    pub fn new(token: String) -> Self {
        Self {
            token,
            http: reqwest::Client::new(),
            ws_tx: Mutex::new(None),
            next_frame_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl SlackApi for RtmClient {
    async fn events(&self) -> Result<mpsc::Receiver<SlackEvent>> {
        let response: RtmConnectResponse = self
            .http
            .post("https://slack.com/api/rtm.connect")
            .bearer_auth(&self.token)
            .send()
            .await?
            .json()
            .await?;
        if !response.ok {
            return Err(Error::Slack(format!("rtm.connect failed: {}", response.error)));
        }
        let identity = response
            .identity
            .ok_or_else(|| Error::Slack("rtm.connect response missing self".to_string()))?;

        let (stream, _) = tokio_tungstenite::connect_async(response.url.as_str()).await?;
        let (mut ws_write, mut ws_read) = stream.split();

        let (event_tx, event_rx) = mpsc::channel(crate::BACKEND_QUEUE_SIZE);
        let (frame_tx, mut frame_rx) = mpsc::channel::<String>(16);
        *self.ws_tx.lock().await = Some(frame_tx);

        let _ = event_tx
            .send(SlackEvent::Connected {
                bot_id: identity.id,
                bot_name: identity.name,
            })
            .await;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = frame_rx.recv() => {
                        let Some(frame) = frame else { break };
                        if ws_write.send(WsMessage::text(frame)).await.is_err() {
                            break;
                        }
                    }
                    incoming = ws_read.next() => {
                        let Some(incoming) = incoming else {
                            let _ = event_tx.send(SlackEvent::Disconnected).await;
                            break;
                        };
                        match incoming {
                            Ok(WsMessage::Text(raw)) => {
                                if let Some(event) = parse_rtm_event(raw.as_str()) {
                                    if event_tx.send(event).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Ok(WsMessage::Close(_)) => {
                                let _ = event_tx.send(SlackEvent::Disconnected).await;
                                break;
                            }
                            Ok(_) => {}
                            Err(err) => {
                                error!(error = %err, "rtm websocket read failed");
                                let _ = event_tx.send(SlackEvent::Disconnected).await;
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(event_rx)
    }

    async fn channel_info(&self, channel: &str) -> SlackChannelInfo {
        let response = match self
            .http
            .get("https://slack.com/api/conversations.info")
            .bearer_auth(&self.token)
            .query(&[("channel", channel), ("include_locale", "true")])
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, channel, "conversations.info request failed");
                return SlackChannelInfo::default();
            }
        };

        match response.json::<ConversationsInfoResponse>().await {
            Ok(body) if body.ok => {
                let info = body.channel.unwrap_or_default();
                SlackChannelInfo {
                    name: info.name,
                    locale: info.locale,
                }
            }
            Ok(_) | Err(_) => {
                warn!(channel, "conversations.info lookup failed");
                SlackChannelInfo::default()
            }
        }
    }

    async fn post_message(&self, channel: &str, text: &str, thread_ts: &str) -> Result<String> {
        let mut body = serde_json::json!({
            "channel": channel,
            "text": text,
            "as_user": true,
        });
        if !thread_ts.is_empty() {
            body["thread_ts"] = thread_ts.into();
        }

        let response: PostMessageResponse = self
            .http
            .post("https://slack.com/api/chat.postMessage")
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        if !response.ok {
            return Err(Error::Slack(format!(
                "chat.postMessage failed: {}",
                response.error
            )));
        }
        Ok(response.ts)
    }

    async fn post_typing(&self, channel: &str) {
        let id = self.next_frame_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::json!({
            "id": id,
            "type": "typing",
            "channel": channel,
        })
        .to_string();

        let frame_tx = self.ws_tx.lock().await.clone();
        match frame_tx {
            Some(frame_tx) => {
                let _ = frame_tx.send(frame).await;
            }
            None => debug!(channel, "typing indicator requested before rtm connect"),
        }
    }
}

fn parse_rtm_event(raw: &str) -> Option<SlackEvent> {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            debug!(error = %err, "unparseable rtm frame");
            return None;
        }
    };
    match value.get("type").and_then(|kind| kind.as_str())? {
        "message" => {
            let field = |key: &str| {
                value
                    .get(key)
                    .and_then(|field| field.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            Some(SlackEvent::Message(SlackMessageEvent {
                user: field("user"),
                text: field("text"),
                channel: field("channel"),
                ts: field("ts"),
                thread_ts: field("thread_ts"),
                subtype: field("subtype"),
            }))
        }
        "error" => {
            warn!(frame = raw, "rtm error event");
            None
        }
        "goodbye" => Some(SlackEvent::Disconnected),
        // hello, user_typing, presence_change, ...
        _ => None,
    }
}

struct BotIdentity {
    id: String,
    name: String,
    mention: Regex,
}

/// Slack adapter behind the [`Backend`] contract.
pub struct SlackBackend {
    api: Arc<dyn SlackApi>,
    identity: StdRwLock<Option<BotIdentity>>,
    channel_cache: Mutex<HashMap<String, SlackChannelInfo>>,
    /// Timestamps of messages we posted, for echo suppression.
    posted: StdRwLock<HashMap<String, Instant>>,
}

impl SlackBackend {
    pub fn new(api: Arc<dyn SlackApi>) -> Self {
        Self {
            api,
            identity: StdRwLock::new(None),
            channel_cache: Mutex::new(HashMap::new()),
            posted: StdRwLock::new(HashMap::new()),
        }
    }

    async fn channel_info(&self, channel: &str) -> SlackChannelInfo {
        let mut cache = self.channel_cache.lock().await;
        if let Some(info) = cache.get(channel) {
            return info.clone();
        }
        let info = self.api.channel_info(channel).await;
        cache.insert(channel.to_string(), info.clone());
        info
    }

    fn remember_posted(&self, ts: String) {
        let mut posted = self.posted.write().expect("posted cache lock poisoned");
        let now = Instant::now();
        posted.retain(|_, stamp| now.duration_since(*stamp) < POSTED_CACHE_TTL);
        posted.insert(ts, now);
    }

    fn was_posted(&self, ts: &str) -> bool {
        let posted = self.posted.read().expect("posted cache lock poisoned");
        posted
            .get(ts)
            .is_some_and(|stamp| stamp.elapsed() < POSTED_CACHE_TTL)
    }

    async fn inbound_message(&self, event: &SlackMessageEvent) -> Option<Message> {
        let (bot_id, bot_name, direct_message) = {
            let identity = self.identity.read().expect("identity lock poisoned");
            let Some(identity) = identity.as_ref() else {
                debug!("message before rtm identity, dropping");
                return None;
            };
            (
                identity.id.clone(),
                identity.name.clone(),
                identity.mention.is_match(&event.text),
            )
        };

        if event.user.is_empty() {
            debug!(ts = %event.ts, "ignoring ghost message");
            return None;
        }
        if event.user == bot_id {
            debug!(ts = %event.ts, "ignoring own message");
            return None;
        }
        if self.was_posted(&event.ts) {
            debug!(ts = %event.ts, "ignoring posted-message echo");
            return None;
        }
        if event.user == "USLACKBOT" {
            debug!(ts = %event.ts, "ignoring slackbot message");
            return None;
        }
        if event.subtype == "message_replied" {
            return None;
        }

        let info = self.channel_info(&event.channel).await;
        let (thread_id, in_thread) = if event.thread_ts.is_empty() {
            (event.ts.clone(), false)
        } else {
            (event.thread_ts.clone(), true)
        };

        Some(Message {
            text: event.text.clone(),
            user: event.user.clone(),
            bot_user_id: bot_id,
            bot_user_name: bot_name,
            channel_id: event.channel.clone(),
            channel_name: info.name,
            thread_id,
            in_thread,
            direct_message,
            locale: info.locale,
            ..Message::default()
        })
    }
}

#[async_trait]
impl Backend for SlackBackend {
    fn name(&self) -> &str {
        "Slack"
    }

    async fn read(&self, ingress: mpsc::Sender<Message>) -> Result<()> {
        let mut events = self.api.events().await?;

        while let Some(event) = events.recv().await {
            match event {
                SlackEvent::Connected { bot_id, bot_name } => {
                    info!(bot = %bot_name, id = %bot_id, "connected to slack");
                    let mention = Regex::new(&format!("<@{}>", regex::escape(&bot_id)))
                        .expect("mention pattern");
                    *self.identity.write().expect("identity lock poisoned") = Some(BotIdentity {
                        id: bot_id,
                        name: bot_name,
                        mention,
                    });
                }
                SlackEvent::Message(event) => {
                    let Some(m) = self.inbound_message(&event).await else {
                        continue;
                    };
                    if ingress.send(m).await.is_err() {
                        break;
                    }
                }
                SlackEvent::Disconnected => {
                    info!("slack backend disconnected");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn post(&self, mut egress: mpsc::Receiver<Message>) {
        while let Some(mut m) = egress.recv().await {
            if m.text == "..." {
                self.api.post_typing(&m.channel_id).await;
                continue;
            }

            let text = m.text.replace("\\n", "\n");
            let ts = match self.api.post_message(&m.channel_id, &text, &m.thread_id).await {
                Ok(ts) => ts,
                Err(error) => {
                    error!(%error, channel = %m.channel_id, "post failed, dropping message");
                    continue;
                }
            };
            self.remember_posted(ts.clone());

            if m.need_thread_id {
                if let Some(reply) = m.thread_id_reply.take() {
                    if reply.send(ts).await.is_err() {
                        warn!("thread id reply abandoned");
                    }
                }
            }
        }
        debug!("egress queue closed, slack post loop done");
    }

    fn sanitize(&self, mut m: Message) -> Message {
        let identity = self.identity.read().expect("identity lock poisoned");
        if let Some(identity) = identity.as_ref() {
            loop {
                let Some(found) = identity.mention.find(&m.text) else {
                    break;
                };
                if found.start() != 0 {
                    break;
                }
                let stripped = m.text[found.end()..].trim_start().to_string();
                m.text = stripped;
            }
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use tokio::time::timeout;

    use crate::BACKEND_QUEUE_SIZE;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);
    const BOT_ID: &str = "B1";

    /// Scripted API: events are preloaded, posts are recorded.
    #[derive(Default)]
    struct FakeSlackApi {
        events: StdMutex<Vec<SlackEvent>>,
        channels: HashMap<String, SlackChannelInfo>,
        posts: StdMutex<Vec<(String, String, String)>>,
        typings: StdMutex<Vec<String>>,
        next_ts: AtomicU64,
    }

    impl FakeSlackApi {
        fn with_events(events: Vec<SlackEvent>) -> Self {
            Self {
                events: StdMutex::new(events),
                channels: HashMap::from([(
                    "C1".to_string(),
                    SlackChannelInfo {
                        name: "general".to_string(),
                        locale: "en-US".to_string(),
                    },
                )]),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl SlackApi for FakeSlackApi {
        async fn events(&self) -> Result<mpsc::Receiver<SlackEvent>> {
            let events = std::mem::take(&mut *self.events.lock().unwrap());
            let (tx, rx) = mpsc::channel(BACKEND_QUEUE_SIZE);
            for event in events {
                tx.try_send(event).unwrap();
            }
            // Dropping the sender ends the stream after the scripted events.
            Ok(rx)
        }

        async fn channel_info(&self, channel: &str) -> SlackChannelInfo {
            self.channels.get(channel).cloned().unwrap_or_default()
        }

        async fn post_message(&self, channel: &str, text: &str, thread_ts: &str) -> Result<String> {
            self.posts.lock().unwrap().push((
                channel.to_string(),
                text.to_string(),
                thread_ts.to_string(),
            ));
            let n = self.next_ts.fetch_add(1, Ordering::Relaxed);
            Ok(format!("1700000000.{n:06}"))
        }

        async fn post_typing(&self, channel: &str) {
            self.typings.lock().unwrap().push(channel.to_string());
        }
    }

    fn connect_event() -> SlackEvent {
        SlackEvent::Connected {
            bot_id: BOT_ID.to_string(),
            bot_name: "botmand".to_string(),
        }
    }

    fn message_event(user: &str, text: &str, ts: &str, thread_ts: &str) -> SlackEvent {
        SlackEvent::Message(SlackMessageEvent {
            user: user.to_string(),
            text: text.to_string(),
            channel: "C1".to_string(),
            ts: ts.to_string(),
            thread_ts: thread_ts.to_string(),
            subtype: String::new(),
        })
    }

    async fn run_read(backend: &SlackBackend) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(BACKEND_QUEUE_SIZE);
        backend.read(tx).await.unwrap();
        rx
    }

    #[tokio::test]
    async fn own_messages_are_dropped() {
        let api = FakeSlackApi::with_events(vec![
            connect_event(),
            message_event(BOT_ID, "hi", "1.0001", ""),
            message_event("U1", "hello", "1.0002", ""),
        ]);
        let backend = SlackBackend::new(Arc::new(api));

        let mut ingress = run_read(&backend).await;

        let m = timeout(RECV_TIMEOUT, ingress.recv()).await.unwrap().unwrap();
        assert_eq!(m.text, "hello");
        assert_eq!(m.user, "U1");
        assert_eq!(m.channel_name, "general");
        assert_eq!(m.bot_user_id, BOT_ID);
        assert!(ingress.try_recv().is_err());
    }

    #[tokio::test]
    async fn ghost_and_slackbot_messages_are_dropped() {
        let api = FakeSlackApi::with_events(vec![
            connect_event(),
            message_event("", "ghost", "1.0001", ""),
            message_event("USLACKBOT", "reminder", "1.0002", ""),
            message_event("U1", "real", "1.0003", ""),
        ]);
        let backend = SlackBackend::new(Arc::new(api));

        let mut ingress = run_read(&backend).await;
        let m = timeout(RECV_TIMEOUT, ingress.recv()).await.unwrap().unwrap();
        assert_eq!(m.text, "real");
        assert!(ingress.try_recv().is_err());
    }

    #[tokio::test]
    async fn messages_before_identity_are_dropped() {
        let api = FakeSlackApi::with_events(vec![
            message_event("U1", "too early", "1.0001", ""),
            connect_event(),
            message_event("U1", "on time", "1.0002", ""),
        ]);
        let backend = SlackBackend::new(Arc::new(api));

        let mut ingress = run_read(&backend).await;
        let m = timeout(RECV_TIMEOUT, ingress.recv()).await.unwrap().unwrap();
        assert_eq!(m.text, "on time");
        assert!(ingress.try_recv().is_err());
    }

    #[tokio::test]
    async fn thread_fields_follow_thread_ts() {
        let api = FakeSlackApi::with_events(vec![
            connect_event(),
            message_event("U1", "top level", "3.0001", ""),
            message_event("U1", "in thread", "3.0002", "3.0001"),
        ]);
        let backend = SlackBackend::new(Arc::new(api));

        let mut ingress = run_read(&backend).await;

        let top = timeout(RECV_TIMEOUT, ingress.recv()).await.unwrap().unwrap();
        assert!(!top.in_thread);
        assert_eq!(top.thread_id, "3.0001");

        let reply = timeout(RECV_TIMEOUT, ingress.recv()).await.unwrap().unwrap();
        assert!(reply.in_thread);
        assert_eq!(reply.thread_id, "3.0001");
    }

    #[tokio::test]
    async fn mention_sets_direct_message() {
        let api = FakeSlackApi::with_events(vec![
            connect_event(),
            message_event("U1", "<@B1> do it", "4.0001", ""),
            message_event("U1", "just chatting", "4.0002", ""),
        ]);
        let backend = SlackBackend::new(Arc::new(api));

        let mut ingress = run_read(&backend).await;
        assert!(ingress.recv().await.unwrap().direct_message);
        assert!(!ingress.recv().await.unwrap().direct_message);
    }

    #[tokio::test]
    async fn posted_echoes_are_dropped() {
        let api = Arc::new(FakeSlackApi::with_events(vec![connect_event()]));
        let backend = SlackBackend::new(api.clone());

        // Post once to learn the assigned timestamp.
        let (resp_tx, resp_rx) = mpsc::channel(BACKEND_QUEUE_SIZE);
        resp_tx
            .send(Message {
                text: "pong".to_string(),
                channel_id: "C1".to_string(),
                ..Message::default()
            })
            .await
            .unwrap();
        drop(resp_tx);
        backend.post(resp_rx).await;

        let posted_ts = {
            let posted = backend.posted.read().unwrap();
            posted.keys().next().unwrap().clone()
        };
        assert!(!posted_ts.is_empty());

        // An echo with the posted timestamp is suppressed even though the
        // user id differs from the bot's own.
        *api.events.lock().unwrap() = vec![
            connect_event(),
            message_event("U9", "pong", &posted_ts, ""),
            message_event("U9", "fresh", "9.0001", ""),
        ];
        let mut ingress = run_read(&backend).await;
        let m = timeout(RECV_TIMEOUT, ingress.recv()).await.unwrap().unwrap();
        assert_eq!(m.text, "fresh");
        assert!(ingress.try_recv().is_err());
    }

    #[tokio::test]
    async fn typing_indicator_and_newline_expansion() {
        let api = Arc::new(FakeSlackApi::with_events(vec![]));
        let backend = SlackBackend::new(api.clone());

        let (resp_tx, resp_rx) = mpsc::channel(BACKEND_QUEUE_SIZE);
        resp_tx
            .send(Message {
                text: "...".to_string(),
                channel_id: "C1".to_string(),
                ..Message::default()
            })
            .await
            .unwrap();
        resp_tx
            .send(Message {
                text: r"line one\nline two".to_string(),
                channel_id: "C1".to_string(),
                thread_id: "T1".to_string(),
                ..Message::default()
            })
            .await
            .unwrap();
        drop(resp_tx);
        backend.post(resp_rx).await;

        assert_eq!(*api.typings.lock().unwrap(), vec!["C1".to_string()]);
        let posts = api.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].1, "line one\nline two");
        assert_eq!(posts[0].2, "T1");
    }

    #[tokio::test]
    async fn need_thread_id_replies_with_posted_timestamp() {
        let api = Arc::new(FakeSlackApi::with_events(vec![]));
        let backend = SlackBackend::new(api.clone());

        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        let (resp_tx, resp_rx) = mpsc::channel(BACKEND_QUEUE_SIZE);
        resp_tx
            .send(Message {
                text: "starting a thread".to_string(),
                channel_id: "C1".to_string(),
                need_thread_id: true,
                thread_id_reply: Some(reply_tx),
                ..Message::default()
            })
            .await
            .unwrap();
        drop(resp_tx);
        backend.post(resp_rx).await;

        let ts = timeout(RECV_TIMEOUT, reply_rx.recv()).await.unwrap().unwrap();
        assert_eq!(api.posts.lock().unwrap().len(), 1);
        assert!(ts.starts_with("1700000000."));
    }

    #[tokio::test]
    async fn sanitize_strips_leading_mention_and_is_idempotent() {
        let api = FakeSlackApi::with_events(vec![connect_event()]);
        let backend = SlackBackend::new(Arc::new(api));
        let _ = run_read(&backend).await;

        let m = Message {
            text: "<@B1> hello".to_string(),
            ..Message::default()
        };
        let once = backend.sanitize(m);
        assert_eq!(once.text, "hello");
        let twice = backend.sanitize(once.clone());
        assert_eq!(twice.text, once.text);

        // Repeated mentions collapse in one pass, which is what makes the
        // strip idempotent.
        let m = Message {
            text: "<@B1> <@B1> hello".to_string(),
            ..Message::default()
        };
        assert_eq!(backend.sanitize(m).text, "hello");

        // A mention mid-text is left alone.
        let m = Message {
            text: "tell <@B1> hello".to_string(),
            ..Message::default()
        };
        assert_eq!(backend.sanitize(m).text, "tell <@B1> hello");
    }

    #[test]
    fn posted_cache_expires() {
        let backend = SlackBackend::new(Arc::new(FakeSlackApi::default()));
        backend.remember_posted("5.0001".to_string());
        assert!(backend.was_posted("5.0001"));
        assert!(!backend.was_posted("5.0002"));

        // Force-expire the entry.
        backend
            .posted
            .write()
            .unwrap()
            .insert("5.0001".to_string(), Instant::now() - POSTED_CACHE_TTL);
        assert!(!backend.was_posted("5.0001"));
    }

    #[test]
    fn parses_rtm_message_frames() {
        let frame = r#"{"type":"message","user":"U1","text":"hi","channel":"C1","ts":"1.0","thread_ts":"0.9"}"#;
        let Some(SlackEvent::Message(event)) = parse_rtm_event(frame) else {
            panic!("expected a message event");
        };
        assert_eq!(event.user, "U1");
        assert_eq!(event.text, "hi");
        assert_eq!(event.channel, "C1");
        assert_eq!(event.thread_ts, "0.9");

        assert!(parse_rtm_event(r#"{"type":"hello"}"#).is_none());
        assert!(matches!(
            parse_rtm_event(r#"{"type":"goodbye"}"#),
            Some(SlackEvent::Disconnected)
        ));
        assert!(parse_rtm_event("not json").is_none());
    }
}

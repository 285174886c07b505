use tokio::sync::mpsc;

/// One chat event, carried end-to-end between the backend and a handler.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub text: String,
    /// Id of the sending user.
    pub user: String,
    /// The bot's own user id on the backend.
    pub bot_user_id: String,
    /// The bot's own user name on the backend.
    pub bot_user_name: String,
    pub channel_id: String,
    pub channel_name: String,
    pub thread_id: String,
    /// True iff the message arrived inside an existing thread.
    pub in_thread: bool,
    /// True iff the text directly addresses the bot.
    pub direct_message: bool,
    pub locale: String,

    /// Set by the manager during a switch/thread command: the backend must
    /// report the posted message's server-assigned thread id.
    pub need_thread_id: bool,
    /// Capacity-1 reply channel for that thread id.
    pub thread_id_reply: Option<mpsc::Sender<String>>,
}

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("config directory {path} is not readable: {source}")]
    ConfigDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown engine kind {0:?}")]
    UnknownEngine(String),

    #[error("empty handler command")]
    EmptyHandler,

    #[error("failed to spawn handler {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to acquire child {0} pipe")]
    Pipe(&'static str),

    #[error("slack api error: {0}")]
    Slack(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

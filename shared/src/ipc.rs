use crate::conversation::{ConversationTurn, PollSnapshot};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

const SOCKET_NAME: &str = "parleyd.sock";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    Toggle,
    Poll,
    History,
    ClearHistory,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Response {
    Ok,
    Error(String),
    Snapshot(PollSnapshot),
    History(Vec<ConversationTurn>),
}

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection refused: is parleyd running?")]
    ConnectionRefused,

    #[error("Connection timeout")]
    Timeout,
}

/// Unix socket the daemon listens on.
/// Uses the XDG runtime directory if available, falls back to /tmp.
pub fn default_socket_path() -> PathBuf {
    match dirs::runtime_dir() {
        Some(runtime_dir) => runtime_dir.join(SOCKET_NAME),
        None => PathBuf::from("/tmp").join(SOCKET_NAME),
    }
}
